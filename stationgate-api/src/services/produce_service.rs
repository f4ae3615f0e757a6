//! Produce Service
//!
//! Publishes messages through the caller's cached connection. A stale
//! producer handle is discarded and the produce retried exactly once.

use std::sync::Arc;

use stationgate_core::{BrokerConnection, BrokerError, OutboundMessage};

use crate::error::{ApiError, ApiResult};
use crate::telemetry::metrics::with_metrics;

/// Produce one message, retrying once after a stale-producer failure.
pub async fn produce_one(
    connection: &Arc<dyn BrokerConnection>,
    station: &str,
    producer_name: &str,
    message: &OutboundMessage,
) -> Result<(), BrokerError> {
    let result = match connection.produce(station, producer_name, message).await {
        Err(e) if e.is_stale_producer() => {
            tracing::info!(station, producer_name, error = %e, "Producer handle stale, recreating");
            with_metrics(|metrics| metrics.record_produce_retry());
            connection.invalidate_producer(station, producer_name).await;
            connection.produce(station, producer_name, message).await
        }
        other => other,
    };
    with_metrics(|metrics| metrics.record_produce(result.is_ok()));
    result
}

/// Produce every message in order. The first failure aborts the batch and
/// its error carries the failing index.
pub async fn produce_batch(
    connection: &Arc<dyn BrokerConnection>,
    station: &str,
    producer_name: &str,
    messages: &[OutboundMessage],
) -> ApiResult<usize> {
    for (index, message) in messages.iter().enumerate() {
        if let Err(e) = produce_one(connection, station, producer_name, message).await {
            tracing::debug!(station, index, error = %e, "Batch produce aborted");
            return Err(ApiError::from(e).with_details(serde_json::json!({ "index": index })));
        }
    }
    Ok(messages.len())
}
