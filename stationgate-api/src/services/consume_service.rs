//! Consume Service
//!
//! Serves consume requests from the message buffer first and pulls only the
//! shortfall from the broker. Fetched messages are acknowledged to the broker
//! and buffered until the client acknowledges them by id.

use std::sync::Arc;

use stationgate_core::{
    BrokerConnection, BufferedMessage, FetchRequest, MessageId, PendingMessage,
};
use stationgate_storage::MessageBuffer;

use crate::error::{ApiError, ApiResult};
use crate::middleware::CallerContext;
use crate::services::ConnectionService;
use crate::telemetry::metrics::with_metrics;
use crate::validation::ConsumeParams;

/// Return up to `params.batch_size` messages for (station, consumer):
/// buffered ones first, in insertion order, then freshly fetched ones.
pub async fn consume_batch(
    connections: &ConnectionService,
    buffer: &Arc<dyn MessageBuffer>,
    caller: &CallerContext,
    station: &str,
    params: &ConsumeParams,
) -> ApiResult<Vec<BufferedMessage>> {
    let mut messages = buffer
        .get_messages(station, &params.consumer_name, params.batch_size)
        .await?;
    with_metrics(|metrics| metrics.record_buffer_operation("get", messages.len()));

    if messages.len() >= params.batch_size {
        return Ok(messages);
    }
    let remaining = params.batch_size - messages.len();

    let connection = connections.connection_for(caller).await?;
    let owner = caller.username(connections.broker_config());
    let request = FetchRequest {
        station: station.to_string(),
        consumer_name: params.consumer_name.clone(),
        consumer_group: params.consumer_group.clone(),
        batch_size: remaining,
        max_wait: params.max_wait,
        max_deliveries: params.max_deliveries,
    };

    // Detached so an abandoned HTTP request cannot drop fetched messages
    // before they are buffered.
    let fetch = tokio::spawn(fetch_and_buffer(
        connection,
        buffer.clone(),
        request,
        owner,
        connections.now(),
    ));
    let fresh = fetch
        .await
        .map_err(|e| ApiError::internal_error(format!("Consume task failed: {}", e)))??;

    messages.extend(fresh);
    Ok(messages)
}

async fn fetch_and_buffer(
    connection: Arc<dyn BrokerConnection>,
    buffer: Arc<dyn MessageBuffer>,
    request: FetchRequest,
    owner: String,
    now: i64,
) -> ApiResult<Vec<BufferedMessage>> {
    let fetched = match connection.fetch(&request).await {
        Ok(fetched) => {
            with_metrics(|metrics| metrics.record_fetch("success"));
            fetched
        }
        Err(e) if e.is_timeout() => {
            with_metrics(|metrics| metrics.record_fetch("timeout"));
            tracing::debug!(station = %request.station, consumer = %request.consumer_name, "Fetch timed out with no messages");
            return Ok(Vec::new());
        }
        Err(e) => {
            with_metrics(|metrics| metrics.record_fetch("error"));
            return Err(e.into());
        }
    };

    let mut buffered = Vec::with_capacity(fetched.len());
    let mut first_error: Option<ApiError> = None;

    for message in fetched {
        if let Err(e) = message.ack().await {
            tracing::warn!(
                station = %request.station,
                consumer = %request.consumer_name,
                error = %e,
                "Failed to acknowledge fetched message"
            );
        }

        let pending = PendingMessage::new(
            &request.station,
            &request.consumer_name,
            &owner,
            message.into_payload(),
            now,
        );
        // Keep buffering the rest of the batch even if one insert fails.
        match buffer.add_message(pending).await {
            Ok(stored) => buffered.push(stored),
            Err(e) => {
                tracing::error!(station = %request.station, consumer = %request.consumer_name, error = %e, "Failed to buffer fetched message");
                first_error.get_or_insert(e.into());
            }
        }
    }
    with_metrics(|metrics| metrics.record_buffer_operation("add", buffered.len()));

    match first_error {
        Some(error) => Err(error),
        None => Ok(buffered),
    }
}

/// Remove the caller's buffered messages by id.
///
/// Ids owned by another user are skipped. Any lookup failure, including an
/// unknown id, fails the whole request. Returns the ids actually removed.
pub async fn acknowledge(
    buffer: &Arc<dyn MessageBuffer>,
    station: &str,
    consumer: &str,
    owner: &str,
    ids: &[MessageId],
) -> ApiResult<Vec<MessageId>> {
    let mut acknowledged = Vec::with_capacity(ids.len());
    for &id in ids {
        let message = buffer.get_message_by_id(station, consumer, id).await?;
        if !message.is_owned_by(owner) {
            tracing::debug!(station, consumer, id, "Skipping acknowledgment of foreign message");
            continue;
        }
        buffer.remove_message(&message).await?;
        acknowledged.push(id);
    }
    with_metrics(|metrics| metrics.record_buffer_operation("remove", acknowledged.len()));
    Ok(acknowledged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::error::ErrorCode;
    use stationgate_test_utils::fixtures::{alice, bob, login, pending, NOW};
    use stationgate_test_utils::{InMemoryMessageBuffer, ManualClock, MockBroker};
    use std::time::Duration;

    struct Harness {
        broker: MockBroker,
        connections: ConnectionService,
        buffer: Arc<dyn MessageBuffer>,
    }

    async fn harness() -> Result<Harness, ApiError> {
        let broker = MockBroker::new();
        let connections = ConnectionService::new(
            Arc::new(broker.clone()),
            BrokerConfig::default(),
            Arc::new(ManualClock::new(NOW)),
        );
        connections.establish(&login(alice()), NOW + 600, None).await?;
        Ok(Harness {
            broker,
            connections,
            buffer: Arc::new(InMemoryMessageBuffer::new()),
        })
    }

    fn params(batch_size: usize) -> ConsumeParams {
        ConsumeParams {
            consumer_name: "c1".to_string(),
            consumer_group: "c1".to_string(),
            batch_size,
            max_wait: Duration::from_millis(100),
            max_deliveries: 10,
        }
    }

    #[tokio::test]
    async fn test_buffer_then_fetch_remainder() -> Result<(), ApiError> {
        let h = harness().await?;
        for payload in ["b1", "b2", "b3"] {
            h.buffer.add_message(pending("orders", "c1", "alice", payload)).await?;
        }
        h.broker.enqueue(
            "orders",
            vec![b"f1".to_vec(), b"f2".to_vec(), b"f3".to_vec()],
        );

        let caller = CallerContext::User(alice());
        let messages = consume_batch(&h.connections, &h.buffer, &caller, "orders", &params(5)).await?;

        let data: Vec<String> = messages.iter().map(|m| m.data_lossy()).collect();
        assert_eq!(data, vec!["b1", "b2", "b3", "f1", "f2"]);
        assert_eq!(h.broker.fetch_log().len(), 1);
        assert_eq!(h.broker.fetch_log()[0].batch_size, 2);
        assert_eq!(h.broker.ack_count(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_full_buffer_skips_broker() -> Result<(), ApiError> {
        let h = harness().await?;
        for payload in ["b1", "b2"] {
            h.buffer.add_message(pending("orders", "c1", "alice", payload)).await?;
        }

        let caller = CallerContext::User(alice());
        let messages = consume_batch(&h.connections, &h.buffer, &caller, "orders", &params(2)).await?;
        assert_eq!(messages.len(), 2);
        assert!(h.broker.fetch_log().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_fetched_messages_stay_buffered() -> Result<(), ApiError> {
        let h = harness().await?;
        h.broker.enqueue("orders", vec![b"f1".to_vec()]);

        let caller = CallerContext::User(alice());
        consume_batch(&h.connections, &h.buffer, &caller, "orders", &params(1)).await?;

        let buffered = h.buffer.get_messages("orders", "c1", 10).await?;
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].owner_username, "alice");
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_timeout_is_empty_result() -> Result<(), ApiError> {
        let h = harness().await?;
        h.broker.timeout_on_empty(true);

        let caller = CallerContext::User(alice());
        let messages = consume_batch(&h.connections, &h.buffer, &caller, "orders", &params(3)).await?;
        assert!(messages.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_ack_failure_still_buffers() -> Result<(), ApiError> {
        let h = harness().await?;
        h.broker.fail_acks(true);
        h.broker.enqueue("orders", vec![b"f1".to_vec()]);

        let caller = CallerContext::User(alice());
        let messages = consume_batch(&h.connections, &h.buffer, &caller, "orders", &params(1)).await?;
        assert_eq!(messages.len(), 1);
        assert_eq!(h.buffer.get_messages("orders", "c1", 10).await?.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_connection_fails() -> Result<(), ApiError> {
        let h = harness().await?;
        let caller = CallerContext::User(bob());
        let err = consume_batch(&h.connections, &h.buffer, &caller, "orders", &params(1))
            .await
            .expect_err("bob never authenticated");
        assert_eq!(err.code, ErrorCode::ConnectionUnavailable);
        Ok(())
    }

    #[tokio::test]
    async fn test_acknowledge_respects_owner() -> Result<(), ApiError> {
        let h = harness().await?;
        let mine = h.buffer.add_message(pending("orders", "c1", "alice", "a")).await?;
        let theirs = h.buffer.add_message(pending("orders", "c1", "bob", "b")).await?;

        let acked = acknowledge(&h.buffer, "orders", "c1", "alice", &[mine.id, theirs.id]).await?;
        assert_eq!(acked, vec![mine.id]);

        assert!(h.buffer.get_message_by_id("orders", "c1", mine.id).await.is_err());
        assert!(h.buffer.get_message_by_id("orders", "c1", theirs.id).await.is_ok());
        Ok(())
    }

    #[tokio::test]
    async fn test_acknowledge_unknown_id_fails() -> Result<(), ApiError> {
        let h = harness().await?;
        let err = acknowledge(&h.buffer, "orders", "c1", "alice", &[999])
            .await
            .expect_err("unknown id");
        assert_eq!(err.code, ErrorCode::MessageNotFound);
        Ok(())
    }

    #[tokio::test]
    async fn test_abandoned_request_still_buffers() -> Result<(), ApiError> {
        let h = harness().await?;
        h.broker.set_fetch_delay(Duration::from_millis(50));
        h.broker.enqueue("orders", vec![b"late".to_vec()]);

        let caller = CallerContext::User(alice());
        let consume_params = params(1);
        let request = consume_batch(&h.connections, &h.buffer, &caller, "orders", &consume_params);
        // Drop the request future while the fetch is in flight.
        let _ = tokio::time::timeout(Duration::from_millis(10), request).await;

        tokio::time::sleep(Duration::from_millis(150)).await;
        let buffered = h.buffer.get_messages("orders", "c1", 10).await?;
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].data_lossy(), "late");
        Ok(())
    }
}
