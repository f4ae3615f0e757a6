//! Buffer Retention Background Task
//!
//! Only runs when a maximum buffer age is configured. Each cycle deletes
//! buffered messages older than that age, acknowledged or not.

use crate::telemetry::metrics::with_metrics;
use stationgate_core::Clock;
use stationgate_storage::MessageBuffer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Default)]
pub struct BufferRetentionMetrics {
    pub messages_purged: AtomicU64,
    pub cycles: AtomicU64,
    pub errors: AtomicU64,
}

impl BufferRetentionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BufferRetentionSnapshot {
        BufferRetentionSnapshot {
            messages_purged: self.messages_purged.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferRetentionSnapshot {
    pub messages_purged: u64,
    pub cycles: u64,
    pub errors: u64,
}

pub async fn buffer_retention_task(
    buffer: Arc<dyn MessageBuffer>,
    max_age: Duration,
    check_interval: Duration,
    clock: Arc<dyn Clock>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<BufferRetentionMetrics> {
    let metrics = Arc::new(BufferRetentionMetrics::new());

    let mut retention_interval = interval(check_interval);
    retention_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        backend = buffer.backend_name(),
        max_age_secs = max_age.as_secs(),
        interval_secs = check_interval.as_secs(),
        "Buffer retention task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Buffer retention task shutting down");
                    break;
                }
            }

            _ = retention_interval.tick() => {
                purge_once(buffer.as_ref(), max_age, clock.as_ref(), &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        messages_purged = snapshot.messages_purged,
        cycles = snapshot.cycles,
        errors = snapshot.errors,
        "Buffer retention task completed"
    );

    metrics
}

async fn purge_once(
    buffer: &dyn MessageBuffer,
    max_age: Duration,
    clock: &dyn Clock,
    metrics: &BufferRetentionMetrics,
) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    let max_age_secs = i64::try_from(max_age.as_secs()).unwrap_or(i64::MAX);
    let cutoff = clock.now_epoch_secs().saturating_sub(max_age_secs);

    match buffer.purge_older_than(cutoff).await {
        Ok(0) => tracing::trace!("Buffer retention cycle found nothing to purge"),
        Ok(count) => {
            metrics.messages_purged.fetch_add(count, Ordering::Relaxed);
            with_metrics(|m| m.record_buffer_operation("purge", count as usize));
            tracing::warn!(count, cutoff, "Purged unacknowledged buffered messages past retention");
        }
        Err(e) => {
            metrics.errors.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, "Buffer retention cycle failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stationgate_core::PendingMessage;
    use stationgate_test_utils::fixtures::NOW;
    use stationgate_test_utils::{InMemoryMessageBuffer, ManualClock};

    #[tokio::test]
    async fn test_purges_only_old_messages() -> Result<(), stationgate_core::GatewayError> {
        let buffer = InMemoryMessageBuffer::new();
        buffer
            .add_message(PendingMessage::new("s", "c", "alice", b"old".to_vec(), NOW - 600))
            .await?;
        buffer
            .add_message(PendingMessage::new("s", "c", "alice", b"new".to_vec(), NOW - 10))
            .await?;

        let clock = ManualClock::new(NOW);
        let metrics = BufferRetentionMetrics::new();
        purge_once(&buffer, Duration::from_secs(300), &clock, &metrics).await;

        let remaining = buffer.get_messages("s", "c", 10).await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].data_lossy(), "new");
        assert_eq!(metrics.snapshot().messages_purged, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(buffer_retention_task(
            Arc::new(InMemoryMessageBuffer::new()),
            Duration::from_secs(60),
            Duration::from_millis(10),
            Arc::new(ManualClock::new(NOW)),
            shutdown_rx,
        ));
        tokio::time::sleep(Duration::from_millis(25)).await;
        let _ = shutdown_tx.send(true);
        let metrics = handle.await.expect("retention task should not panic");
        assert!(metrics.snapshot().cycles >= 1);
    }
}
