//! Connection Sync Listener
//!
//! Subscribes to the control-plane subject and replicates connections other
//! gateway instances cached. The subscription is re-established after the
//! stream ends or subscribing fails, until shutdown.
//!
//! Events are applied one at a time so a revocation never overtakes the
//! update that registered its session. Each apply is bounded by a timeout
//! and abandoned on shutdown.

use crate::constants::{
    DEFAULT_SYNC_APPLY_TIMEOUT_MS, DEFAULT_SYNC_RESUBSCRIBE_DELAY_MS, DEFAULT_SYNC_SUBJECT,
};
use crate::services::{ConnectionService, SyncOutcome};
use crate::telemetry::metrics::with_metrics;
use futures_util::StreamExt;
use stationgate_core::{ControlEvent, ControlPlane};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConnectionSyncConfig {
    /// Whether connections are broadcast to and replicated from other
    /// instances (default: true)
    pub enabled: bool,

    /// Control-plane subject shared by the fleet
    pub subject: String,

    /// Pause before subscribing again after the subscription ends
    pub resubscribe_delay: Duration,

    /// Upper bound on applying a single event
    pub apply_timeout: Duration,
}

impl Default for ConnectionSyncConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            subject: DEFAULT_SYNC_SUBJECT.to_string(),
            resubscribe_delay: Duration::from_millis(DEFAULT_SYNC_RESUBSCRIBE_DELAY_MS),
            apply_timeout: Duration::from_millis(DEFAULT_SYNC_APPLY_TIMEOUT_MS),
        }
    }
}

impl ConnectionSyncConfig {
    /// # Environment Variables
    /// - `STATIONGATE_CLUSTER_SYNC_ENABLED` (default: true)
    /// - `STATIONGATE_SYNC_SUBJECT` (default: `$gateway.control.connections`)
    /// - `STATIONGATE_SYNC_RESUBSCRIBE_DELAY_MS` (default: 2000)
    /// - `STATIONGATE_SYNC_APPLY_TIMEOUT_MS` (default: 10000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: std::env::var("STATIONGATE_CLUSTER_SYNC_ENABLED")
                .ok()
                .map(|s| s.trim().to_lowercase() != "false" && s.trim() != "0")
                .unwrap_or(defaults.enabled),
            subject: std::env::var("STATIONGATE_SYNC_SUBJECT")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.subject),
            resubscribe_delay: std::env::var("STATIONGATE_SYNC_RESUBSCRIBE_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.resubscribe_delay),
            apply_timeout: std::env::var("STATIONGATE_SYNC_APPLY_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|ms: &u64| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(defaults.apply_timeout),
        }
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct ConnectionSyncMetrics {
    pub events_applied: AtomicU64,
    pub events_duplicate: AtomicU64,
    pub sessions_revoked: AtomicU64,
    pub events_malformed: AtomicU64,
    pub events_failed: AtomicU64,
    pub events_timed_out: AtomicU64,
    pub subscriptions: AtomicU64,
}

impl ConnectionSyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConnectionSyncSnapshot {
        ConnectionSyncSnapshot {
            events_applied: self.events_applied.load(Ordering::Relaxed),
            events_duplicate: self.events_duplicate.load(Ordering::Relaxed),
            sessions_revoked: self.sessions_revoked.load(Ordering::Relaxed),
            events_malformed: self.events_malformed.load(Ordering::Relaxed),
            events_failed: self.events_failed.load(Ordering::Relaxed),
            events_timed_out: self.events_timed_out.load(Ordering::Relaxed),
            subscriptions: self.subscriptions.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSyncSnapshot {
    pub events_applied: u64,
    pub events_duplicate: u64,
    pub sessions_revoked: u64,
    pub events_malformed: u64,
    pub events_failed: u64,
    pub events_timed_out: u64,
    pub subscriptions: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Listen for connection updates until shutdown. Errors are logged and never
/// end the task.
pub async fn connection_sync_task(
    connections: Arc<ConnectionService>,
    control_plane: Arc<dyn ControlPlane>,
    config: ConnectionSyncConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ConnectionSyncMetrics> {
    let metrics = Arc::new(ConnectionSyncMetrics::new());

    tracing::info!(subject = %config.subject, "Connection sync task started");

    'outer: loop {
        match control_plane.subscribe(&config.subject).await {
            Ok(mut stream) => {
                metrics.subscriptions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(subject = %config.subject, "Subscribed to connection updates");

                loop {
                    tokio::select! {
                        _ = shutdown_rx.changed() => {
                            if *shutdown_rx.borrow() {
                                break 'outer;
                            }
                        }

                        next = stream.next() => match next {
                            Some(payload) => {
                                let apply = tokio::time::timeout(
                                    config.apply_timeout,
                                    handle_payload(&connections, &payload, &metrics),
                                );
                                tokio::select! {
                                    _ = shutdown_rx.changed() => {
                                        if *shutdown_rx.borrow() {
                                            break 'outer;
                                        }
                                    }
                                    applied = apply => {
                                        if applied.is_err() {
                                            metrics.events_timed_out.fetch_add(1, Ordering::Relaxed);
                                            with_metrics(|m| m.record_sync_event("timed_out"));
                                            tracing::warn!(
                                                timeout_ms = config.apply_timeout.as_millis() as u64,
                                                "Abandoned slow connection update"
                                            );
                                        }
                                    }
                                }
                            }
                            None => {
                                tracing::warn!(subject = %config.subject, "Connection update subscription ended");
                                break;
                            }
                        },
                    }
                }
            }
            Err(e) => {
                tracing::error!(subject = %config.subject, error = %e, "Failed to subscribe to connection updates");
            }
        }

        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break 'outer;
                }
            }
            _ = tokio::time::sleep(config.resubscribe_delay) => {}
        }
    }

    tracing::info!("Connection sync task shutting down");
    let snapshot = metrics.snapshot();
    tracing::info!(
        events_applied = snapshot.events_applied,
        events_duplicate = snapshot.events_duplicate,
        sessions_revoked = snapshot.sessions_revoked,
        events_malformed = snapshot.events_malformed,
        events_failed = snapshot.events_failed,
        events_timed_out = snapshot.events_timed_out,
        subscriptions = snapshot.subscriptions,
        "Connection sync task completed"
    );

    metrics
}

async fn handle_payload(
    connections: &ConnectionService,
    payload: &[u8],
    metrics: &ConnectionSyncMetrics,
) {
    let event = match ControlEvent::decode(payload) {
        Ok(event) => event,
        Err(e) => {
            metrics.events_malformed.fetch_add(1, Ordering::Relaxed);
            with_metrics(|m| m.record_sync_event("malformed"));
            tracing::warn!(error = %e, "Ignoring malformed connection update");
            return;
        }
    };

    let subject = match &event {
        ControlEvent::Connection(event) => event.identity.to_string(),
        ControlEvent::SessionRevoked { session_id } => session_id.clone(),
    };
    match connections.apply_control_event(event).await {
        Ok(outcome) => {
            let counter = match outcome {
                SyncOutcome::Applied => &metrics.events_applied,
                SyncOutcome::Duplicate => &metrics.events_duplicate,
                SyncOutcome::Revoked => &metrics.sessions_revoked,
            };
            counter.fetch_add(1, Ordering::Relaxed);
            with_metrics(|m| m.record_sync_event(outcome.as_str()));
        }
        Err(e) => {
            metrics.events_failed.fetch_add(1, Ordering::Relaxed);
            with_metrics(|m| m.record_sync_event("failed"));
            tracing::warn!(subject = %subject, error = %e, "Failed to apply control event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::test_support::{EnvVarGuard, ENV_MUTEX};
    use stationgate_test_utils::fixtures::{alice, sync_event, NOW};
    use stationgate_test_utils::{ManualClock, MockBroker, MockControlPlane};

    #[test]
    fn test_config_default() {
        let config = ConnectionSyncConfig::default();
        assert!(config.enabled);
        assert_eq!(config.subject, DEFAULT_SYNC_SUBJECT);
    }

    #[test]
    fn test_config_from_env() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _enabled = EnvVarGuard::set("STATIONGATE_CLUSTER_SYNC_ENABLED", Some("false"));
        let _subject = EnvVarGuard::set("STATIONGATE_SYNC_SUBJECT", Some("fleet.sync"));
        let _delay = EnvVarGuard::set("STATIONGATE_SYNC_RESUBSCRIBE_DELAY_MS", Some("50"));
        let _timeout = EnvVarGuard::set("STATIONGATE_SYNC_APPLY_TIMEOUT_MS", Some("250"));

        let config = ConnectionSyncConfig::from_env();
        assert!(!config.enabled);
        assert_eq!(config.subject, "fleet.sync");
        assert_eq!(config.resubscribe_delay, Duration::from_millis(50));
        assert_eq!(config.apply_timeout, Duration::from_millis(250));
    }

    fn fast_config() -> ConnectionSyncConfig {
        ConnectionSyncConfig {
            enabled: true,
            subject: "test.sync".to_string(),
            resubscribe_delay: Duration::from_millis(10),
            apply_timeout: Duration::from_secs(5),
        }
    }

    async fn wait_for_subscriptions(control_plane: &MockControlPlane, count: usize) {
        for _ in 0..100 {
            if control_plane.subscription_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    #[tokio::test]
    async fn test_replays_events_idempotently() -> Result<(), crate::error::ApiError> {
        let broker = MockBroker::new();
        let connections = Arc::new(ConnectionService::new(
            Arc::new(broker.clone()),
            BrokerConfig::default(),
            Arc::new(ManualClock::new(NOW)),
        ));
        let control_plane = MockControlPlane::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(connection_sync_task(
            connections.clone(),
            Arc::new(control_plane.clone()),
            fast_config(),
            shutdown_rx,
        ));
        wait_for_subscriptions(&control_plane, 1).await;

        let payload = sync_event(alice(), NOW + 60).encode()?;
        control_plane.publish("test.sync", payload.clone()).await?;
        control_plane.publish("test.sync", payload).await?;
        control_plane.publish("test.sync", b"not json".to_vec()).await?;
        tokio::time::sleep(Duration::from_millis(50)).await;

        let _ = shutdown_tx.send(true);
        let metrics = handle.await.expect("sync task should not panic").snapshot();

        assert_eq!(metrics.events_applied, 1);
        assert_eq!(metrics.events_duplicate, 1);
        assert_eq!(metrics.events_malformed, 1);
        assert_eq!(broker.connect_count(), 1);
        assert_eq!(connections.cache().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_slow_apply_times_out_and_later_events_proceed(
    ) -> Result<(), crate::error::ApiError> {
        let broker = MockBroker::new();
        broker.set_connect_delay(Duration::from_secs(30));
        let connections = Arc::new(ConnectionService::new(
            Arc::new(broker.clone()),
            BrokerConfig::default(),
            Arc::new(ManualClock::new(NOW)),
        ));
        let control_plane = MockControlPlane::new();
        let config = ConnectionSyncConfig {
            apply_timeout: Duration::from_millis(20),
            ..fast_config()
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(connection_sync_task(
            connections.clone(),
            Arc::new(control_plane.clone()),
            config,
            shutdown_rx,
        ));
        wait_for_subscriptions(&control_plane, 1).await;

        let update = sync_event(alice(), NOW + 60).encode()?;
        let revocation = ControlEvent::revoke_session("sid-1").encode()?;
        control_plane.publish("test.sync", update).await?;
        control_plane.publish("test.sync", revocation).await?;
        tokio::time::sleep(Duration::from_millis(150)).await;

        let _ = shutdown_tx.send(true);
        let metrics = handle.await.expect("sync task should not panic").snapshot();

        assert_eq!(metrics.events_timed_out, 1);
        assert_eq!(metrics.sessions_revoked, 1);
        assert!(connections.cache().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_pending_apply() -> Result<(), crate::error::ApiError> {
        let broker = MockBroker::new();
        broker.set_connect_delay(Duration::from_secs(30));
        let connections = Arc::new(ConnectionService::new(
            Arc::new(broker.clone()),
            BrokerConfig::default(),
            Arc::new(ManualClock::new(NOW)),
        ));
        let control_plane = MockControlPlane::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(connection_sync_task(
            connections,
            Arc::new(control_plane.clone()),
            fast_config(),
            shutdown_rx,
        ));
        wait_for_subscriptions(&control_plane, 1).await;

        control_plane
            .publish("test.sync", sync_event(alice(), NOW + 60).encode()?)
            .await?;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let _ = shutdown_tx.send(true);
        let finished = tokio::time::timeout(Duration::from_secs(1), handle).await;
        assert!(finished.is_ok(), "sync task should stop while a connect is pending");
        Ok(())
    }

    #[tokio::test]
    async fn test_resubscribes_after_stream_ends() {
        let connections = Arc::new(ConnectionService::new(
            Arc::new(MockBroker::new()),
            BrokerConfig::default(),
            Arc::new(ManualClock::new(NOW)),
        ));
        let control_plane = MockControlPlane::new();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(connection_sync_task(
            connections,
            Arc::new(control_plane.clone()),
            fast_config(),
            shutdown_rx,
        ));
        wait_for_subscriptions(&control_plane, 1).await;

        control_plane.drop_subscriptions();
        wait_for_subscriptions(&control_plane, 2).await;

        let _ = shutdown_tx.send(true);
        let metrics = handle.await.expect("sync task should not panic").snapshot();
        assert!(metrics.subscriptions >= 2);
    }
}
