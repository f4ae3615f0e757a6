//! Connection Reaper Background Task
//!
//! Periodically evicts cached broker connections that are disconnected or
//! past their expiry, closes them, and drops expired refresh sessions.
//! Eviction is best effort: a stale entry only makes the next request for
//! that identity fail fast until it re-authenticates.

use crate::constants::DEFAULT_REAPER_INTERVAL_SECS;
use crate::services::ConnectionService;
use crate::telemetry::metrics::with_metrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConnectionReaperConfig {
    /// How often to scan the cache (default: 30 seconds)
    pub interval: Duration,
}

impl Default for ConnectionReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
        }
    }
}

impl ConnectionReaperConfig {
    /// # Environment Variables
    /// - `STATIONGATE_REAPER_INTERVAL_SECS`: scan interval (default: 30)
    pub fn from_env() -> Self {
        let interval = Duration::from_secs(
            std::env::var("STATIONGATE_REAPER_INTERVAL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|secs| *secs > 0)
                .unwrap_or(DEFAULT_REAPER_INTERVAL_SECS),
        );
        Self { interval }
    }
}

// ============================================================================
// METRICS
// ============================================================================

#[derive(Debug, Default)]
pub struct ConnectionReaperMetrics {
    pub connections_evicted: AtomicU64,
    pub close_failures: AtomicU64,
    pub sessions_purged: AtomicU64,
    pub cycles: AtomicU64,
}

impl ConnectionReaperMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ConnectionReaperSnapshot {
        ConnectionReaperSnapshot {
            connections_evicted: self.connections_evicted.load(Ordering::Relaxed),
            close_failures: self.close_failures.load(Ordering::Relaxed),
            sessions_purged: self.sessions_purged.load(Ordering::Relaxed),
            cycles: self.cycles.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionReaperSnapshot {
    pub connections_evicted: u64,
    pub close_failures: u64,
    pub sessions_purged: u64,
    pub cycles: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Runs until the shutdown signal is received and returns the metrics it
/// collected.
pub async fn connection_reaper_task(
    connections: Arc<ConnectionService>,
    config: ConnectionReaperConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<ConnectionReaperMetrics> {
    let metrics = Arc::new(ConnectionReaperMetrics::new());

    let mut reap_interval = interval(config.interval);
    reap_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        interval_secs = config.interval.as_secs(),
        "Connection reaper task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Connection reaper task shutting down");
                    break;
                }
            }

            _ = reap_interval.tick() => {
                reap_once(&connections, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        connections_evicted = snapshot.connections_evicted,
        close_failures = snapshot.close_failures,
        sessions_purged = snapshot.sessions_purged,
        cycles = snapshot.cycles,
        "Connection reaper task completed"
    );

    metrics
}

/// One reaper pass.
pub async fn reap_once(connections: &ConnectionService, metrics: &ConnectionReaperMetrics) {
    metrics.cycles.fetch_add(1, Ordering::Relaxed);
    let report = connections.reap().await;

    metrics
        .connections_evicted
        .fetch_add(report.evicted as u64, Ordering::Relaxed);
    metrics
        .close_failures
        .fetch_add(report.close_failures as u64, Ordering::Relaxed);
    metrics
        .sessions_purged
        .fetch_add(report.sessions_purged as u64, Ordering::Relaxed);
    with_metrics(|m| m.record_reaped(report.evicted));

    if report.evicted > 0 || report.sessions_purged > 0 {
        tracing::info!(
            evicted = report.evicted,
            close_failures = report.close_failures,
            sessions_purged = report.sessions_purged,
            remaining = connections.cache().len(),
            "Connection reaper cycle completed"
        );
    } else {
        tracing::trace!("Connection reaper cycle completed with nothing to evict");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BrokerConfig;
    use crate::error::ApiError;
    use crate::test_support::{EnvVarGuard, ENV_MUTEX};
    use stationgate_test_utils::fixtures::{alice, bob, login, NOW};
    use stationgate_test_utils::{ManualClock, MockBroker};

    #[test]
    fn test_config_default() {
        let config = ConnectionReaperConfig::default();
        assert_eq!(
            config.interval,
            Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS)
        );
    }

    #[test]
    fn test_config_from_env() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _interval = EnvVarGuard::set("STATIONGATE_REAPER_INTERVAL_SECS", Some("5"));
        assert_eq!(
            ConnectionReaperConfig::from_env().interval,
            Duration::from_secs(5)
        );
    }

    #[test]
    fn test_config_from_env_ignores_zero() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _interval = EnvVarGuard::set("STATIONGATE_REAPER_INTERVAL_SECS", Some("0"));
        assert_eq!(
            ConnectionReaperConfig::from_env().interval,
            Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS)
        );
    }

    #[tokio::test]
    async fn test_reap_once_evicts_expired_and_disconnected() -> Result<(), ApiError> {
        let broker = MockBroker::new();
        let clock = ManualClock::new(NOW);
        let connections = ConnectionService::new(
            Arc::new(broker.clone()),
            BrokerConfig::default(),
            Arc::new(clock.clone()),
        );
        connections.establish(&login(alice()), NOW + 10, None).await?;
        connections.establish(&login(bob()), NOW + 600, None).await?;

        let metrics = ConnectionReaperMetrics::new();
        reap_once(&connections, &metrics).await;
        assert_eq!(connections.cache().len(), 2);

        clock.advance(11);
        reap_once(&connections, &metrics).await;
        assert!(connections.cache().get(&alice()).is_none());
        assert!(connections.cache().get(&bob()).is_some());

        broker.disconnect_all();
        reap_once(&connections, &metrics).await;
        assert!(connections.cache().is_empty());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections_evicted, 2);
        assert_eq!(snapshot.cycles, 3);
        Ok(())
    }

    #[tokio::test]
    async fn test_task_stops_on_shutdown() {
        let connections = Arc::new(ConnectionService::new(
            Arc::new(MockBroker::new()),
            BrokerConfig::default(),
            Arc::new(ManualClock::new(NOW)),
        ));
        let config = ConnectionReaperConfig {
            interval: Duration::from_millis(10),
        };
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(connection_reaper_task(connections, config, shutdown_rx));

        tokio::time::sleep(Duration::from_millis(35)).await;
        let _ = shutdown_tx.send(true);
        let metrics = handle.await.expect("reaper task should not panic");
        assert!(metrics.snapshot().cycles >= 1);
    }
}
