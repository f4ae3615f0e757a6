//! Buffer backend selection.

use crate::buffer::MessageBuffer;
use crate::memory::InMemoryMessageBuffer;
use crate::postgres::{PgBufferConfig, PgMessageBuffer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Default interval between retention sweeps.
pub const DEFAULT_RETENTION_INTERVAL_SECS: u64 = 300;

/// Which buffer implementation to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferBackendKind {
    Memory,
    Postgres,
}

/// Buffer settings, read once at startup.
#[derive(Debug, Clone)]
pub struct BufferConfig {
    pub backend: BufferBackendKind,
    pub postgres: PgBufferConfig,
    /// Buffered messages older than this are purged. `None` keeps them until
    /// acknowledged.
    pub max_age: Option<Duration>,
    pub retention_interval: Duration,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            backend: BufferBackendKind::Memory,
            postgres: PgBufferConfig::default(),
            max_age: None,
            retention_interval: Duration::from_secs(DEFAULT_RETENTION_INTERVAL_SECS),
        }
    }
}

impl BufferConfig {
    pub fn from_env() -> Self {
        let use_db = std::env::var("STATIONGATE_USE_DB_CACHE")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            backend: if use_db {
                BufferBackendKind::Postgres
            } else {
                BufferBackendKind::Memory
            },
            postgres: PgBufferConfig::from_env(),
            max_age: std::env::var("STATIONGATE_BUFFER_MAX_AGE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs),
            retention_interval: Duration::from_secs(
                std::env::var("STATIONGATE_BUFFER_RETENTION_INTERVAL_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RETENTION_INTERVAL_SECS),
            ),
        }
    }
}

/// Open the configured backend.
///
/// A PostgreSQL backend that cannot be reached or migrated is replaced by the
/// in-memory backend; the choice is made here once and never revisited.
pub async fn open_message_buffer(config: &BufferConfig) -> Arc<dyn MessageBuffer> {
    match config.backend {
        BufferBackendKind::Memory => {
            tracing::info!(backend = "memory", "Message buffer opened");
            Arc::new(InMemoryMessageBuffer::new())
        }
        BufferBackendKind::Postgres => match PgMessageBuffer::connect(&config.postgres).await {
            Ok(buffer) => {
                tracing::info!(
                    backend = "postgres",
                    host = %config.postgres.host,
                    dbname = %config.postgres.dbname,
                    "Message buffer opened"
                );
                Arc::new(buffer)
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    host = %config.postgres.host,
                    "PostgreSQL buffer unavailable, falling back to in-memory buffer"
                );
                Arc::new(InMemoryMessageBuffer::new())
            }
        },
    }
}
