//! PostgreSQL message buffer.
//!
//! One `messages` table shared by every gateway instance. Ids come from a
//! `BIGSERIAL`, which grows globally and therefore also grows within every
//! (station, consumer) pair.

use crate::buffer::MessageBuffer;
use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, PoolConfig, RecyclingMethod, Runtime};
use stationgate_core::{
    BufferError, BufferedMessage, GatewayResult, MessageId, PendingMessage,
};
use std::time::Duration;
use tokio_postgres::{NoTls, Row};

// ============================================================================
// CONNECTION POOL CONFIGURATION
// ============================================================================

/// PostgreSQL connection settings for the buffer.
#[derive(Debug, Clone)]
pub struct PgBufferConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: String,
    pub max_size: usize,
    /// How long to wait for a pooled connection.
    pub timeout: Duration,
}

impl Default for PgBufferConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "stationgate".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl PgBufferConfig {
    /// Read `STATIONGATE_DB_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("STATIONGATE_DB_HOST").unwrap_or(defaults.host),
            port: std::env::var("STATIONGATE_DB_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            dbname: std::env::var("STATIONGATE_DB_NAME").unwrap_or(defaults.dbname),
            user: std::env::var("STATIONGATE_DB_USER").unwrap_or(defaults.user),
            password: std::env::var("STATIONGATE_DB_PASSWORD").unwrap_or_default(),
            max_size: std::env::var("STATIONGATE_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: std::env::var("STATIONGATE_DB_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        }
    }

    pub fn create_pool(&self) -> GatewayResult<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.clone());

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let mut pool_config = PoolConfig::new(self.max_size);
        pool_config.timeouts.wait = Some(self.timeout);
        cfg.pool = Some(pool_config);

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| storage("create_pool", e).into())
    }
}

// ============================================================================
// SCHEMA
// ============================================================================

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS messages (
    id            BIGSERIAL PRIMARY KEY,
    station_name  TEXT   NOT NULL,
    consumer_name TEXT   NOT NULL,
    username      TEXT   NOT NULL,
    data          BYTEA  NOT NULL,
    created_at    BIGINT NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS messages_station_consumer_id_idx
    ON messages (station_name, consumer_name, id);
";

const SELECT_COLUMNS: &str = "id, station_name, consumer_name, username, data, created_at";

fn storage(operation: &str, err: impl std::fmt::Display) -> BufferError {
    BufferError::Storage {
        operation: operation.to_string(),
        reason: err.to_string(),
    }
}

fn row_to_message(row: &Row) -> BufferedMessage {
    BufferedMessage {
        id: row.get("id"),
        station: row.get("station_name"),
        consumer: row.get("consumer_name"),
        owner_username: row.get("username"),
        payload: row.get("data"),
        created_at: row.get("created_at"),
    }
}

// ============================================================================
// BUFFER
// ============================================================================

/// Buffer backed by the `messages` table.
#[derive(Clone)]
pub struct PgMessageBuffer {
    pool: Pool,
}

impl PgMessageBuffer {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build the pool, check connectivity, and create the schema.
    pub async fn connect(config: &PgBufferConfig) -> GatewayResult<Self> {
        let buffer = Self::new(config.create_pool()?);
        buffer.migrate().await?;
        Ok(buffer)
    }

    /// Create the table and index if missing.
    pub async fn migrate(&self) -> GatewayResult<()> {
        let conn = self.get_conn("migrate").await?;
        conn.batch_execute(SCHEMA)
            .await
            .map_err(|e| storage("migrate", e))?;
        tracing::info!("Message buffer schema ready");
        Ok(())
    }

    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    async fn get_conn(&self, operation: &str) -> GatewayResult<deadpool_postgres::Object> {
        self.pool
            .get()
            .await
            .map_err(|e| storage(operation, e).into())
    }
}

#[async_trait]
impl MessageBuffer for PgMessageBuffer {
    fn backend_name(&self) -> &'static str {
        "postgres"
    }

    async fn get_messages(
        &self,
        station: &str,
        consumer: &str,
        limit: usize,
    ) -> GatewayResult<Vec<BufferedMessage>> {
        let conn = self.get_conn("get_messages").await?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = conn
            .query(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM messages \
                     WHERE station_name = $1 AND consumer_name = $2 \
                     ORDER BY id ASC LIMIT $3"
                ),
                &[&station, &consumer, &limit],
            )
            .await
            .map_err(|e| storage("get_messages", e))?;
        Ok(rows.iter().map(row_to_message).collect())
    }

    async fn get_message_by_id(
        &self,
        station: &str,
        consumer: &str,
        id: MessageId,
    ) -> GatewayResult<BufferedMessage> {
        let conn = self.get_conn("get_message_by_id").await?;
        let row = conn
            .query_opt(
                &format!(
                    "SELECT {SELECT_COLUMNS} FROM messages \
                     WHERE station_name = $1 AND consumer_name = $2 AND id = $3"
                ),
                &[&station, &consumer, &id],
            )
            .await
            .map_err(|e| storage("get_message_by_id", e))?;

        row.as_ref().map(row_to_message).ok_or_else(|| {
            BufferError::NotFound {
                station: station.to_string(),
                consumer: consumer.to_string(),
                id,
            }
            .into()
        })
    }

    async fn add_message(&self, message: PendingMessage) -> GatewayResult<BufferedMessage> {
        let conn = self.get_conn("add_message").await?;
        let row = conn
            .query_one(
                "INSERT INTO messages (station_name, consumer_name, username, data, created_at) \
                 VALUES ($1, $2, $3, $4, $5) RETURNING id",
                &[
                    &message.station,
                    &message.consumer,
                    &message.owner_username,
                    &message.payload,
                    &message.created_at,
                ],
            )
            .await
            .map_err(|e| storage("add_message", e))?;
        let id: i64 = row.get("id");
        Ok(message.into_buffered(id))
    }

    async fn remove_message(&self, message: &BufferedMessage) -> GatewayResult<()> {
        let conn = self.get_conn("remove_message").await?;
        let deleted = conn
            .execute(
                "DELETE FROM messages \
                 WHERE station_name = $1 AND consumer_name = $2 AND id = $3",
                &[&message.station, &message.consumer, &message.id],
            )
            .await
            .map_err(|e| storage("remove_message", e))?;

        if deleted == 0 {
            return Err(BufferError::NotFound {
                station: message.station.clone(),
                consumer: message.consumer.clone(),
                id: message.id,
            }
            .into());
        }
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: i64) -> GatewayResult<u64> {
        let conn = self.get_conn("purge_older_than").await?;
        let deleted = conn
            .execute("DELETE FROM messages WHERE created_at < $1", &[&cutoff])
            .await
            .map_err(|e| storage("purge_older_than", e))?;
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PgBufferConfig::default();
        assert_eq!(config.port, 5432);
        assert_eq!(config.dbname, "stationgate");
        assert_eq!(config.max_size, 16);
    }

    #[test]
    fn test_schema_declares_lookup_index() {
        assert!(SCHEMA.contains("CREATE TABLE IF NOT EXISTS messages"));
        assert!(SCHEMA.contains("(station_name, consumer_name, id)"));
    }

    #[test]
    fn test_storage_error_carries_operation() {
        let err = storage("add_message", "connection refused");
        assert_eq!(
            err,
            BufferError::Storage {
                operation: "add_message".to_string(),
                reason: "connection refused".to_string()
            }
        );
    }
}
