//! Message buffer capability trait.

use async_trait::async_trait;
use stationgate_core::{BufferedMessage, GatewayResult, MessageId, PendingMessage};

/// Storage for consumed-but-unacknowledged messages, keyed by
/// (station, consumer, id).
///
/// Every backend returns messages of one (station, consumer) pair in
/// insertion order and assigns ids that only ever grow within that pair.
#[async_trait]
pub trait MessageBuffer: Send + Sync {
    /// Short backend name for logs and monitoring.
    fn backend_name(&self) -> &'static str;

    /// Up to `limit` buffered messages in insertion order. Empty when nothing
    /// is buffered.
    async fn get_messages(
        &self,
        station: &str,
        consumer: &str,
        limit: usize,
    ) -> GatewayResult<Vec<BufferedMessage>>;

    /// Fails with `BufferError::NotFound` when the id is not buffered.
    async fn get_message_by_id(
        &self,
        station: &str,
        consumer: &str,
        id: MessageId,
    ) -> GatewayResult<BufferedMessage>;

    /// Assign an id scoped to (station, consumer) and persist the message.
    async fn add_message(&self, message: PendingMessage) -> GatewayResult<BufferedMessage>;

    /// Fails with `BufferError::NotFound` when the message is not buffered.
    async fn remove_message(&self, message: &BufferedMessage) -> GatewayResult<()>;

    /// Delete every message created before `cutoff` (Unix seconds).
    /// Returns how many were deleted.
    async fn purge_older_than(&self, cutoff: i64) -> GatewayResult<u64>;
}
