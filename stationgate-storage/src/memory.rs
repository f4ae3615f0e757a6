//! In-memory message buffer.

use crate::buffer::MessageBuffer;
use async_trait::async_trait;
use stationgate_core::{
    BufferError, BufferedMessage, GatewayResult, MessageId, PendingMessage,
};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct ConsumerQueue {
    next_id: MessageId,
    messages: VecDeque<BufferedMessage>,
}

type Stations = HashMap<String, HashMap<String, ConsumerQueue>>;

/// Process-local buffer: station -> consumer -> queue.
///
/// Ids start at 1 per (station, consumer) and keep growing even after the
/// queue drains, so an acknowledged id is never handed out again.
#[derive(Debug, Default)]
pub struct InMemoryMessageBuffer {
    stations: Mutex<Stations>,
}

impl InMemoryMessageBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Stations>, BufferError> {
        self.stations.lock().map_err(|_| BufferError::LockPoisoned)
    }

    /// Total buffered messages across every station.
    pub fn len(&self) -> GatewayResult<usize> {
        let stations = self.lock()?;
        Ok(stations
            .values()
            .flat_map(|consumers| consumers.values())
            .map(|queue| queue.messages.len())
            .sum())
    }

    pub fn is_empty(&self) -> GatewayResult<bool> {
        Ok(self.len()? == 0)
    }
}

fn not_found(station: &str, consumer: &str, id: MessageId) -> BufferError {
    BufferError::NotFound {
        station: station.to_string(),
        consumer: consumer.to_string(),
        id,
    }
}

#[async_trait]
impl MessageBuffer for InMemoryMessageBuffer {
    fn backend_name(&self) -> &'static str {
        "memory"
    }

    async fn get_messages(
        &self,
        station: &str,
        consumer: &str,
        limit: usize,
    ) -> GatewayResult<Vec<BufferedMessage>> {
        let stations = self.lock()?;
        Ok(stations
            .get(station)
            .and_then(|consumers| consumers.get(consumer))
            .map(|queue| queue.messages.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_message_by_id(
        &self,
        station: &str,
        consumer: &str,
        id: MessageId,
    ) -> GatewayResult<BufferedMessage> {
        let stations = self.lock()?;
        stations
            .get(station)
            .and_then(|consumers| consumers.get(consumer))
            .and_then(|queue| queue.messages.iter().find(|m| m.id == id))
            .cloned()
            .ok_or_else(|| not_found(station, consumer, id).into())
    }

    async fn add_message(&self, message: PendingMessage) -> GatewayResult<BufferedMessage> {
        let mut stations = self.lock()?;
        let queue = stations
            .entry(message.station.clone())
            .or_default()
            .entry(message.consumer.clone())
            .or_default();

        queue.next_id += 1;
        let buffered = message.into_buffered(queue.next_id);
        queue.messages.push_back(buffered.clone());
        Ok(buffered)
    }

    async fn remove_message(&self, message: &BufferedMessage) -> GatewayResult<()> {
        let mut stations = self.lock()?;
        let queue = stations
            .get_mut(&message.station)
            .and_then(|consumers| consumers.get_mut(&message.consumer))
            .ok_or_else(|| not_found(&message.station, &message.consumer, message.id))?;

        let position = queue
            .messages
            .iter()
            .position(|m| m.id == message.id)
            .ok_or_else(|| not_found(&message.station, &message.consumer, message.id))?;
        queue.messages.remove(position);
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: i64) -> GatewayResult<u64> {
        let mut stations = self.lock()?;
        let mut removed = 0u64;
        for queue in stations.values_mut().flat_map(|c| c.values_mut()) {
            let before = queue.messages.len();
            queue.messages.retain(|m| m.created_at >= cutoff);
            removed += (before - queue.messages.len()) as u64;
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use stationgate_core::GatewayError;

    fn pending(station: &str, consumer: &str, payload: &str, created_at: i64) -> PendingMessage {
        PendingMessage::new(station, consumer, "alice", payload.as_bytes().to_vec(), created_at)
    }

    #[tokio::test]
    async fn test_empty_buffer_returns_empty_list() -> GatewayResult<()> {
        let buffer = InMemoryMessageBuffer::new();
        assert!(buffer.get_messages("orders", "billing", 10).await?.is_empty());
        assert!(buffer.is_empty()?);
        Ok(())
    }

    #[tokio::test]
    async fn test_messages_returned_in_insertion_order() -> GatewayResult<()> {
        let buffer = InMemoryMessageBuffer::new();
        for payload in ["a", "b", "c"] {
            buffer.add_message(pending("orders", "billing", payload, 0)).await?;
        }

        let messages = buffer.get_messages("orders", "billing", 2).await?;
        let payloads: Vec<String> = messages.iter().map(|m| m.data_lossy()).collect();
        assert_eq!(payloads, vec!["a", "b"]);
        assert_eq!(messages[0].id, 1);
        assert_eq!(messages[1].id, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_ids_scoped_per_station_and_consumer() -> GatewayResult<()> {
        let buffer = InMemoryMessageBuffer::new();
        let first = buffer.add_message(pending("orders", "billing", "x", 0)).await?;
        let other_consumer = buffer.add_message(pending("orders", "audit", "y", 0)).await?;
        let other_station = buffer.add_message(pending("refunds", "billing", "z", 0)).await?;

        assert_eq!(first.id, 1);
        assert_eq!(other_consumer.id, 1);
        assert_eq!(other_station.id, 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_ids_not_reused_after_removal() -> GatewayResult<()> {
        let buffer = InMemoryMessageBuffer::new();
        let first = buffer.add_message(pending("orders", "billing", "x", 0)).await?;
        buffer.remove_message(&first).await?;
        let second = buffer.add_message(pending("orders", "billing", "y", 0)).await?;
        assert_eq!(second.id, 2);
        Ok(())
    }

    #[tokio::test]
    async fn test_get_by_id_and_remove() -> GatewayResult<()> {
        let buffer = InMemoryMessageBuffer::new();
        let added = buffer.add_message(pending("orders", "billing", "x", 0)).await?;

        let fetched = buffer.get_message_by_id("orders", "billing", added.id).await?;
        assert_eq!(fetched, added);

        buffer.remove_message(&fetched).await?;
        let missing = buffer.get_message_by_id("orders", "billing", added.id).await;
        assert!(matches!(
            missing,
            Err(GatewayError::Buffer(BufferError::NotFound { id: 1, .. }))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_remove_missing_is_not_found() {
        let buffer = InMemoryMessageBuffer::new();
        let ghost = pending("orders", "billing", "x", 0).into_buffered(7);
        let result = buffer.remove_message(&ghost).await;
        assert!(matches!(
            result,
            Err(GatewayError::Buffer(BufferError::NotFound { id: 7, .. }))
        ));
    }

    #[tokio::test]
    async fn test_purge_older_than() -> GatewayResult<()> {
        let buffer = InMemoryMessageBuffer::new();
        buffer.add_message(pending("orders", "billing", "old", 100)).await?;
        buffer.add_message(pending("orders", "audit", "old", 150)).await?;
        buffer.add_message(pending("orders", "billing", "new", 300)).await?;

        assert_eq!(buffer.purge_older_than(200).await?, 2);
        let remaining = buffer.get_messages("orders", "billing", 10).await?;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].data_lossy(), "new");
        assert_eq!(buffer.len()?, 1);
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_ids_strictly_increase(count in 1usize..40, removals in proptest::collection::vec(any::<bool>(), 40)) {
            let rt = tokio::runtime::Builder::new_current_thread()
                .build()
                .map_err(|e| TestCaseError::fail(e.to_string()))?;
            rt.block_on(async {
                let buffer = InMemoryMessageBuffer::new();
                let mut last = 0;
                for i in 0..count {
                    let added = buffer
                        .add_message(pending("s", "c", "p", 0))
                        .await
                        .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    prop_assert!(added.id > last);
                    last = added.id;
                    if removals[i] {
                        buffer
                            .remove_message(&added)
                            .await
                            .map_err(|e| TestCaseError::fail(e.to_string()))?;
                    }
                }
                let listed = buffer
                    .get_messages("s", "c", usize::MAX)
                    .await
                    .map_err(|e| TestCaseError::fail(e.to_string()))?;
                prop_assert!(listed.windows(2).all(|w| w[0].id < w[1].id));
                Ok(())
            })?;
        }
    }
}
