//! Consumed-but-unacknowledged messages held by the gateway.

use serde::{Deserialize, Serialize};

/// Buffer-assigned message id, monotonic per (station, consumer).
pub type MessageId = i64;

/// A message fetched from the broker and held until the client acknowledges it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub id: MessageId,
    pub station: String,
    pub consumer: String,
    /// Normalized username of the consumer that fetched the message.
    pub owner_username: String,
    pub payload: Vec<u8>,
    /// Unix seconds when the message entered the buffer.
    pub created_at: i64,
}

impl BufferedMessage {
    /// Whether `username` (already normalized) may acknowledge this message.
    pub fn is_owned_by(&self, username: &str) -> bool {
        self.owner_username == username
    }

    /// Payload rendered for JSON responses.
    pub fn data_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// A message about to be added to the buffer; the backend assigns its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub station: String,
    pub consumer: String,
    pub owner_username: String,
    pub payload: Vec<u8>,
    pub created_at: i64,
}

impl PendingMessage {
    pub fn new(
        station: impl Into<String>,
        consumer: impl Into<String>,
        owner_username: impl Into<String>,
        payload: Vec<u8>,
        created_at: i64,
    ) -> Self {
        Self {
            station: station.into(),
            consumer: consumer.into(),
            owner_username: owner_username.into(),
            payload,
            created_at,
        }
    }

    pub fn into_buffered(self, id: MessageId) -> BufferedMessage {
        BufferedMessage {
            id,
            station: self.station,
            consumer: self.consumer,
            owner_username: self.owner_username,
            payload: self.payload,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_into_buffered_keeps_fields() {
        let pending = PendingMessage::new("orders", "billing", "alice", b"hi".to_vec(), 42);
        let buffered = pending.into_buffered(3);
        assert_eq!(buffered.id, 3);
        assert_eq!(buffered.station, "orders");
        assert_eq!(buffered.consumer, "billing");
        assert!(buffered.is_owned_by("alice"));
        assert!(!buffered.is_owned_by("bob"));
        assert_eq!(buffered.data_lossy(), "hi");
        assert_eq!(buffered.created_at, 42);
    }
}
