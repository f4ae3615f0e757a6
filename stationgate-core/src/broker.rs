//! Broker client seam.
//!
//! The gateway talks to the broker only through these traits. The production
//! implementation lives in `stationgate-api::broker::nats`; tests use the
//! in-process mock from `stationgate-test-utils`.

use crate::error::BrokerResult;
use crate::identity::IdentityKey;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// LOGIN MATERIAL
// ============================================================================

/// Secret used to open a broker connection on a user's behalf.
#[derive(Clone)]
pub enum BrokerCredential {
    Password(SecretString),
    ConnectionToken(SecretString),
}

impl BrokerCredential {
    pub fn password(secret: impl Into<String>) -> Self {
        Self::Password(SecretString::new(secret.into().into_boxed_str()))
    }

    pub fn connection_token(secret: impl Into<String>) -> Self {
        Self::ConnectionToken(SecretString::new(secret.into().into_boxed_str()))
    }

    /// Expose the secret value (only for handing it to the broker client or
    /// the control plane).
    pub fn expose(&self) -> &str {
        match self {
            Self::Password(secret) | Self::ConnectionToken(secret) => secret.expose_secret(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Password(_) => "password",
            Self::ConnectionToken(_) => "connection_token",
        }
    }
}

impl fmt::Debug for BrokerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BrokerCredential::{}([REDACTED])", self.kind())
    }
}

/// Everything needed to open a connection for one identity.
#[derive(Debug, Clone)]
pub struct BrokerLogin {
    pub identity: IdentityKey,
    pub credential: BrokerCredential,
}

impl BrokerLogin {
    pub fn new(identity: IdentityKey, credential: BrokerCredential) -> Self {
        Self {
            identity,
            credential,
        }
    }
}

// ============================================================================
// MESSAGES
// ============================================================================

/// A normalized message ready to be produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutboundMessage {
    pub payload: Vec<u8>,
    pub headers: BTreeMap<String, String>,
}

impl OutboundMessage {
    pub fn new(payload: Vec<u8>, headers: BTreeMap<String, String>) -> Self {
        Self { payload, headers }
    }
}

/// Parameters of a bounded broker fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub station: String,
    pub consumer_name: String,
    pub consumer_group: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    pub max_deliveries: u32,
}

/// Acknowledges one fetched message against the broker.
#[async_trait]
pub trait MessageAcker: Send + Sync {
    async fn ack(&self) -> BrokerResult<()>;
}

/// A message returned by a broker fetch, not yet acknowledged.
pub struct FetchedMessage {
    payload: Vec<u8>,
    headers: BTreeMap<String, String>,
    acker: Box<dyn MessageAcker>,
}

impl FetchedMessage {
    pub fn new(
        payload: Vec<u8>,
        headers: BTreeMap<String, String>,
        acker: Box<dyn MessageAcker>,
    ) -> Self {
        Self {
            payload,
            headers,
            acker,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn headers(&self) -> &BTreeMap<String, String> {
        &self.headers
    }

    pub async fn ack(&self) -> BrokerResult<()> {
        self.acker.ack().await
    }

    pub fn into_payload(self) -> Vec<u8> {
        self.payload
    }
}

impl fmt::Debug for FetchedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchedMessage")
            .field("payload_len", &self.payload.len())
            .field("headers", &self.headers)
            .finish()
    }
}

// ============================================================================
// CLIENT TRAITS
// ============================================================================

/// A live broker connection for one identity.
#[async_trait]
pub trait BrokerConnection: Send + Sync {
    /// Whether the underlying client still reports itself connected.
    fn is_connected(&self) -> bool;

    /// Publish one message through the cached producer handle for
    /// (`station`, `producer_name`), creating the handle if absent.
    async fn produce(
        &self,
        station: &str,
        producer_name: &str,
        message: &OutboundMessage,
    ) -> BrokerResult<()>;

    /// Drop the cached producer handle so the next produce recreates it.
    async fn invalidate_producer(&self, station: &str, producer_name: &str);

    /// Fetch up to `request.batch_size` messages, waiting at most
    /// `request.max_wait`.
    async fn fetch(&self, request: &FetchRequest) -> BrokerResult<Vec<FetchedMessage>>;

    async fn close(&self) -> BrokerResult<()>;
}

/// Opens broker connections.
#[async_trait]
pub trait BrokerConnector: Send + Sync {
    async fn connect(&self, login: &BrokerLogin) -> BrokerResult<Arc<dyn BrokerConnection>>;
}

/// Gateway-internal publish/subscribe channel shared by every instance.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    fn is_connected(&self) -> bool;

    async fn publish(&self, subject: &str, payload: Vec<u8>) -> BrokerResult<()>;

    async fn subscribe(&self, subject: &str) -> BrokerResult<BoxStream<'static, Vec<u8>>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BrokerError;
    use crate::identity::TenantId;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingAcker(Arc<AtomicUsize>);

    #[async_trait]
    impl MessageAcker for CountingAcker {
        async fn ack(&self) -> BrokerResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct FailingAcker;

    #[async_trait]
    impl MessageAcker for FailingAcker {
        async fn ack(&self) -> BrokerResult<()> {
            Err(BrokerError::Disconnected)
        }
    }

    #[test]
    fn test_credential_debug_is_redacted() {
        let credential = BrokerCredential::password("hunter2");
        let rendered = format!("{:?}", credential);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("password"));
        assert_eq!(credential.expose(), "hunter2");
    }

    #[test]
    fn test_login_debug_is_redacted() {
        let login = BrokerLogin::new(
            IdentityKey::new(TenantId::new(1), "alice"),
            BrokerCredential::connection_token("tok-123"),
        );
        assert!(!format!("{:?}", login).contains("tok-123"));
    }

    #[tokio::test]
    async fn test_fetched_message_ack_delegates() {
        let count = Arc::new(AtomicUsize::new(0));
        let message = FetchedMessage::new(
            b"payload".to_vec(),
            BTreeMap::new(),
            Box::new(CountingAcker(count.clone())),
        );
        assert!(message.ack().await.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(message.into_payload(), b"payload".to_vec());
    }

    #[tokio::test]
    async fn test_fetched_message_ack_error_surfaces() {
        let message = FetchedMessage::new(Vec::new(), BTreeMap::new(), Box::new(FailingAcker));
        assert_eq!(message.ack().await, Err(BrokerError::Disconnected));
    }
}
