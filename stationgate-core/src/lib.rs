//! stationgate Core - Shared Types
//!
//! Data types shared by every stationgate crate: identity keys, buffered
//! messages, control-plane sync events, the broker client seam, and the error
//! taxonomy. This crate performs no I/O of its own.

pub mod broker;
pub mod clock;
pub mod error;
pub mod identity;
pub mod message;
pub mod sync;

pub use broker::{
    BrokerConnection, BrokerConnector, BrokerCredential, BrokerLogin, ControlPlane, FetchRequest,
    FetchedMessage, MessageAcker, OutboundMessage,
};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{
    BrokerError, BrokerResult, BufferError, ConfigError, GatewayError, GatewayResult,
};
pub use identity::{normalize_username, IdentityKey, TenantId, DEFAULT_TENANT_ID};
pub use message::{BufferedMessage, MessageId, PendingMessage};
pub use sync::{
    ConnectionUpdate, ControlEvent, ControlMessage, SessionGrant, SessionRevocation, SyncEvent,
};
