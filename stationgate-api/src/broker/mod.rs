//! Broker client implementations.
//!
//! Request handlers and background jobs only see the `stationgate-core`
//! traits; this module provides the production NATS JetStream backend.

pub mod nats;

pub use nats::{NatsConnection, NatsConnector, NatsControlPlane};
