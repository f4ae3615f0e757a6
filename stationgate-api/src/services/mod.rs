//! Service Layer
//!
//! Business logic behind the routes: connection lifecycle, token issuance,
//! and the consume/produce coordinators.

mod auth_service;
mod connection_service;
mod consume_service;
mod produce_service;

pub use auth_service::*;
pub use connection_service::*;
pub use consume_service::*;
pub use produce_service::*;
