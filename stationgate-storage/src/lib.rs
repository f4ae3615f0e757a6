//! stationgate Storage - Message Buffer
//!
//! Holds messages that were fetched from the broker and acknowledged there,
//! but not yet acknowledged by the HTTP client. Two interchangeable backends
//! implement [`MessageBuffer`]:
//!
//! - [`InMemoryMessageBuffer`]: process-local, lost on restart
//! - [`PgMessageBuffer`]: PostgreSQL table shared by every gateway instance
//!
//! The backend is chosen once at startup by [`open_message_buffer`].

pub mod buffer;
pub mod config;
pub mod memory;
pub mod postgres;

pub use buffer::MessageBuffer;
pub use config::{open_message_buffer, BufferBackendKind, BufferConfig};
pub use memory::InMemoryMessageBuffer;
pub use postgres::{PgBufferConfig, PgMessageBuffer};
