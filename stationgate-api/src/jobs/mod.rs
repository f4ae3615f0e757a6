//! Background Jobs for the stationgate gateway
//!
//! - `connection_reaper`: evicts expired or disconnected cached connections
//! - `connection_sync`: replicates connections cached by other instances
//! - `buffer_retention`: purges buffered messages past a maximum age (only
//!   when one is configured)
//!
//! # Usage
//!
//! All jobs share one shutdown signal:
//!
//! ```ignore
//! use stationgate_api::jobs::{connection_reaper_task, ConnectionReaperConfig};
//! use tokio::sync::watch;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! let reaper = tokio::spawn(connection_reaper_task(
//!     state.connections.clone(),
//!     ConnectionReaperConfig::from_env(),
//!     shutdown_rx.clone(),
//! ));
//!
//! // On shutdown
//! let _ = shutdown_tx.send(true);
//! let metrics = reaper.await?;
//! ```

pub mod buffer_retention;
pub mod connection_reaper;
pub mod connection_sync;

pub use buffer_retention::{buffer_retention_task, BufferRetentionMetrics};
pub use connection_reaper::{
    connection_reaper_task, ConnectionReaperConfig, ConnectionReaperMetrics,
};
pub use connection_sync::{connection_sync_task, ConnectionSyncConfig, ConnectionSyncMetrics};
