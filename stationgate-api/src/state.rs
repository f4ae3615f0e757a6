//! Shared application state for Axum routers.

use std::sync::Arc;
use std::time::Instant;

use stationgate_storage::MessageBuffer;

use crate::config::GatewayConfig;
use crate::services::ConnectionService;

/// State shared by every route.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub connections: Arc<ConnectionService>,
    /// Selected once at startup; never switched afterwards.
    pub buffer: Arc<dyn MessageBuffer>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: Arc<GatewayConfig>,
        connections: Arc<ConnectionService>,
        buffer: Arc<dyn MessageBuffer>,
    ) -> Self {
        Self {
            config,
            connections,
            buffer,
            start_time: Instant::now(),
        }
    }
}

crate::impl_from_ref!(Arc<GatewayConfig>, config);
crate::impl_from_ref!(Arc<ConnectionService>, connections);
crate::impl_from_ref!(Arc<dyn MessageBuffer>, buffer);
crate::impl_from_ref!(Instant, start_time);
