//! stationgate API - HTTP gateway for broker stations
//!
//! Clients authenticate once, then produce to and consume from stations
//! over plain HTTP. The gateway keeps one broker connection per identity,
//! buffers consumed messages until the client acknowledges them, and shares
//! its connection cache with the rest of the fleet over a control-plane
//! subject.

pub mod auth;
pub mod broker;
pub mod config;
pub mod connections;
pub mod constants;
pub mod error;
pub mod jobs;
mod macros;
pub mod middleware;
pub mod routes;
pub mod services;
pub mod sessions;
pub mod state;
pub mod telemetry;
pub mod validation;

// Re-export commonly used types
pub use auth::{AuthConfig, AuthMethod, AuthPolicy, Claims, RefreshClaims};
pub use config::{BrokerConfig, ConsumeConfig, GatewayConfig, ServerConfig};
pub use connections::{CachedConnection, ConnectionCache};
pub use error::{ApiError, ApiResult, ErrorCode};
pub use middleware::{auth_middleware, AuthMiddlewareState, CallerContext};
pub use routes::create_router;
pub use services::ConnectionService;
pub use sessions::SessionStore;
pub use state::AppState;

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    /// Serializes tests that touch process environment variables.
    pub static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Sets (or removes) a variable and restores the previous value on drop.
    pub struct EnvVarGuard {
        key: &'static str,
        previous: Option<String>,
    }

    impl EnvVarGuard {
        pub fn set(key: &'static str, value: Option<&str>) -> Self {
            let previous = std::env::var(key).ok();
            match value {
                Some(value) => std::env::set_var(key, value),
                None => std::env::remove_var(key),
            }
            Self { key, previous }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.previous.as_deref() {
                Some(value) => std::env::set_var(self.key, value),
                None => std::env::remove_var(self.key),
            }
        }
    }
}
