//! Constants for the stationgate API
//!
//! Defaults for every environment-driven setting live here so they are easy to
//! find and test.

// ============================================================================
// SERVER
// ============================================================================

/// Default HTTP bind address
pub const DEFAULT_HTTP_BIND: &str = "0.0.0.0";

/// Default HTTP port
pub const DEFAULT_HTTP_PORT: u16 = 4444;

/// Maximum accepted request body (8 MiB)
pub const MAX_REQUEST_BODY_BYTES: usize = 8 * 1024 * 1024;

// ============================================================================
// BROKER
// ============================================================================

/// Default broker address
pub const DEFAULT_BROKER_HOST: &str = "localhost:6666";

/// Default root (system) user
pub const DEFAULT_ROOT_USER: &str = "root";

/// Producer name used for every produce call
pub const DEFAULT_PRODUCER_NAME: &str = "rest_gateway";

/// Default broker client name
pub const DEFAULT_CLIENT_NAME: &str = "stationgate";

/// Default number of reconnect attempts before the client gives up
pub const DEFAULT_BROKER_MAX_RECONNECTS: usize = 10;

/// Default delay between reconnect attempts (milliseconds)
pub const DEFAULT_BROKER_RECONNECT_WAIT_MS: u64 = 3000;

// ============================================================================
// AUTHENTICATION
// ============================================================================

/// Default access token lifetime in minutes
pub const DEFAULT_JWT_EXPIRES_IN_MINUTES: i64 = 15;

/// Default refresh token lifetime in minutes
pub const DEFAULT_REFRESH_JWT_EXPIRES_IN_MINUTES: i64 = 300;

/// Default JWT clock skew tolerance in seconds
pub const DEFAULT_JWT_CLOCK_SKEW_SECS: i64 = 60;

/// Minimum required length for JWT secret keys
pub const MIN_JWT_SECRET_LENGTH: usize = 32;

/// Placeholder secret used when none is configured (rejected in production)
pub const INSECURE_DEFAULT_SECRET: &str = "INSECURE_DEFAULT_SECRET_CHANGE_IN_PRODUCTION";

/// Default header carrying the static API token
pub const DEFAULT_API_TOKEN_HEADER: &str = "x-api-token";

/// Default header carrying the hex HMAC of the request body
pub const DEFAULT_HMAC_HEADER: &str = "x-hmac-signature";

// ============================================================================
// BACKGROUND JOBS
// ============================================================================

/// Default connection reaper interval in seconds
pub const DEFAULT_REAPER_INTERVAL_SECS: u64 = 30;

/// Default control-plane subject for connection sync events
pub const DEFAULT_SYNC_SUBJECT: &str = "$gateway.control.connections";

/// Default delay before re-subscribing after the sync stream ends (milliseconds)
pub const DEFAULT_SYNC_RESUBSCRIBE_DELAY_MS: u64 = 2000;

/// Default bound on applying one sync event, including any broker connect (milliseconds)
pub const DEFAULT_SYNC_APPLY_TIMEOUT_MS: u64 = 10_000;

// ============================================================================
// CONSUME / PRODUCE
// ============================================================================

/// Default consume batch size
pub const DEFAULT_CONSUME_BATCH_SIZE: usize = 10;

/// Default broker fetch wait in milliseconds
pub const DEFAULT_CONSUME_MAX_WAIT_MS: u64 = 5000;

/// Default maximum broker delivery attempts per message
pub const DEFAULT_CONSUME_MAX_DELIVERIES: u32 = 10;

/// Largest batch a single consume request may ask for
pub const DEFAULT_CONSUME_MAX_BATCH_SIZE: usize = 1000;

/// Maximum number of items in a produce batch
pub const MAX_PRODUCE_BATCH: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_consistent() {
        assert!(DEFAULT_CONSUME_BATCH_SIZE <= DEFAULT_CONSUME_MAX_BATCH_SIZE);
        assert!(DEFAULT_JWT_EXPIRES_IN_MINUTES < DEFAULT_REFRESH_JWT_EXPIRES_IN_MINUTES);
        assert!(INSECURE_DEFAULT_SECRET.len() >= MIN_JWT_SECRET_LENGTH);
    }
}
