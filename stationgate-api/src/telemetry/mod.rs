//! stationgate Telemetry - Logging and Metrics
//!
//! Structured `tracing` logs (JSON by default) and Prometheus metrics for the
//! HTTP layer, the connection cache, and the background jobs.

pub mod metrics;
pub mod middleware;

pub use metrics::{metrics_handler, GatewayMetrics, METRICS};
pub use middleware::observability_middleware;

use crate::error::{ApiError, ApiResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub service_name: String,
    pub service_version: String,
    pub environment: String,
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "stationgate".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::default(),
        }
    }
}

impl TelemetryConfig {
    /// Environment variables:
    /// - `STATIONGATE_LOG_FORMAT`: `json` (default) or anything else for
    ///   human-readable output
    /// - `STATIONGATE_ENVIRONMENT`
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            log_format: match std::env::var("STATIONGATE_LOG_FORMAT") {
                Ok(value) if value.trim().to_lowercase() != "json" => LogFormat::Pretty,
                _ => LogFormat::Json,
            },
            environment: std::env::var("STATIONGATE_ENVIRONMENT")
                .unwrap_or(defaults.environment),
            ..defaults
        }
    }
}

/// Install the global tracing subscriber. Call once, before anything logs.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_tracing(config: &TelemetryConfig) -> ApiResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("stationgate_api=debug,tower_http=info,info"));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.log_format {
        LogFormat::Json => registry.with(fmt::layer().json()).try_init(),
        LogFormat::Pretty => registry.with(fmt::layer()).try_init(),
    };
    result.map_err(|e| ApiError::internal_error(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        service_version = %config.service_version,
        environment = %config.environment,
        "Telemetry initialized"
    );
    Ok(())
}
