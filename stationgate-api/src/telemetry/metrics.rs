//! Prometheus Metrics Definitions
//!
//! Defines every gateway metric and exposes the `/metrics` endpoint.

use axum::{http::StatusCode, response::IntoResponse};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, register_histogram_vec, Counter,
    CounterVec, Encoder, Gauge, HistogramVec, TextEncoder,
};

use crate::error::{ApiError, ApiResult};

/// HTTP request latency buckets (seconds)
/// Covers: 1ms, 5ms, 10ms, 25ms, 50ms, 100ms, 250ms, 500ms, 1s, 2.5s, 5s, 10s
const HTTP_LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance - initialized once at startup
pub static METRICS: Lazy<ApiResult<GatewayMetrics>> = Lazy::new(GatewayMetrics::new);

#[derive(Clone)]
pub struct GatewayMetrics {
    /// labels: method, path, status
    pub http_requests_total: CounterVec,

    /// labels: method, path
    pub http_request_duration_seconds: HistogramVec,

    pub cached_connections: Gauge,

    pub connections_reaped_total: Counter,

    /// labels: outcome (applied, duplicate, malformed, failed, published, publish_failed)
    pub sync_events_total: CounterVec,

    /// labels: operation (get, add, remove, purge)
    pub buffer_operations_total: CounterVec,

    /// labels: status (success, error)
    pub produce_total: CounterVec,

    pub produce_retries_total: Counter,

    /// labels: status (success, timeout, error)
    pub broker_fetch_total: CounterVec,
}

impl GatewayMetrics {
    /// Create and register all metrics with Prometheus.
    pub fn new() -> ApiResult<Self> {
        Ok(Self {
            http_requests_total: register_counter_vec!(
                "stationgate_http_requests_total",
                "Total number of HTTP requests",
                &["method", "path", "status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_requests_total: {}", e)))?,

            http_request_duration_seconds: register_histogram_vec!(
                "stationgate_http_request_duration_seconds",
                "HTTP request duration in seconds",
                &["method", "path"],
                HTTP_LATENCY_BUCKETS.to_vec()
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register http_request_duration_seconds: {}", e)))?,

            cached_connections: register_gauge!(
                "stationgate_cached_connections",
                "Broker connections currently held in the connection cache"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register cached_connections: {}", e)))?,

            connections_reaped_total: register_counter!(
                "stationgate_connections_reaped_total",
                "Cached connections removed by the reaper"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register connections_reaped_total: {}", e)))?,

            sync_events_total: register_counter_vec!(
                "stationgate_sync_events_total",
                "Connection sync events by outcome",
                &["outcome"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register sync_events_total: {}", e)))?,

            buffer_operations_total: register_counter_vec!(
                "stationgate_buffer_operations_total",
                "Message buffer operations",
                &["operation"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register buffer_operations_total: {}", e)))?,

            produce_total: register_counter_vec!(
                "stationgate_produce_total",
                "Produced messages by status",
                &["status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register produce_total: {}", e)))?,

            produce_retries_total: register_counter!(
                "stationgate_produce_retries_total",
                "Produce calls retried after a stale producer handle"
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register produce_retries_total: {}", e)))?,

            broker_fetch_total: register_counter_vec!(
                "stationgate_broker_fetch_total",
                "Broker fetches by status",
                &["status"]
            )
            .map_err(|e| ApiError::internal_error(format!("Failed to register broker_fetch_total: {}", e)))?,
        })
    }

    /// Record an HTTP request.
    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        let status_str = status.to_string();
        self.http_requests_total
            .with_label_values(&[method, path, &status_str])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    pub fn set_cached_connections(&self, count: usize) {
        self.cached_connections.set(count as f64);
    }

    pub fn record_reaped(&self, count: usize) {
        self.connections_reaped_total.inc_by(count as f64);
    }

    pub fn record_sync_event(&self, outcome: &str) {
        self.sync_events_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_buffer_operation(&self, operation: &str, count: usize) {
        self.buffer_operations_total
            .with_label_values(&[operation])
            .inc_by(count as f64);
    }

    pub fn record_produce(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.produce_total.with_label_values(&[status]).inc();
    }

    pub fn record_produce_retry(&self) {
        self.produce_retries_total.inc();
    }

    pub fn record_fetch(&self, status: &str) {
        self.broker_fetch_total.with_label_values(&[status]).inc();
    }
}

/// Run `f` against the global metrics if they registered.
pub fn with_metrics(f: impl FnOnce(&GatewayMetrics)) {
    if let Ok(metrics) = METRICS.as_ref() {
        f(metrics);
    }
}

/// Handler for GET /metrics.
///
/// Returns Prometheus text format metrics.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode metrics");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                format!("Failed to encode metrics: {}", e).into_bytes(),
            )
        }
    }
}
