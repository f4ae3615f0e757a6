//! Axum Middleware for HTTP Request Tracing and Metrics
//!
//! Every request runs inside an `http_request` span and is counted in the
//! Prometheus HTTP metrics under a low-cardinality route label.

use axum::{extract::Request, middleware::Next, response::Response};
use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Instant;
use tracing::{info_span, Instrument};

use super::metrics::with_metrics;

static STATION_SEGMENT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^/stations/[^/]+(/|$)").ok());

/// Replace the station name in `/stations/{station}/...` paths so metric
/// labels stay bounded.
fn normalize_path(path: &str) -> String {
    match STATION_SEGMENT.as_ref() {
        Some(pattern) => pattern.replace(path, "/stations/{station}$1").into_owned(),
        None => path.to_string(),
    }
}

pub async fn observability_middleware(request: Request, next: Next) -> Response {
    let start = Instant::now();

    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let normalized_path = normalize_path(&path);

    let span = info_span!(
        "http_request",
        http.method = %method,
        http.target = %path,
        http.route = %normalized_path,
    );

    let response = next.run(request).instrument(span).await;

    let duration = start.elapsed();
    let status = response.status();

    with_metrics(|metrics| {
        metrics.record_http_request(
            method.as_str(),
            &normalized_path,
            status.as_u16(),
            duration.as_secs_f64(),
        )
    });

    tracing::info!(
        method = %method,
        path = %path,
        status = status.as_u16(),
        duration_ms = duration.as_millis(),
        "Request completed"
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_station_path() {
        assert_eq!(
            normalize_path("/stations/orders/produce/single"),
            "/stations/{station}/produce/single"
        );
        assert_eq!(
            normalize_path("/stations/orders/consume/batch/ack"),
            "/stations/{station}/consume/batch/ack"
        );
    }

    #[test]
    fn test_normalize_bare_station_path() {
        assert_eq!(normalize_path("/stations/orders"), "/stations/{station}");
    }

    #[test]
    fn test_normalize_leaves_other_paths() {
        assert_eq!(normalize_path("/auth/authenticate"), "/auth/authenticate");
        assert_eq!(normalize_path("/health/ping"), "/health/ping");
    }
}
