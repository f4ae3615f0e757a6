//! REST API Routes Module
//!
//! - `auth`: token issuance (no auth required)
//! - `stations`: produce, consume, and acknowledge (auth required)
//! - `health`: monitoring and liveness (no auth required)
//!
//! Plus `/metrics` in Prometheus text format.

pub mod auth;
pub mod health;
pub mod stations;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware::{from_fn, from_fn_with_state},
    routing::get,
    Router,
};
use tower_http::{
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
};

use crate::constants::MAX_REQUEST_BODY_BYTES;
use crate::middleware::{auth_middleware, AuthMiddlewareState};
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

/// Build the complete router.
///
/// # Middleware Order (outer to inner)
/// 1. CORS (outermost) - handles preflight requests
/// 2. Observability - tracing and metrics
/// 3. Body limit
/// 4. Auth (innermost, only on /stations/*)
pub fn create_router(state: AppState) -> Router {
    let auth_state = AuthMiddlewareState::new(Arc::new(state.config.auth.clone()));

    let station_routes = stations::create_router()
        .route_layer(from_fn_with_state(auth_state, auth_middleware));

    Router::new()
        .merge(auth::create_router())
        .merge(station_routes)
        .merge(health::create_router())
        .route("/metrics", get(metrics_handler))
        .with_state(state)
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(MAX_REQUEST_BODY_BYTES))
        .layer(from_fn(observability_middleware))
        .layer(build_cors_layer())
}

/// Allow-all CORS; browser clients call the gateway directly.
fn build_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers(Any)
}
