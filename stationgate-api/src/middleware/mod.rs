//! Middleware for the stationgate API
//!
//! - `auth`: per-station authentication, injecting a [`CallerContext`]
//!
//! Request observability lives in `telemetry::middleware` and wraps every
//! route; authentication wraps only the station routes.

mod auth;

pub use auth::{
    auth_middleware, AuthMiddlewareError, AuthMiddlewareState, Caller, CallerContext,
};
