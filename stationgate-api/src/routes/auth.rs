//! Token routes
//!
//! - POST /auth/authenticate
//! - POST /auth/refreshToken
//!
//! `?station=<name>` issues tokens with that station's secrets and expiries.

use axum::{
    body::Bytes,
    extract::{Query, State},
    routing::post,
    Json, Router,
};
use serde::Deserialize;

use crate::error::ApiResult;
use crate::services::{
    authenticate, refresh_token, AuthenticateRequest, RefreshTokenRequest, TokenResponse,
};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct StationQuery {
    pub station: Option<String>,
}

/// POST /auth/authenticate
pub async fn authenticate_handler(
    State(state): State<AppState>,
    Query(query): Query<StationQuery>,
    body: Bytes,
) -> ApiResult<Json<TokenResponse>> {
    let request: AuthenticateRequest = serde_json::from_slice(&body)?;
    let auth = &state.config.auth;
    let policy = auth.policy_for(query.station.as_deref());
    let response = authenticate(&state.connections, auth, policy, request).await?;
    Ok(Json(response))
}

/// POST /auth/refreshToken
pub async fn refresh_token_handler(
    State(state): State<AppState>,
    Query(query): Query<StationQuery>,
    body: Bytes,
) -> ApiResult<Json<TokenResponse>> {
    let request: RefreshTokenRequest = serde_json::from_slice(&body)?;
    let auth = &state.config.auth;
    let policy = auth.policy_for(query.station.as_deref());
    let response = refresh_token(&state.connections, auth, policy, request).await?;
    Ok(Json(response))
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/auth/authenticate", post(authenticate_handler))
        .route("/auth/refreshToken", post(refresh_token_handler))
}
