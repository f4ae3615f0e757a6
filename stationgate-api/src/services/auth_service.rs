//! Auth Service
//!
//! Token issuance for `/auth/authenticate` and `/auth/refreshToken`. Both
//! open (or keep) the caller's broker connection before answering.

use serde::{Deserialize, Serialize};
use stationgate_core::{BrokerCredential, BrokerLogin, IdentityKey, SessionGrant, TenantId};

use crate::auth::{AuthConfig, AuthPolicy, IssuedTokens};
use crate::error::{ApiError, ApiResult};
use crate::services::ConnectionService;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthenticateRequest {
    #[serde(default)]
    pub username: String,
    pub password: Option<String>,
    pub connection_token: Option<String>,
    pub account_id: Option<i64>,
    pub token_expiry_in_minutes: Option<i64>,
    pub refresh_token_expiry_in_minutes: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshTokenRequest {
    #[serde(default)]
    pub jwt_refresh_token: String,
}

/// Token pair returned by both auth routes. Lifetimes are milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub jwt: String,
    pub expires_in: i64,
    pub jwt_refresh_token: String,
    pub refresh_token_expires_in: i64,
}

impl From<IssuedTokens> for TokenResponse {
    fn from(tokens: IssuedTokens) -> Self {
        Self {
            jwt: tokens.jwt,
            expires_in: tokens.expires_in_ms,
            jwt_refresh_token: tokens.jwt_refresh_token,
            refresh_token_expires_in: tokens.refresh_expires_in_ms,
        }
    }
}

fn session_grant(tokens: &IssuedTokens) -> SessionGrant {
    SessionGrant {
        session_id: tokens.session_id.clone(),
        expires_at: tokens.refresh_expires_at,
    }
}

fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    value
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field(field))
}

/// Log the user in to the broker, cache the connection, and issue tokens.
pub async fn authenticate(
    connections: &ConnectionService,
    auth: &AuthConfig,
    policy: &AuthPolicy,
    request: AuthenticateRequest,
) -> ApiResult<TokenResponse> {
    if request.username.trim().is_empty() {
        return Err(ApiError::missing_field("username"));
    }

    let broker = connections.broker_config();
    let credential = if broker.user_pass_based_auth {
        BrokerCredential::password(required(request.password, "password")?)
    } else {
        BrokerCredential::connection_token(required(request.connection_token, "connection_token")?)
    };
    let tenant = request
        .account_id
        .map(TenantId::new)
        .unwrap_or(broker.default_account_id);
    let identity = IdentityKey::new(tenant, &request.username);

    // Lifetimes are validated before the broker is contacted.
    let tokens = auth.issue_tokens(
        policy,
        &identity,
        request.token_expiry_in_minutes,
        request.refresh_token_expiry_in_minutes,
    )?;

    let login = BrokerLogin::new(identity, credential);
    connections
        .establish(&login, tokens.access_expires_at, Some(session_grant(&tokens)))
        .await?;

    tracing::info!(identity = %login.identity, "User authenticated");
    Ok(tokens.into())
}

/// Redeem a refresh token for a new token pair.
pub async fn refresh_token(
    connections: &ConnectionService,
    auth: &AuthConfig,
    policy: &AuthPolicy,
    request: RefreshTokenRequest,
) -> ApiResult<TokenResponse> {
    if request.jwt_refresh_token.is_empty() {
        return Err(ApiError::missing_field("jwt_refresh_token"));
    }

    let claims = auth.validate_refresh_token(policy, &request.jwt_refresh_token)?;
    let session = connections
        .redeem_session(&claims.sid, auth.now())
        .await
        .ok_or_else(|| ApiError::unauthorized("Refresh session is unknown or already used"))?;

    let identity = claims.identity();
    if session.identity != identity {
        tracing::warn!(claimed = %identity, session = %session.identity, "Refresh session identity mismatch");
        return Err(ApiError::unauthorized("Refresh session does not match token"));
    }

    let tokens = auth.issue_tokens(policy, &identity, None, None)?;
    connections
        .refresh(session, tokens.access_expires_at, session_grant(&tokens))
        .await?;

    tracing::info!(identity = %identity, "Tokens refreshed");
    Ok(tokens.into())
}
