//! Axum middleware that authenticates station requests
//!
//! The station named in `/stations/{station}/...` selects the policy (its
//! override or the global one). The name is taken from the routed, percent
//! decoded path parameter, the same value the handlers produce to. JWT requests act as the token's identity;
//! API-token, HMAC, and unauthenticated requests act as the root identity.

use crate::auth::{verify_api_token, verify_hmac_signature, AuthConfig, AuthMethod, AuthPolicy};
use crate::config::BrokerConfig;
use crate::constants::MAX_REQUEST_BODY_BYTES;
use crate::error::ApiError;
use axum::{
    body::Body,
    extract::{FromRequestParts, RawPathParams, Request, State},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use stationgate_core::IdentityKey;
use std::sync::Arc;

// ============================================================================
// CALLER CONTEXT
// ============================================================================

/// Who a station request acts as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallerContext {
    /// Authenticated by an access token
    User(IdentityKey),

    /// No user identity; served through the root connection
    Compat,
}

impl CallerContext {
    /// Username recorded as the owner of buffered messages.
    pub fn username(&self, broker: &BrokerConfig) -> String {
        match self {
            CallerContext::User(identity) => identity.username().to_string(),
            CallerContext::Compat => broker.root_identity().username().to_string(),
        }
    }
}

// ============================================================================
// MIDDLEWARE STATE
// ============================================================================

#[derive(Debug, Clone)]
pub struct AuthMiddlewareState {
    pub auth_config: Arc<AuthConfig>,
}

impl AuthMiddlewareState {
    pub fn new(auth_config: Arc<AuthConfig>) -> Self {
        Self { auth_config }
    }
}

// ============================================================================
// MIDDLEWARE FUNCTION
// ============================================================================

/// Authenticate a station request and inject its [`CallerContext`].
///
/// ```ignore
/// let app = Router::new()
///     .route("/stations/:station/produce/single", post(produce_single))
///     .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware));
/// ```
pub async fn auth_middleware(
    State(state): State<AuthMiddlewareState>,
    params: RawPathParams,
    request: Request,
    next: Next,
) -> Result<Response, AuthMiddlewareError> {
    let station = station_param(&params);
    let policy = state.auth_config.policy_for(station);

    let (mut request, caller) = match policy.method {
        AuthMethod::Jwt => {
            let token = bearer_token(&request).map_err(AuthMiddlewareError)?;
            let claims = state
                .auth_config
                .validate_access_token(policy, token)
                .map_err(AuthMiddlewareError)?;
            (request, CallerContext::User(claims.identity()))
        }
        AuthMethod::ApiToken => {
            check_api_token(policy, &request).map_err(AuthMiddlewareError)?;
            (request, CallerContext::Compat)
        }
        AuthMethod::HmacToken => {
            let request = check_hmac(policy, request)
                .await
                .map_err(AuthMiddlewareError)?;
            (request, CallerContext::Compat)
        }
        AuthMethod::None => (request, CallerContext::Compat),
    };

    request.extensions_mut().insert(caller);
    Ok(next.run(request).await)
}

fn station_param<'a>(params: &'a RawPathParams) -> Option<&'a str> {
    params
        .iter()
        .find(|(name, _)| *name == "station")
        .map(|(_, value)| value)
        .filter(|name| !name.is_empty())
}

fn bearer_token(request: &Request) -> Result<&str, ApiError> {
    let header = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            ApiError::unauthorized("Authentication required: provide Authorization: Bearer <jwt>")
        })?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::invalid_token("Authorization header must use Bearer scheme"))
}

fn check_api_token(policy: &AuthPolicy, request: &Request) -> Result<(), ApiError> {
    let expected = policy
        .api_token
        .as_ref()
        .ok_or_else(|| ApiError::internal_error("API token authentication is not configured"))?;

    let presented = request
        .headers()
        .get(policy.api_token_header.as_str())
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| {
            ApiError::unauthorized(format!(
                "Authentication required: provide {}",
                policy.api_token_header
            ))
        })?;

    verify_api_token(expected, presented)
}

/// Buffer the body, verify its signature, and hand back an equivalent request.
async fn check_hmac(policy: &AuthPolicy, request: Request) -> Result<Request, ApiError> {
    let secret = policy
        .hmac_secret
        .as_ref()
        .ok_or_else(|| ApiError::internal_error("HMAC authentication is not configured"))?;

    let signature = request
        .headers()
        .get(policy.hmac_header.as_str())
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::unauthorized(format!(
                "Authentication required: provide {}",
                policy.hmac_header
            ))
        })?;

    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY_BYTES)
        .await
        .map_err(|e| ApiError::invalid_input(format!("Failed to read request body: {}", e)))?;

    verify_hmac_signature(policy.hmac_hash, secret, &bytes, &signature)?;
    Ok(Request::from_parts(parts, Body::from(bytes)))
}

// ============================================================================
// ERROR HANDLING
// ============================================================================

#[derive(Debug)]
pub struct AuthMiddlewareError(pub ApiError);

impl IntoResponse for AuthMiddlewareError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

// ============================================================================
// TYPED EXTRACTOR
// ============================================================================

/// Extractor for the caller injected by [`auth_middleware`]. Routes without
/// the middleware get a 500.
#[derive(Debug, Clone)]
pub struct Caller(pub CallerContext);

#[axum::async_trait]
impl<S> FromRequestParts<S> for Caller
where
    S: Send + Sync,
{
    type Rejection = AuthMiddlewareError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CallerContext>()
            .cloned()
            .map(Caller)
            .ok_or_else(|| {
                AuthMiddlewareError(ApiError::internal_error(
                    "Caller context not found in request extensions. \
                     Ensure auth_middleware is applied to this route.",
                ))
            })
    }
}

impl std::ops::Deref for Caller {
    type Target = CallerContext;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{sign_body, HmacHash, JwtSecret};
    use crate::error::ErrorCode;
    use axum::{http::StatusCode, middleware::from_fn_with_state, routing::post, Router};
    use secrecy::SecretString;
    use stationgate_test_utils::fixtures::{alice, NOW};
    use stationgate_test_utils::ManualClock;
    use std::collections::HashMap;
    use tower::ServiceExt;

    const SECRET: &str = "an-access-secret-that-is-long-enough";

    fn jwt_policy() -> Result<AuthPolicy, ApiError> {
        Ok(AuthPolicy {
            method: AuthMethod::Jwt,
            jwt_secret: JwtSecret::new(SECRET.to_string(), "jwt")?,
            ..AuthPolicy::default()
        })
    }

    fn config(default_policy: AuthPolicy, stations: HashMap<String, AuthPolicy>) -> AuthConfig {
        AuthConfig {
            default_policy,
            stations,
            clock: Arc::new(ManualClock::new(NOW)),
            ..AuthConfig::default()
        }
    }

    async fn echo(Caller(caller): Caller, body: axum::body::Bytes) -> String {
        let who = match caller {
            CallerContext::User(identity) => identity.to_string(),
            CallerContext::Compat => "compat".to_string(),
        };
        format!("{}:{}", who, String::from_utf8_lossy(&body))
    }

    fn app(config: AuthConfig) -> Router {
        let state = AuthMiddlewareState::new(Arc::new(config));
        Router::new()
            .route("/stations/:station/produce/single", post(echo))
            .route_layer(from_fn_with_state(state, auth_middleware))
    }

    fn request(station: &str, headers: &[(&str, &str)], body: &str) -> Request {
        let mut builder = Request::builder()
            .method("POST")
            .uri(format!("/stations/{}/produce/single", station));
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder
            .body(Body::from(body.to_string()))
            .expect("request should build")
    }

    async fn send(app: Router, request: Request) -> (StatusCode, String) {
        let response = app.oneshot(request).await.expect("router is infallible");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body should read");
        (status, String::from_utf8_lossy(&body).to_string())
    }

    #[test]
    fn test_compat_username_is_root() {
        let broker = BrokerConfig::default();
        assert_eq!(CallerContext::Compat.username(&broker), "root");
        assert_eq!(CallerContext::User(alice()).username(&broker), "alice");
    }

    #[tokio::test]
    async fn test_jwt_sets_user_identity() -> Result<(), ApiError> {
        let policy = jwt_policy()?;
        let config = config(policy.clone(), HashMap::new());
        let tokens = config.issue_tokens(&policy, &alice(), None, None)?;

        let bearer = format!("Bearer {}", tokens.jwt);
        let (status, body) = send(
            app(config),
            request("orders", &[("authorization", bearer.as_str())], "hi"),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "1/alice:hi");
        Ok(())
    }

    #[tokio::test]
    async fn test_jwt_missing_header_is_unauthorized() -> Result<(), ApiError> {
        let (status, body) = send(
            app(config(jwt_policy()?, HashMap::new())),
            request("orders", &[], ""),
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let error: ApiError = serde_json::from_str(&body)?;
        assert_eq!(error.code, ErrorCode::Unauthorized);
        Ok(())
    }

    #[tokio::test]
    async fn test_jwt_garbage_token_is_rejected() -> Result<(), ApiError> {
        let (status, _) = send(
            app(config(jwt_policy()?, HashMap::new())),
            request("orders", &[("authorization", "Bearer not-a-jwt")], ""),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_station_override_uses_api_token() -> Result<(), ApiError> {
        let api_policy = AuthPolicy {
            method: AuthMethod::ApiToken,
            api_token: Some(SecretString::from("letmein".to_string())),
            ..AuthPolicy::default()
        };
        let stations = HashMap::from([("metrics".to_string(), api_policy)]);
        let config = config(jwt_policy()?, stations);

        let (status, body) = send(
            app(config.clone()),
            request("metrics", &[("x-api-token", "letmein")], "m"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "compat:m");

        let (status, _) = send(
            app(config.clone()),
            request("metrics", &[("x-api-token", "wrong")], "m"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        // Other stations still require a JWT
        let (status, _) = send(
            app(config),
            request("orders", &[("x-api-token", "letmein")], "m"),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_encoded_station_name_selects_its_override() -> Result<(), ApiError> {
        let open = AuthPolicy {
            method: AuthMethod::None,
            ..AuthPolicy::default()
        };
        let stations = HashMap::from([("secure".to_string(), jwt_policy()?)]);
        let config = config(open, stations);

        for station in ["secure", "secur%65", "%73%65%63%75%72%65"] {
            let (status, _) = send(app(config.clone()), request(station, &[], "x")).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED, "station: {}", station);
        }

        let (status, body) = send(app(config), request("open", &[], "x")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "compat:x");
        Ok(())
    }

    #[tokio::test]
    async fn test_hmac_verifies_and_preserves_body() -> Result<(), ApiError> {
        let policy = AuthPolicy {
            method: AuthMethod::HmacToken,
            hmac_secret: Some(SecretString::from("hmac-key".to_string())),
            hmac_hash: HmacHash::Sha256,
            ..AuthPolicy::default()
        };
        let config = config(policy, HashMap::new());
        let signature = sign_body(HmacHash::Sha256, "hmac-key", b"{\"a\":1}")?;

        let (status, body) = send(
            app(config.clone()),
            request(
                "orders",
                &[("x-hmac-signature", signature.as_str())],
                "{\"a\":1}",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "compat:{\"a\":1}");

        let (status, _) = send(
            app(config),
            request(
                "orders",
                &[("x-hmac-signature", signature.as_str())],
                "{\"a\":2}",
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        Ok(())
    }

    #[tokio::test]
    async fn test_none_is_compat() {
        let policy = AuthPolicy {
            method: AuthMethod::None,
            ..AuthPolicy::default()
        };
        let (status, body) = send(app(config(policy, HashMap::new())), request("s", &[], "x")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "compat:x");
    }
}
