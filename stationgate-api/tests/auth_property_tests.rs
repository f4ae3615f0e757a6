//! Property-Based Tests for Station Authentication
//!
//! For any request to a station route:
//! - a token the gateway issued, presented before it expires, is accepted and
//!   the handler sees the token's identity
//! - anything else under the JWT policy is rejected with 401
//! - under an API-token station override, only the exact configured token
//!   passes

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    middleware,
    routing::get,
    Router,
};
use proptest::prelude::*;
use secrecy::SecretString;
use stationgate_api::auth::JwtSecret;
use stationgate_api::middleware::Caller;
use stationgate_api::{auth_middleware, AuthConfig, AuthMethod, AuthMiddlewareState, AuthPolicy};
use stationgate_core::IdentityKey;
use stationgate_test_utils::fixtures::NOW;
use stationgate_test_utils::generators::arb_identity_key;
use stationgate_test_utils::ManualClock;
use tower::ServiceExt;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

const ACCESS_SECRET: &str = "property-access-secret-0123456789abcdef";
const OTHER_SECRET: &str = "some-other-gateway-secret-0123456789ab";
const API_TOKEN: &str = "property-api-token";
const TOKEN_STATION: &str = "sensors";

fn jwt_policy(secret: &str) -> AuthPolicy {
    AuthPolicy {
        method: AuthMethod::Jwt,
        jwt_secret: JwtSecret::new(secret.to_string(), "jwt").expect("secret is non-empty"),
        refresh_jwt_secret: JwtSecret::new(format!("{}-refresh", secret), "refresh")
            .expect("secret is non-empty"),
        ..AuthPolicy::default()
    }
}

fn auth_config(clock: &ManualClock) -> AuthConfig {
    let token_policy = AuthPolicy {
        method: AuthMethod::ApiToken,
        api_token: Some(SecretString::from(API_TOKEN.to_string())),
        ..jwt_policy(ACCESS_SECRET)
    };
    AuthConfig {
        default_policy: jwt_policy(ACCESS_SECRET),
        stations: HashMap::from([(TOKEN_STATION.to_string(), token_policy)]),
        clock: Arc::new(clock.clone()),
        ..AuthConfig::default()
    }
}

/// Echoes the caller the middleware resolved.
async fn whoami(Caller(caller): Caller) -> String {
    format!("{:?}", caller)
}

fn test_app(config: AuthConfig) -> Router {
    let auth_state = AuthMiddlewareState::new(Arc::new(config));
    Router::new()
        .route("/stations/:station/whoami", get(whoami))
        .route_layer(middleware::from_fn_with_state(auth_state, auth_middleware))
}

async fn call(app: Router, uri: &str, header: Option<(&str, String)>) -> (StatusCode, String) {
    let mut builder = Request::builder().uri(uri);
    if let Some((name, value)) = header {
        builder = builder.header(name, value);
    }
    let request = builder.body(Body::empty()).expect("request should build");
    let response = app.oneshot(request).await.expect("router is infallible");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should read");
    (status, String::from_utf8_lossy(&body).into_owned())
}

fn issue(config: &AuthConfig, policy: &AuthPolicy, identity: &IdentityKey) -> String {
    config
        .issue_tokens(policy, identity, None, None)
        .expect("token issuance should succeed")
        .jwt
}

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

#[derive(Debug, Clone)]
enum BadCredential {
    /// Well-formed JWT signed by a different gateway
    ForeignSignature(IdentityKey),
    /// Three dot-separated segments that are not a JWT
    Garbage(String),
    /// Authorization header without the Bearer scheme
    WrongScheme(String),
    /// No Authorization header at all
    Missing,
}

fn bad_credential_strategy() -> impl Strategy<Value = BadCredential> {
    prop_oneof![
        arb_identity_key().prop_map(BadCredential::ForeignSignature),
        "[A-Za-z0-9_-]{10,60}\\.[A-Za-z0-9_-]{10,60}\\.[A-Za-z0-9_-]{10,60}"
            .prop_map(BadCredential::Garbage),
        "(Basic|Token|bearer) [A-Za-z0-9_-]{10,40}".prop_map(BadCredential::WrongScheme),
        Just(BadCredential::Missing),
    ]
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime should build")
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// A freshly issued token resolves to exactly the identity it was issued for.
    #[test]
    fn prop_issued_token_resolves_to_its_identity(identity in arb_identity_key()) {
        let clock = ManualClock::new(NOW);
        let config = auth_config(&clock);
        let token = issue(&config, &config.default_policy, &identity);
        let app = test_app(config);

        let (status, body) = runtime().block_on(call(
            app,
            "/stations/orders/whoami",
            Some(("authorization", format!("Bearer {}", token))),
        ));

        prop_assert_eq!(status, StatusCode::OK);
        prop_assert_eq!(body, format!("{:?}", stationgate_api::CallerContext::User(identity)));
    }

    /// Tokens stop working once they are past expiry plus the clock skew.
    #[test]
    fn prop_expired_token_is_rejected(identity in arb_identity_key(), late_by in 1i64..86_400) {
        let clock = ManualClock::new(NOW);
        let config = auth_config(&clock);
        let issued = config
            .issue_tokens(&config.default_policy, &identity, None, None)
            .expect("token issuance should succeed");
        clock.set(issued.access_expires_at + config.clock_skew_secs + late_by);
        let app = test_app(config);

        let (status, _) = runtime().block_on(call(
            app,
            "/stations/orders/whoami",
            Some(("authorization", format!("Bearer {}", issued.jwt))),
        ));

        prop_assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    /// Anything other than a valid gateway-issued token is a 401.
    #[test]
    fn prop_bad_credentials_are_rejected(credential in bad_credential_strategy()) {
        let clock = ManualClock::new(NOW);
        let config = auth_config(&clock);
        let header = match &credential {
            BadCredential::ForeignSignature(identity) => {
                let foreign = jwt_policy(OTHER_SECRET);
                let token = issue(&config, &foreign, identity);
                Some(("authorization", format!("Bearer {}", token)))
            }
            BadCredential::Garbage(token) => {
                Some(("authorization", format!("Bearer {}", token)))
            }
            BadCredential::WrongScheme(value) => Some(("authorization", value.clone())),
            BadCredential::Missing => None,
        };
        let app = test_app(config);

        let (status, _) = runtime().block_on(call(app, "/stations/orders/whoami", header));

        prop_assert_eq!(status, StatusCode::UNAUTHORIZED, "credential: {:?}", credential);
    }

    /// The API-token station accepts only its exact token and acts as root.
    #[test]
    fn prop_station_api_token_must_match(candidate in "[a-z-]{1,30}") {
        let clock = ManualClock::new(NOW);
        let app = test_app(auth_config(&clock));
        let uri = format!("/stations/{}/whoami", TOKEN_STATION);

        let (status, body) = runtime().block_on(call(
            app,
            &uri,
            Some(("x-api-token", candidate.clone())),
        ));

        if candidate == API_TOKEN {
            prop_assert_eq!(status, StatusCode::OK);
            prop_assert_eq!(body, "Compat");
        } else {
            prop_assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
    }
}

#[tokio::test]
async fn test_exact_api_token_is_accepted() {
    let clock = ManualClock::new(NOW);
    let app = test_app(auth_config(&clock));

    let (status, body) = call(
        app,
        "/stations/sensors/whoami",
        Some(("x-api-token", API_TOKEN.to_string())),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "Compat");
}
