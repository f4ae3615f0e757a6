//! Authentication Module
//!
//! Station routes authenticate with one of four methods:
//! 1. JWT access tokens issued by `/auth/authenticate` (Authorization: Bearer)
//! 2. A static API token in a configurable header
//! 3. A hex HMAC of the request body in a configurable header
//! 4. No authentication at all
//!
//! The method, secrets, and token lifetimes form an [`AuthPolicy`]. One policy
//! applies globally; stations listed in the stations file may override it.

use crate::constants::{
    DEFAULT_API_TOKEN_HEADER, DEFAULT_HMAC_HEADER, DEFAULT_JWT_CLOCK_SKEW_SECS,
    DEFAULT_JWT_EXPIRES_IN_MINUTES, DEFAULT_REFRESH_JWT_EXPIRES_IN_MINUTES,
    INSECURE_DEFAULT_SECRET, MIN_JWT_SECRET_LENGTH,
};
use crate::error::{ApiError, ApiResult};
use hmac::{Hmac, Mac};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use stationgate_core::{Clock, ConfigError, IdentityKey, SystemClock, TenantId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;
type HmacSha512 = Hmac<Sha512>;

// ============================================================================
// JWT SECRET (TYPE-SAFE)
// ============================================================================

/// JWT signing secret that never shows up in logs.
#[derive(Clone)]
pub struct JwtSecret(SecretString);

impl JwtSecret {
    /// # Errors
    /// Returns error if the secret is empty.
    pub fn new(secret: String, field: &str) -> Result<Self, ConfigError> {
        if secret.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: field.to_string(),
            });
        }
        Ok(Self(SecretString::new(secret.into_boxed_str())))
    }

    fn insecure_default() -> Self {
        Self(SecretString::new(
            INSECURE_DEFAULT_SECRET.to_string().into_boxed_str(),
        ))
    }

    /// Expose the secret value (only for signing and verification).
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.0.expose_secret().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    pub fn is_insecure_default(&self) -> bool {
        self.0.expose_secret() == INSECURE_DEFAULT_SECRET
    }
}

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JwtSecret([REDACTED, {} chars])", self.len())
    }
}

/// Read a JWT secret from the environment, falling back to the insecure
/// placeholder (rejected in production by [`AuthPolicy::validate`]).
fn jwt_secret_from_env(var: &str) -> JwtSecret {
    std::env::var(var)
        .ok()
        .and_then(|s| JwtSecret::new(s, var).ok())
        .unwrap_or_else(JwtSecret::insecure_default)
}

fn secret_from_env(var: &str) -> Option<SecretString> {
    std::env::var(var)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(|s| SecretString::new(s.into_boxed_str()))
}

// ============================================================================
// METHOD SELECTION
// ============================================================================

/// How station routes authenticate callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    #[default]
    Jwt,
    ApiToken,
    HmacToken,
    None,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Jwt => "jwt",
            AuthMethod::ApiToken => "api_token",
            AuthMethod::HmacToken => "hmac_token",
            AuthMethod::None => "none",
        }
    }

    /// Whether requests authenticated this way carry a user identity.
    pub fn carries_identity(&self) -> bool {
        matches!(self, AuthMethod::Jwt)
    }
}

impl std::str::FromStr for AuthMethod {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "jwt" => Ok(AuthMethod::Jwt),
            "api_token" => Ok(AuthMethod::ApiToken),
            "hmac_token" | "hmac" => Ok(AuthMethod::HmacToken),
            "none" => Ok(AuthMethod::None),
            other => Err(ConfigError::InvalidValue {
                field: "auth_method".to_string(),
                value: other.to_string(),
                reason: "expected one of jwt, api_token, hmac_token, none".to_string(),
            }),
        }
    }
}

/// Digest used for HMAC request signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HmacHash {
    #[default]
    Sha256,
    Sha512,
}

impl std::str::FromStr for HmacHash {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sha256" => Ok(HmacHash::Sha256),
            "sha512" => Ok(HmacHash::Sha512),
            other => Err(ConfigError::InvalidValue {
                field: "hmac_hash".to_string(),
                value: other.to_string(),
                reason: "expected sha256 or sha512".to_string(),
            }),
        }
    }
}

// ============================================================================
// POLICY
// ============================================================================

/// Authentication settings applied to one station (or globally).
#[derive(Clone)]
pub struct AuthPolicy {
    pub method: AuthMethod,
    pub jwt_secret: JwtSecret,
    pub refresh_jwt_secret: JwtSecret,
    pub jwt_expires_in_minutes: i64,
    pub refresh_jwt_expires_in_minutes: i64,
    pub api_token: Option<SecretString>,
    pub api_token_header: String,
    pub hmac_secret: Option<SecretString>,
    pub hmac_header: String,
    pub hmac_hash: HmacHash,
}

impl std::fmt::Debug for AuthPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthPolicy")
            .field("method", &self.method)
            .field("jwt_secret", &self.jwt_secret)
            .field("refresh_jwt_secret", &self.refresh_jwt_secret)
            .field("jwt_expires_in_minutes", &self.jwt_expires_in_minutes)
            .field(
                "refresh_jwt_expires_in_minutes",
                &self.refresh_jwt_expires_in_minutes,
            )
            .field("api_token", &self.api_token.as_ref().map(|_| "[REDACTED]"))
            .field("api_token_header", &self.api_token_header)
            .field("hmac_secret", &self.hmac_secret.as_ref().map(|_| "[REDACTED]"))
            .field("hmac_header", &self.hmac_header)
            .field("hmac_hash", &self.hmac_hash)
            .finish()
    }
}

impl Default for AuthPolicy {
    fn default() -> Self {
        Self {
            method: AuthMethod::default(),
            jwt_secret: JwtSecret::insecure_default(),
            refresh_jwt_secret: JwtSecret::insecure_default(),
            jwt_expires_in_minutes: DEFAULT_JWT_EXPIRES_IN_MINUTES,
            refresh_jwt_expires_in_minutes: DEFAULT_REFRESH_JWT_EXPIRES_IN_MINUTES,
            api_token: None,
            api_token_header: DEFAULT_API_TOKEN_HEADER.to_string(),
            hmac_secret: None,
            hmac_header: DEFAULT_HMAC_HEADER.to_string(),
            hmac_hash: HmacHash::default(),
        }
    }
}

impl AuthPolicy {
    /// Build the global policy from environment variables.
    ///
    /// # Environment Variables
    /// - `STATIONGATE_AUTH_METHOD`: `jwt` | `api_token` | `hmac_token` | `none`
    /// - `STATIONGATE_JWT_SECRET`, `STATIONGATE_REFRESH_JWT_SECRET`
    /// - `STATIONGATE_JWT_EXPIRES_IN_MINUTES` (default: 15)
    /// - `STATIONGATE_REFRESH_JWT_EXPIRES_IN_MINUTES` (default: 300)
    /// - `STATIONGATE_API_TOKEN`, `STATIONGATE_API_TOKEN_HEADER`
    /// - `STATIONGATE_HMAC_SECRET`, `STATIONGATE_HMAC_HEADER`, `STATIONGATE_HMAC_HASH`
    pub fn from_env() -> Result<Self, ConfigError> {
        let method = match std::env::var("STATIONGATE_AUTH_METHOD") {
            Ok(value) => value.parse()?,
            Err(_) => AuthMethod::default(),
        };
        let hmac_hash = match std::env::var("STATIONGATE_HMAC_HASH") {
            Ok(value) => value.parse()?,
            Err(_) => HmacHash::default(),
        };

        Ok(Self {
            method,
            jwt_secret: jwt_secret_from_env("STATIONGATE_JWT_SECRET"),
            refresh_jwt_secret: jwt_secret_from_env("STATIONGATE_REFRESH_JWT_SECRET"),
            jwt_expires_in_minutes: std::env::var("STATIONGATE_JWT_EXPIRES_IN_MINUTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_JWT_EXPIRES_IN_MINUTES),
            refresh_jwt_expires_in_minutes: std::env::var(
                "STATIONGATE_REFRESH_JWT_EXPIRES_IN_MINUTES",
            )
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_REFRESH_JWT_EXPIRES_IN_MINUTES),
            api_token: secret_from_env("STATIONGATE_API_TOKEN"),
            api_token_header: std::env::var("STATIONGATE_API_TOKEN_HEADER")
                .map(|h| h.trim().to_lowercase())
                .unwrap_or_else(|_| DEFAULT_API_TOKEN_HEADER.to_string()),
            hmac_secret: secret_from_env("STATIONGATE_HMAC_SECRET"),
            hmac_header: std::env::var("STATIONGATE_HMAC_HEADER")
                .map(|h| h.trim().to_lowercase())
                .unwrap_or_else(|_| DEFAULT_HMAC_HEADER.to_string()),
            hmac_hash,
        })
    }

    /// Reject incomplete method settings. Insecure JWT secrets are an error in
    /// production and a warning otherwise.
    pub fn validate(&self, scope: &str, is_production: bool) -> Result<(), ConfigError> {
        match self.method {
            AuthMethod::Jwt => {
                check_jwt_secret(&self.jwt_secret, scope, "jwt_secret", is_production)?;
                check_jwt_secret(
                    &self.refresh_jwt_secret,
                    scope,
                    "refresh_jwt_secret",
                    is_production,
                )?;
                if self.jwt_expires_in_minutes <= 0 || self.refresh_jwt_expires_in_minutes <= 0 {
                    return Err(ConfigError::InvalidValue {
                        field: format!("{}.jwt_expires_in_minutes", scope),
                        value: format!(
                            "{}/{}",
                            self.jwt_expires_in_minutes, self.refresh_jwt_expires_in_minutes
                        ),
                        reason: "token lifetimes must be positive".to_string(),
                    });
                }
            }
            AuthMethod::ApiToken => {
                if self.api_token.is_none() {
                    return Err(missing(scope, "api_token"));
                }
                if self.api_token_header.is_empty() {
                    return Err(missing(scope, "api_token_header"));
                }
            }
            AuthMethod::HmacToken => {
                if self.hmac_secret.is_none() {
                    return Err(missing(scope, "hmac_secret"));
                }
                if self.hmac_header.is_empty() {
                    return Err(missing(scope, "hmac_header"));
                }
            }
            AuthMethod::None => {
                if is_production {
                    tracing::warn!(scope, "Authentication is disabled in production");
                }
            }
        }
        Ok(())
    }
}

fn missing(scope: &str, field: &str) -> ConfigError {
    ConfigError::MissingRequired {
        field: format!("{}.{}", scope, field),
    }
}

fn check_jwt_secret(
    secret: &JwtSecret,
    scope: &str,
    field: &str,
    is_production: bool,
) -> Result<(), ConfigError> {
    let qualified = format!("{}.{}", scope, field);

    if secret.is_insecure_default() {
        if is_production {
            return Err(ConfigError::InvalidValue {
                field: qualified,
                value: "[default]".to_string(),
                reason: "insecure default secret cannot be used in production".to_string(),
            });
        }
        tracing::warn!(
            field = %qualified,
            "Using insecure default JWT secret. Acceptable for local development only."
        );
        return Ok(());
    }

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        if is_production {
            return Err(ConfigError::InvalidValue {
                field: qualified,
                value: format!("[{} chars]", secret.len()),
                reason: format!("must be at least {} characters", MIN_JWT_SECRET_LENGTH),
            });
        }
        tracing::warn!(
            field = %qualified,
            length = secret.len(),
            "JWT secret is short. Use at least {} characters in production.",
            MIN_JWT_SECRET_LENGTH
        );
    }
    Ok(())
}

// ============================================================================
// PER-STATION OVERRIDES
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StationsFile {
    #[serde(default)]
    stations: Vec<StationOverride>,
}

/// One `[[stations]]` entry. Unset fields inherit from the global policy.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StationOverride {
    name: String,
    auth_method: AuthMethod,
    jwt_secret: Option<String>,
    refresh_jwt_secret: Option<String>,
    jwt_expires_in_minutes: Option<i64>,
    refresh_jwt_expires_in_minutes: Option<i64>,
    api_token: Option<String>,
    api_token_header: Option<String>,
    hmac_secret: Option<String>,
    hmac_header: Option<String>,
    hmac_hash: Option<HmacHash>,
}

impl StationOverride {
    fn into_policy(self, base: &AuthPolicy) -> Result<(String, AuthPolicy), ConfigError> {
        let mut policy = base.clone();
        policy.method = self.auth_method;
        if let Some(secret) = self.jwt_secret {
            policy.jwt_secret = JwtSecret::new(secret, "jwt_secret")?;
        }
        if let Some(secret) = self.refresh_jwt_secret {
            policy.refresh_jwt_secret = JwtSecret::new(secret, "refresh_jwt_secret")?;
        }
        if let Some(minutes) = self.jwt_expires_in_minutes {
            policy.jwt_expires_in_minutes = minutes;
        }
        if let Some(minutes) = self.refresh_jwt_expires_in_minutes {
            policy.refresh_jwt_expires_in_minutes = minutes;
        }
        if let Some(token) = self.api_token {
            policy.api_token = Some(SecretString::new(token.into_boxed_str()));
        }
        if let Some(header) = self.api_token_header {
            policy.api_token_header = header.trim().to_lowercase();
        }
        if let Some(secret) = self.hmac_secret {
            policy.hmac_secret = Some(SecretString::new(secret.into_boxed_str()));
        }
        if let Some(header) = self.hmac_header {
            policy.hmac_header = header.trim().to_lowercase();
        }
        if let Some(hash) = self.hmac_hash {
            policy.hmac_hash = hash;
        }
        Ok((self.name, policy))
    }
}

/// Parse a stations TOML document into per-station policies.
pub fn parse_station_overrides(
    source: &str,
    path: &str,
    base: &AuthPolicy,
) -> Result<HashMap<String, AuthPolicy>, ConfigError> {
    let file: StationsFile = toml::from_str(source).map_err(|e| ConfigError::Parse {
        path: path.to_string(),
        reason: e.to_string(),
    })?;

    let mut overrides = HashMap::with_capacity(file.stations.len());
    for entry in file.stations {
        let (name, policy) = entry.into_policy(base)?;
        if name.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: format!("{}: stations.name", path),
            });
        }
        if overrides.insert(name.clone(), policy).is_some() {
            return Err(ConfigError::InvalidValue {
                field: "stations.name".to_string(),
                value: name,
                reason: "station listed more than once".to_string(),
            });
        }
    }
    Ok(overrides)
}

/// Load per-station policies from a TOML file.
pub fn load_station_overrides(
    path: &Path,
    base: &AuthPolicy,
) -> Result<HashMap<String, AuthPolicy>, ConfigError> {
    let display = path.display().to_string();
    let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: display.clone(),
        reason: e.to_string(),
    })?;
    parse_station_overrides(&source, &display, base)
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Authentication configuration: the global policy plus station overrides.
#[derive(Clone)]
pub struct AuthConfig {
    pub default_policy: AuthPolicy,

    /// Station name -> overriding policy
    pub stations: HashMap<String, AuthPolicy>,

    /// JWT clock skew tolerance in seconds (default: 60)
    pub clock_skew_secs: i64,

    /// Clock for token issuance and time validation (injected for testing)
    pub clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("default_policy", &self.default_policy)
            .field("stations", &format!("[{} overrides]", self.stations.len()))
            .field("clock_skew_secs", &self.clock_skew_secs)
            .field("clock", &"<Clock>")
            .finish()
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            default_policy: AuthPolicy::default(),
            stations: HashMap::new(),
            clock_skew_secs: DEFAULT_JWT_CLOCK_SKEW_SECS,
            clock: Arc::new(SystemClock),
        }
    }
}

impl AuthConfig {
    /// Create authentication configuration from environment variables.
    ///
    /// Besides the policy variables read by [`AuthPolicy::from_env`]:
    /// - `STATIONGATE_JWT_CLOCK_SKEW_SECS` (default: 60)
    /// - `STATIONGATE_STATIONS_FILE`: optional TOML file of station overrides
    pub fn from_env() -> Result<Self, ConfigError> {
        let default_policy = AuthPolicy::from_env()?;
        let stations = match std::env::var("STATIONGATE_STATIONS_FILE") {
            Ok(path) if !path.trim().is_empty() => {
                load_station_overrides(Path::new(path.trim()), &default_policy)?
            }
            _ => HashMap::new(),
        };

        Ok(Self {
            default_policy,
            stations,
            clock_skew_secs: std::env::var("STATIONGATE_JWT_CLOCK_SKEW_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_JWT_CLOCK_SKEW_SECS),
            clock: Arc::new(SystemClock),
        })
    }

    /// Validate the global policy and every station override.
    pub fn validate(&self, is_production: bool) -> Result<(), ConfigError> {
        self.default_policy.validate("auth", is_production)?;
        for (name, policy) in &self.stations {
            policy.validate(&format!("stations.{}", name), is_production)?;
        }
        Ok(())
    }

    /// Policy governing `station`, or the global policy.
    pub fn policy_for(&self, station: Option<&str>) -> &AuthPolicy {
        station
            .and_then(|name| self.stations.get(name))
            .unwrap_or(&self.default_policy)
    }

    pub fn now(&self) -> i64 {
        self.clock.now_epoch_secs()
    }

    /// Issue an access/refresh token pair for `identity`.
    ///
    /// Lifetimes default to the policy's; the refresh token carries a fresh
    /// session reference and no credential material.
    pub fn issue_tokens(
        &self,
        policy: &AuthPolicy,
        identity: &IdentityKey,
        access_minutes: Option<i64>,
        refresh_minutes: Option<i64>,
    ) -> ApiResult<IssuedTokens> {
        let access_minutes = access_minutes.unwrap_or(policy.jwt_expires_in_minutes);
        let refresh_minutes = refresh_minutes.unwrap_or(policy.refresh_jwt_expires_in_minutes);
        if access_minutes <= 0 {
            return Err(ApiError::invalid_input(
                "token_expiry_in_minutes must be positive",
            ));
        }
        if refresh_minutes <= 0 {
            return Err(ApiError::invalid_input(
                "refresh_token_expiry_in_minutes must be positive",
            ));
        }

        let now = self.now();
        let access = Claims {
            sub: identity.username().to_string(),
            account_id: identity.tenant_id().as_i64(),
            iat: now,
            exp: now + access_minutes * 60,
        };
        let refresh = RefreshClaims {
            sub: identity.username().to_string(),
            account_id: identity.tenant_id().as_i64(),
            iat: now,
            exp: now + refresh_minutes * 60,
            sid: Uuid::new_v4().to_string(),
        };

        Ok(IssuedTokens {
            jwt: sign(&policy.jwt_secret, &access)?,
            jwt_refresh_token: sign(&policy.refresh_jwt_secret, &refresh)?,
            access_expires_at: access.exp,
            refresh_expires_at: refresh.exp,
            session_id: refresh.sid,
            expires_in_ms: access_minutes * 60 * 1000,
            refresh_expires_in_ms: refresh_minutes * 60 * 1000,
        })
    }

    /// Validate an access token and extract its claims.
    pub fn validate_access_token(&self, policy: &AuthPolicy, token: &str) -> ApiResult<Claims> {
        self.validate_token(&policy.jwt_secret, token)
    }

    /// Validate a refresh token and extract its claims.
    pub fn validate_refresh_token(
        &self,
        policy: &AuthPolicy,
        token: &str,
    ) -> ApiResult<RefreshClaims> {
        self.validate_token(&policy.refresh_jwt_secret, token)
    }

    /// Signature validation only is delegated to `jsonwebtoken`; time
    /// validation runs against the injected clock.
    fn validate_token<T: DeserializeOwned + Expiring>(
        &self,
        secret: &JwtSecret,
        token: &str,
    ) -> ApiResult<T> {
        let decoding_key = DecodingKey::from_secret(secret.expose().as_bytes());

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = false;
        validation.validate_nbf = false;
        validation.required_spec_claims = std::collections::HashSet::from(["exp".to_string()]);

        let token_data =
            decode::<T>(token, &decoding_key, &validation).map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::InvalidToken => {
                    ApiError::invalid_token("Token is invalid")
                }
                jsonwebtoken::errors::ErrorKind::InvalidSignature => {
                    ApiError::invalid_token("Token signature is invalid")
                }
                _ => ApiError::invalid_token(format!("Token validation failed: {}", e)),
            })?;

        let claims = token_data.claims;
        let now = self.now();

        // A pre-epoch clock means the host time is broken, not the token.
        if now < 0 {
            tracing::error!(
                timestamp = now,
                "System clock returned pre-epoch time - server time is broken"
            );
            return Err(ApiError::internal_error(
                "Server time configuration error - please contact support",
            ));
        }

        validate_claim_times(now, claims.exp(), self.clock_skew_secs)?;
        Ok(claims)
    }
}

fn sign<T: Serialize>(secret: &JwtSecret, claims: &T) -> ApiResult<String> {
    let encoding_key = EncodingKey::from_secret(secret.expose().as_bytes());
    encode(&Header::new(Algorithm::HS256), claims, &encoding_key)
        .map_err(|e| ApiError::internal_error(format!("Failed to generate token: {}", e)))
}

fn validate_claim_times(now: i64, exp: i64, leeway_secs: i64) -> ApiResult<()> {
    if exp < now - leeway_secs {
        return Err(ApiError::token_expired());
    }
    Ok(())
}

// ============================================================================
// JWT CLAIMS
// ============================================================================

trait Expiring {
    fn exp(&self) -> i64;
}

/// Access token claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Username
    pub sub: String,
    /// Broker account (tenant) id
    pub account_id: i64,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(TenantId::new(self.account_id), &self.sub)
    }
}

impl Expiring for Claims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

/// Refresh token claims. `sid` references a server-side session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub sub: String,
    pub account_id: i64,
    pub iat: i64,
    pub exp: i64,
    pub sid: String,
}

impl RefreshClaims {
    pub fn identity(&self) -> IdentityKey {
        IdentityKey::new(TenantId::new(self.account_id), &self.sub)
    }
}

impl Expiring for RefreshClaims {
    fn exp(&self) -> i64 {
        self.exp
    }
}

/// Result of [`AuthConfig::issue_tokens`].
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub jwt: String,
    pub jwt_refresh_token: String,
    /// Unix seconds
    pub access_expires_at: i64,
    /// Unix seconds
    pub refresh_expires_at: i64,
    pub session_id: String,
    pub expires_in_ms: i64,
    pub refresh_expires_in_ms: i64,
}

// ============================================================================
// STATIC TOKEN AND HMAC CHECKS
// ============================================================================

/// Compare a presented API token against the configured one in constant time.
///
/// Both values are reduced to fixed-length MACs first so the comparison does
/// not leak the expected token's length.
pub fn verify_api_token(expected: &SecretString, presented: &str) -> ApiResult<()> {
    let mut expected_mac = HmacSha256::new_from_slice(b"stationgate-api-token")
        .map_err(|_| ApiError::internal_error("Failed to initialize HMAC"))?;
    expected_mac.update(expected.expose_secret().as_bytes());
    let expected_tag = expected_mac.finalize().into_bytes();

    let mut presented_mac = HmacSha256::new_from_slice(b"stationgate-api-token")
        .map_err(|_| ApiError::internal_error("Failed to initialize HMAC"))?;
    presented_mac.update(presented.as_bytes());

    presented_mac
        .verify_slice(&expected_tag)
        .map_err(|_| ApiError::unauthorized("Invalid API token"))
}

/// Verify a hex HMAC signature of `body`.
pub fn verify_hmac_signature(
    hash: HmacHash,
    secret: &SecretString,
    body: &[u8],
    signature_hex: &str,
) -> ApiResult<()> {
    let expected = hex::decode(signature_hex.trim())
        .map_err(|_| ApiError::unauthorized("Invalid HMAC signature encoding"))?;
    let key = secret.expose_secret().as_bytes();

    let verified = match hash {
        HmacHash::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(key)
                .map_err(|_| ApiError::internal_error("Failed to initialize HMAC"))?;
            mac.update(body);
            mac.verify_slice(&expected).is_ok()
        }
        HmacHash::Sha512 => {
            let mut mac = HmacSha512::new_from_slice(key)
                .map_err(|_| ApiError::internal_error("Failed to initialize HMAC"))?;
            mac.update(body);
            mac.verify_slice(&expected).is_ok()
        }
    };

    if verified {
        Ok(())
    } else {
        Err(ApiError::unauthorized("Invalid HMAC signature"))
    }
}

/// Hex HMAC of `body`, as a client would send it.
pub fn sign_body(hash: HmacHash, secret: &str, body: &[u8]) -> ApiResult<String> {
    let bytes = match hash {
        HmacHash::Sha256 => {
            let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
                .map_err(|_| ApiError::internal_error("Failed to initialize HMAC"))?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        HmacHash::Sha512 => {
            let mut mac = HmacSha512::new_from_slice(secret.as_bytes())
                .map_err(|_| ApiError::internal_error("Failed to initialize HMAC"))?;
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
    };
    Ok(hex::encode(bytes))
}

// ============================================================================
// TESTS
// ============================================================================
