//! Gateway Configuration Module
//!
//! Configuration is loaded from `STATIONGATE_*` environment variables with
//! development-friendly defaults, then checked once at startup by
//! [`GatewayConfig::validate`].

use crate::auth::AuthConfig;
use crate::constants::{
    DEFAULT_BROKER_HOST, DEFAULT_BROKER_MAX_RECONNECTS, DEFAULT_BROKER_RECONNECT_WAIT_MS,
    DEFAULT_CLIENT_NAME, DEFAULT_CONSUME_BATCH_SIZE, DEFAULT_CONSUME_MAX_BATCH_SIZE,
    DEFAULT_CONSUME_MAX_DELIVERIES, DEFAULT_CONSUME_MAX_WAIT_MS, DEFAULT_HTTP_BIND,
    DEFAULT_HTTP_PORT, DEFAULT_PRODUCER_NAME, DEFAULT_ROOT_USER,
};
use crate::jobs::{ConnectionReaperConfig, ConnectionSyncConfig};
use stationgate_core::{
    BrokerCredential, BrokerLogin, ConfigError, IdentityKey, TenantId, DEFAULT_TENANT_ID,
};
use stationgate_storage::BufferConfig;
use std::path::PathBuf;
use std::time::Duration;

fn env_flag(var: &str, default: bool) -> bool {
    std::env::var(var)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_path(var: &str) -> Option<PathBuf> {
    std::env::var(var)
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
}

// ============================================================================
// SERVER
// ============================================================================

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Identifies this replica in logs and `/monitoring/status`.
    pub instance_id: String,
    pub environment: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: DEFAULT_HTTP_BIND.to_string(),
            port: DEFAULT_HTTP_PORT,
            instance_id: uuid::Uuid::new_v4().to_string(),
            environment: "development".to_string(),
        }
    }
}

impl ServerConfig {
    /// Environment variables:
    /// - `STATIONGATE_HTTP_BIND` (default: 0.0.0.0)
    /// - `STATIONGATE_HTTP_PORT` (default: 4444)
    /// - `STATIONGATE_INSTANCE_ID` (default: random UUID)
    /// - `STATIONGATE_ENVIRONMENT` (default: development)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let port = match std::env::var("STATIONGATE_HTTP_PORT") {
            Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                field: "STATIONGATE_HTTP_PORT".to_string(),
                value: raw.clone(),
                reason: "must be a port number".to_string(),
            })?,
            Err(_) => defaults.port,
        };

        Ok(Self {
            bind: std::env::var("STATIONGATE_HTTP_BIND").unwrap_or(defaults.bind),
            port,
            instance_id: std::env::var("STATIONGATE_INSTANCE_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.instance_id),
            environment: std::env::var("STATIONGATE_ENVIRONMENT")
                .map(|e| e.trim().to_lowercase())
                .unwrap_or(defaults.environment),
        })
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.as_str(), "production" | "prod")
    }
}

// ============================================================================
// BROKER
// ============================================================================

#[derive(Debug, Clone)]
pub struct BrokerConfig {
    pub host: String,
    pub root_user: String,
    pub root_password: Option<String>,
    pub root_connection_token: Option<String>,
    /// Whether `/auth/authenticate` expects a password (true) or a
    /// connection token (false).
    pub user_pass_based_auth: bool,
    pub client_name: String,
    pub max_reconnects: usize,
    pub reconnect_wait: Duration,
    pub tls_cert: Option<PathBuf>,
    pub tls_key: Option<PathBuf>,
    pub tls_ca: Option<PathBuf>,
    pub producer_name: String,
    pub default_account_id: TenantId,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_BROKER_HOST.to_string(),
            root_user: DEFAULT_ROOT_USER.to_string(),
            root_password: None,
            root_connection_token: None,
            user_pass_based_auth: true,
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            max_reconnects: DEFAULT_BROKER_MAX_RECONNECTS,
            reconnect_wait: Duration::from_millis(DEFAULT_BROKER_RECONNECT_WAIT_MS),
            tls_cert: None,
            tls_key: None,
            tls_ca: None,
            producer_name: DEFAULT_PRODUCER_NAME.to_string(),
            default_account_id: DEFAULT_TENANT_ID,
        }
    }
}

impl BrokerConfig {
    /// Environment variables:
    /// - `STATIONGATE_BROKER_HOST` (default: localhost:6666)
    /// - `STATIONGATE_ROOT_USER` (default: root)
    /// - `STATIONGATE_ROOT_PASSWORD` / `STATIONGATE_ROOT_CONNECTION_TOKEN`
    /// - `STATIONGATE_USER_PASS_BASED_AUTH` (default: true)
    /// - `STATIONGATE_CLIENT_NAME`
    /// - `STATIONGATE_BROKER_MAX_RECONNECTS` (default: 10)
    /// - `STATIONGATE_BROKER_RECONNECT_WAIT_MS` (default: 3000)
    /// - `STATIONGATE_BROKER_TLS_CERT` / `_TLS_KEY` / `_TLS_CA`
    /// - `STATIONGATE_PRODUCER_NAME` (default: rest_gateway)
    /// - `STATIONGATE_DEFAULT_ACCOUNT_ID` (default: 1)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("STATIONGATE_BROKER_HOST").unwrap_or(defaults.host),
            root_user: std::env::var("STATIONGATE_ROOT_USER").unwrap_or(defaults.root_user),
            root_password: std::env::var("STATIONGATE_ROOT_PASSWORD")
                .ok()
                .filter(|s| !s.is_empty()),
            root_connection_token: std::env::var("STATIONGATE_ROOT_CONNECTION_TOKEN")
                .ok()
                .filter(|s| !s.is_empty()),
            user_pass_based_auth: env_flag(
                "STATIONGATE_USER_PASS_BASED_AUTH",
                defaults.user_pass_based_auth,
            ),
            client_name: std::env::var("STATIONGATE_CLIENT_NAME").unwrap_or(defaults.client_name),
            max_reconnects: std::env::var("STATIONGATE_BROKER_MAX_RECONNECTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_reconnects),
            reconnect_wait: std::env::var("STATIONGATE_BROKER_RECONNECT_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.reconnect_wait),
            tls_cert: env_path("STATIONGATE_BROKER_TLS_CERT"),
            tls_key: env_path("STATIONGATE_BROKER_TLS_KEY"),
            tls_ca: env_path("STATIONGATE_BROKER_TLS_CA"),
            producer_name: std::env::var("STATIONGATE_PRODUCER_NAME")
                .unwrap_or(defaults.producer_name),
            default_account_id: std::env::var("STATIONGATE_DEFAULT_ACCOUNT_ID")
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .map(TenantId::new)
                .unwrap_or(defaults.default_account_id),
        }
    }

    /// Root credential matching the configured auth style, if set.
    pub fn root_credential(&self) -> Option<BrokerCredential> {
        if self.user_pass_based_auth {
            self.root_password.clone().map(BrokerCredential::password)
        } else {
            self.root_connection_token
                .clone()
                .map(BrokerCredential::connection_token)
        }
    }

    pub fn root_identity(&self) -> IdentityKey {
        IdentityKey::new(self.default_account_id, &self.root_user)
    }

    /// Login for the root identity, used by the control plane and by
    /// unauthenticated-compatibility requests.
    pub fn root_login(&self) -> Result<BrokerLogin, ConfigError> {
        let credential = self.root_credential().ok_or_else(|| {
            ConfigError::MissingRequired {
                field: if self.user_pass_based_auth {
                    "STATIONGATE_ROOT_PASSWORD".to_string()
                } else {
                    "STATIONGATE_ROOT_CONNECTION_TOKEN".to_string()
                },
            }
        })?;
        Ok(BrokerLogin::new(self.root_identity(), credential))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "STATIONGATE_BROKER_HOST".to_string(),
            });
        }
        if self.root_user.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "STATIONGATE_ROOT_USER".to_string(),
            });
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ConfigError::InvalidValue {
                field: "STATIONGATE_BROKER_TLS_CERT".to_string(),
                value: "[partial]".to_string(),
                reason: "client certificate and key must be set together".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// CONSUME DEFAULTS
// ============================================================================

#[derive(Debug, Clone)]
pub struct ConsumeConfig {
    pub default_batch_size: usize,
    pub default_max_wait: Duration,
    pub default_max_deliveries: u32,
    pub max_batch_size: usize,
}

impl Default for ConsumeConfig {
    fn default() -> Self {
        Self {
            default_batch_size: DEFAULT_CONSUME_BATCH_SIZE,
            default_max_wait: Duration::from_millis(DEFAULT_CONSUME_MAX_WAIT_MS),
            default_max_deliveries: DEFAULT_CONSUME_MAX_DELIVERIES,
            max_batch_size: DEFAULT_CONSUME_MAX_BATCH_SIZE,
        }
    }
}

impl ConsumeConfig {
    /// Environment variables:
    /// - `STATIONGATE_CONSUME_BATCH_SIZE` (default: 10)
    /// - `STATIONGATE_CONSUME_MAX_WAIT_MS` (default: 5000)
    /// - `STATIONGATE_CONSUME_MAX_DELIVERIES` (default: 10)
    /// - `STATIONGATE_CONSUME_MAX_BATCH_SIZE` (default: 1000)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            default_batch_size: std::env::var("STATIONGATE_CONSUME_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_batch_size),
            default_max_wait: std::env::var("STATIONGATE_CONSUME_MAX_WAIT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.default_max_wait),
            default_max_deliveries: std::env::var("STATIONGATE_CONSUME_MAX_DELIVERIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.default_max_deliveries),
            max_batch_size: std::env::var("STATIONGATE_CONSUME_MAX_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_batch_size),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "STATIONGATE_CONSUME_MAX_BATCH_SIZE".to_string(),
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.default_batch_size == 0 || self.default_batch_size > self.max_batch_size {
            return Err(ConfigError::InvalidValue {
                field: "STATIONGATE_CONSUME_BATCH_SIZE".to_string(),
                value: self.default_batch_size.to_string(),
                reason: format!("must be between 1 and {}", self.max_batch_size),
            });
        }
        Ok(())
    }
}

// ============================================================================
// GATEWAY
// ============================================================================

/// Complete gateway configuration.
#[derive(Debug, Clone, Default)]
pub struct GatewayConfig {
    pub server: ServerConfig,
    pub broker: BrokerConfig,
    pub auth: AuthConfig,
    pub buffer: BufferConfig,
    pub reaper: ConnectionReaperConfig,
    pub sync: ConnectionSyncConfig,
    pub consume: ConsumeConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server: ServerConfig::from_env()?,
            broker: BrokerConfig::from_env(),
            auth: AuthConfig::from_env()?,
            buffer: BufferConfig::from_env(),
            reaper: ConnectionReaperConfig::from_env(),
            sync: ConnectionSyncConfig::from_env(),
            consume: ConsumeConfig::from_env(),
        })
    }

    /// Reject invalid combinations before anything connects.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let is_production = self.server.is_production();

        self.broker.validate()?;
        self.auth.validate(is_production)?;
        self.consume.validate()?;

        // The root credential backs the control plane and every request
        // served without a user identity.
        if self.sync.enabled || self.serves_compat_requests() {
            self.broker.root_login()?;
        }
        Ok(())
    }

    /// Whether any station may be served without a user identity.
    pub fn serves_compat_requests(&self) -> bool {
        !self.auth.default_policy.method.carries_identity()
            || self
                .auth
                .stations
                .values()
                .any(|policy| !policy.method.carries_identity())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AuthMethod;
    use crate::test_support::{EnvVarGuard, ENV_MUTEX};

    #[test]
    fn test_root_credential_follows_auth_style() {
        let mut broker = BrokerConfig {
            root_password: Some("pw".to_string()),
            root_connection_token: Some("tok".to_string()),
            ..BrokerConfig::default()
        };
        assert_eq!(broker.root_credential().map(|c| c.kind()), Some("password"));

        broker.user_pass_based_auth = false;
        assert_eq!(
            broker.root_credential().map(|c| c.kind()),
            Some("connection_token")
        );
    }

    #[test]
    fn test_validate_requires_root_credential_for_sync() {
        let mut config = GatewayConfig::default();
        config.sync.enabled = true;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingRequired { .. })
        ));

        config.broker.root_password = Some("pw".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_requires_root_credential_for_compat_mode() {
        let mut config = GatewayConfig::default();
        config.sync.enabled = false;
        assert!(config.validate().is_ok());

        config.auth.default_policy.method = AuthMethod::None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_partial_tls() {
        let mut config = GatewayConfig::default();
        config.sync.enabled = false;
        config.broker.tls_cert = Some(PathBuf::from("/certs/client.pem"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_batch_defaults() {
        let mut config = GatewayConfig::default();
        config.sync.enabled = false;
        config.consume.default_batch_size = config.consume.max_batch_size + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_env_reads_overrides() -> Result<(), ConfigError> {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _port = EnvVarGuard::set("STATIONGATE_HTTP_PORT", Some("8080"));
        let _env = EnvVarGuard::set("STATIONGATE_ENVIRONMENT", Some("Production"));
        let _host = EnvVarGuard::set("STATIONGATE_BROKER_HOST", Some("nats:4222"));
        let _style = EnvVarGuard::set("STATIONGATE_USER_PASS_BASED_AUTH", Some("false"));
        let _account = EnvVarGuard::set("STATIONGATE_DEFAULT_ACCOUNT_ID", Some("7"));
        let _batch = EnvVarGuard::set("STATIONGATE_CONSUME_BATCH_SIZE", Some("25"));
        let _method = EnvVarGuard::set("STATIONGATE_AUTH_METHOD", None);
        let _stations = EnvVarGuard::set("STATIONGATE_STATIONS_FILE", None);

        let config = GatewayConfig::from_env()?;
        assert_eq!(config.server.port, 8080);
        assert!(config.server.is_production());
        assert_eq!(config.broker.host, "nats:4222");
        assert!(!config.broker.user_pass_based_auth);
        assert_eq!(config.broker.default_account_id, TenantId::new(7));
        assert_eq!(config.consume.default_batch_size, 25);
        Ok(())
    }

    #[test]
    fn test_from_env_rejects_bad_port() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _port = EnvVarGuard::set("STATIONGATE_HTTP_PORT", Some("not-a-port"));
        assert!(matches!(
            ServerConfig::from_env(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_stations_file_missing_is_io_error() {
        let _env_lock = ENV_MUTEX.lock().expect("env mutex should not be poisoned");
        let _method = EnvVarGuard::set("STATIONGATE_AUTH_METHOD", None);
        let _stations = EnvVarGuard::set(
            "STATIONGATE_STATIONS_FILE",
            Some("/nonexistent/stationgate/stations.toml"),
        );
        assert!(matches!(
            GatewayConfig::from_env(),
            Err(ConfigError::Io { .. })
        ));
    }
}
