//! Error types for stationgate operations

use crate::message::MessageId;
use thiserror::Error;

/// Errors reported by the broker client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    #[error("Broker rejected credentials: {reason}")]
    Authentication { reason: String },

    #[error("Producer handle for station {station} is stale: {reason}")]
    StaleProducer { station: String, reason: String },

    #[error("Schema validation failed: {reason}")]
    SchemaValidation { reason: String },

    #[error("Broker operation timed out: {operation}")]
    Timeout { operation: String },

    #[error("Station not found: {station}")]
    StationNotFound { station: String },

    #[error("Broker connection is closed")]
    Disconnected,

    #[error("Broker transport error: {reason}")]
    Transport { reason: String },
}

impl BrokerError {
    /// Map raw broker error text onto the taxonomy.
    ///
    /// `station` is attached to variants that carry one.
    pub fn classify(station: &str, message: &str) -> Self {
        let lowered = message.to_lowercase();
        let reason = message.to_string();

        if lowered.contains("authorization violation") {
            BrokerError::Authentication { reason }
        } else if lowered.contains("schema") {
            BrokerError::SchemaValidation { reason }
        } else if lowered.contains("authentication") || lowered.contains("token") {
            BrokerError::Authentication { reason }
        } else if lowered.contains("no responders")
            || lowered.contains("producer not found")
            || lowered.contains("stale")
        {
            BrokerError::StaleProducer {
                station: station.to_string(),
                reason,
            }
        } else if lowered.contains("stream not found") {
            BrokerError::StationNotFound {
                station: station.to_string(),
            }
        } else if lowered.contains("timed out") || lowered.contains("timeout") {
            BrokerError::Timeout { operation: reason }
        } else {
            BrokerError::Transport { reason }
        }
    }

    pub fn is_stale_producer(&self) -> bool {
        matches!(self, BrokerError::StaleProducer { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, BrokerError::Timeout { .. })
    }
}

/// Message buffer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BufferError {
    #[error("Buffered message {id} not found for station {station}, consumer {consumer}")]
    NotFound {
        station: String,
        consumer: String,
        id: MessageId,
    },

    #[error("Buffer storage failed during {operation}: {reason}")]
    Storage { operation: String, reason: String },

    #[error("Buffer lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Failed to parse config file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Master error type for all stationgate errors.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Malformed sync event: {reason}")]
    MalformedEvent { reason: String },
}

/// Result type alias for broker client operations.
pub type BrokerResult<T> = Result<T, BrokerError>;

/// Result type alias for stationgate operations.
pub type GatewayResult<T> = Result<T, GatewayError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_authorization_violation() {
        let err = BrokerError::classify("orders", "nats: Authorization Violation");
        assert!(matches!(err, BrokerError::Authentication { .. }));
    }

    #[test]
    fn test_classify_schema_failure() {
        let err = BrokerError::classify("orders", "Schema validation has failed: missing field");
        assert_eq!(
            err,
            BrokerError::SchemaValidation {
                reason: "Schema validation has failed: missing field".to_string()
            }
        );
    }

    #[test]
    fn test_classify_stale_producer() {
        let err = BrokerError::classify("orders", "nats: no responders available for request");
        assert!(err.is_stale_producer());
        if let BrokerError::StaleProducer { station, .. } = err {
            assert_eq!(station, "orders");
        }
    }

    #[test]
    fn test_classify_missing_stream() {
        let err = BrokerError::classify("orders", "jetstream error: stream not found (code 404)");
        assert_eq!(
            err,
            BrokerError::StationNotFound {
                station: "orders".to_string()
            }
        );
    }

    #[test]
    fn test_classify_timeout_and_fallback() {
        assert!(BrokerError::classify("s", "request timed out").is_timeout());
        assert!(matches!(
            BrokerError::classify("s", "connection reset by peer"),
            BrokerError::Transport { .. }
        ));
    }

    #[test]
    fn test_buffer_error_display_not_found() {
        let err = BufferError::NotFound {
            station: "orders".to_string(),
            consumer: "billing".to_string(),
            id: 12,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("12"));
        assert!(msg.contains("orders"));
        assert!(msg.contains("billing"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "auth_method".to_string(),
            value: "kerberos".to_string(),
            reason: "unsupported".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("auth_method"));
        assert!(msg.contains("kerberos"));
    }

    #[test]
    fn test_gateway_error_from_broker() {
        let err: GatewayError = BrokerError::Disconnected.into();
        assert!(matches!(err, GatewayError::Broker(BrokerError::Disconnected)));
    }
}
