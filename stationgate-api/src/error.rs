//! Error Types for the stationgate API
//!
//! This module defines error handling for the HTTP layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use stationgate_core::{BrokerError, BufferError, ConfigError, GatewayError};
use std::fmt;

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Authentication Errors (401)
    // ========================================================================
    /// Request lacks valid credentials, or the broker rejected them
    Unauthorized,

    /// Authentication token is invalid or malformed
    InvalidToken,

    /// Authentication token has expired
    TokenExpired,

    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    ValidationFailed,
    InvalidInput,
    MissingField,
    InvalidRange,

    /// The broker rejected a message against the station's schema
    SchemaValidationFailed,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// The station does not exist on the broker
    StationNotFound,

    // ========================================================================
    // Server Errors (5xx)
    // ========================================================================
    /// No cached broker connection for the caller
    ConnectionUnavailable,

    /// A buffered message id was not found. Ids are server-assigned, so this
    /// is a server-side condition.
    MessageNotFound,

    InternalError,
    DatabaseError,

    /// The broker failed or could not be reached
    BrokerUnavailable,

    ServiceUnavailable,
    Timeout,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ErrorCode::Unauthorized | ErrorCode::InvalidToken | ErrorCode::TokenExpired => {
                StatusCode::UNAUTHORIZED
            }

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidRange
            | ErrorCode::SchemaValidationFailed => StatusCode::BAD_REQUEST,

            ErrorCode::StationNotFound => StatusCode::NOT_FOUND,

            ErrorCode::ConnectionUnavailable
            | ErrorCode::MessageNotFound
            | ErrorCode::InternalError
            | ErrorCode::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,

            ErrorCode::BrokerUnavailable => StatusCode::BAD_GATEWAY,
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            ErrorCode::Unauthorized => "Authentication required",
            ErrorCode::InvalidToken => "Invalid authentication token",
            ErrorCode::TokenExpired => "Authentication token has expired",
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidRange => "Value is out of valid range",
            ErrorCode::SchemaValidationFailed => "Message failed schema validation",
            ErrorCode::StationNotFound => "Station not found",
            ErrorCode::ConnectionUnavailable => "No broker connection, please re-authenticate",
            ErrorCode::MessageNotFound => "Message not found",
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::DatabaseError => "Database operation failed",
            ErrorCode::BrokerUnavailable => "Broker unavailable",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
            ErrorCode::Timeout => "Operation timed out",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response returned by every endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (e.g. the failing batch index)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn invalid_token(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidToken, message)
    }

    pub fn token_expired() -> Self {
        Self::from_code(ErrorCode::TokenExpired)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    pub fn invalid_range(field: &str, min: impl fmt::Display, max: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidRange,
            format!("Field '{}' must be between {} and {}", field, min, max),
        )
    }

    pub fn schema_validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SchemaValidationFailed, message)
    }

    pub fn station_not_found(station: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::StationNotFound,
            format!("Station {} not found", station),
        )
    }

    pub fn connection_unavailable() -> Self {
        Self::from_code(ErrorCode::ConnectionUnavailable)
    }

    pub fn message_not_found(message_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::MessageNotFound,
            format!("Message {} not found", message_id),
        )
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn broker_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BrokerUnavailable, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("Operation '{}' timed out", operation),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Server errors are logged at error level; client errors (including broker
/// credential rejections) only at debug.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = %self.code, status = status.as_u16(), message = %self.message, "Request failed");
        } else {
            tracing::debug!(code = %self.code, status = status.as_u16(), message = %self.message, "Request rejected");
        }
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

impl From<BrokerError> for ApiError {
    fn from(err: BrokerError) -> Self {
        match err {
            BrokerError::Authentication { .. } => ApiError::unauthorized("wrong credentials"),
            BrokerError::SchemaValidation { reason } => ApiError::schema_validation_failed(reason),
            BrokerError::StationNotFound { station } => ApiError::station_not_found(station),
            BrokerError::Timeout { operation } => ApiError::timeout(&operation),
            BrokerError::Disconnected => ApiError::connection_unavailable(),
            BrokerError::StaleProducer { reason, .. } | BrokerError::Transport { reason } => {
                ApiError::broker_unavailable(reason)
            }
        }
    }
}

impl From<BufferError> for ApiError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::NotFound { id, .. } => ApiError::message_not_found(id),
            BufferError::Storage { operation, reason } => {
                ApiError::database_error(format!("Buffer {} failed: {}", operation, reason))
            }
            BufferError::LockPoisoned => ApiError::internal_error("Buffer lock poisoned"),
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::internal_error(err.to_string())
    }
}

impl From<GatewayError> for ApiError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::Broker(e) => e.into(),
            GatewayError::Buffer(e) => e.into(),
            GatewayError::Config(e) => e.into(),
            GatewayError::MalformedEvent { reason } => ApiError::invalid_input(reason),
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;
