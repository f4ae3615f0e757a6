//! Request validation for the station routes.
//!
//! Consume parameters, produce content types, and the header set forwarded
//! to the broker.

use axum::http::HeaderMap;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::ConsumeConfig;
use crate::error::{ApiError, ApiResult};

// ============================================================================
// CONSUME PARAMETERS
// ============================================================================

/// Consume parameters from the query string.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumeQuery {
    pub consumer_name: Option<String>,
    pub consumer_group: Option<String>,
    pub batch_size: Option<usize>,
    pub batch_max_wait_time_ms: Option<u64>,
    pub max_msg_deliveries: Option<u32>,
}

/// Consume parameters from a POST body. Fields set here win over the query.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConsumeBody {
    pub consumer_name: Option<String>,
    pub consumer_group: Option<String>,
    pub batch_size: Option<usize>,
    pub batch_max_wait_time_ms: Option<u64>,
    pub max_msg_deliveries: Option<u32>,
}

/// Fully resolved consume request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeParams {
    pub consumer_name: String,
    pub consumer_group: String,
    pub batch_size: usize,
    pub max_wait: Duration,
    pub max_deliveries: u32,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Merge query and body parameters, apply defaults, and validate.
pub fn resolve_consume_params(
    query: ConsumeQuery,
    body: Option<ConsumeBody>,
    config: &ConsumeConfig,
) -> ApiResult<ConsumeParams> {
    let body = body.unwrap_or_default();

    let consumer_name = non_empty(body.consumer_name)
        .or_else(|| non_empty(query.consumer_name))
        .ok_or_else(|| ApiError::missing_field("consumer_name"))?;
    let consumer_group = non_empty(body.consumer_group)
        .or_else(|| non_empty(query.consumer_group))
        .unwrap_or_else(|| consumer_name.clone());

    let batch_size = body
        .batch_size
        .or(query.batch_size)
        .unwrap_or(config.default_batch_size);
    if batch_size == 0 || batch_size > config.max_batch_size {
        return Err(ApiError::invalid_range(
            "batch_size",
            1,
            config.max_batch_size,
        ));
    }

    let max_wait = match body.batch_max_wait_time_ms.or(query.batch_max_wait_time_ms) {
        Some(0) => {
            return Err(ApiError::validation_failed(
                "batch_max_wait_time_ms must be positive",
            ))
        }
        Some(ms) => Duration::from_millis(ms),
        None => config.default_max_wait,
    };

    let max_deliveries = match body.max_msg_deliveries.or(query.max_msg_deliveries) {
        Some(0) => {
            return Err(ApiError::validation_failed(
                "max_msg_deliveries must be positive",
            ))
        }
        Some(n) => n,
        None => config.default_max_deliveries,
    };

    Ok(ConsumeParams {
        consumer_name,
        consumer_group,
        batch_size,
        max_wait,
        max_deliveries,
    })
}

// ============================================================================
// PRODUCE BODIES
// ============================================================================

/// How a single-message body is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Json,
    Text,
    Binary,
}

/// Map a Content-Type header onto a payload kind. Parameters such as
/// `charset` are ignored.
pub fn classify_content_type(content_type: Option<&str>) -> ApiResult<PayloadKind> {
    let raw = content_type.ok_or_else(|| {
        ApiError::invalid_input("Content-Type header is required")
    })?;
    let essence = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_lowercase();

    match essence.as_str() {
        "application/json" => Ok(PayloadKind::Json),
        "application/x-protobuf" | "application/octet-stream" => Ok(PayloadKind::Binary),
        s if s.starts_with("text/") => Ok(PayloadKind::Text),
        _ => Err(ApiError::invalid_input(format!(
            "Unsupported content type: {}",
            raw
        ))),
    }
}

/// Check a single-message body against its content type.
pub fn validate_payload(kind: PayloadKind, body: &[u8]) -> ApiResult<()> {
    match kind {
        PayloadKind::Json => {
            serde_json::from_slice::<serde_json::Value>(body)?;
            Ok(())
        }
        PayloadKind::Text => std::str::from_utf8(body)
            .map(|_| ())
            .map_err(|_| ApiError::invalid_input("Text body is not valid UTF-8")),
        PayloadKind::Binary => Ok(()),
    }
}

// ============================================================================
// HEADERS
// ============================================================================

const EXCLUDED_HEADERS: &[&str] = &[
    "authorization",
    "content-type",
    "content-length",
    "host",
    "user-agent",
    "connection",
];

/// Request headers forwarded to the broker as message headers.
///
/// Transport and authentication headers are dropped, including the
/// configured API-token and HMAC headers.
pub fn message_headers(headers: &HeaderMap, auth_headers: &[&str]) -> BTreeMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            let name = name.as_str();
            let excluded = EXCLUDED_HEADERS.contains(&name)
                || name.starts_with("accept")
                || name.starts_with("x-forwarded-")
                || auth_headers.iter().any(|h| h.eq_ignore_ascii_case(name));
            if excluded {
                return None;
            }
            value
                .to_str()
                .ok()
                .map(|v| (name.to_string(), v.to_string()))
        })
        .collect()
}
