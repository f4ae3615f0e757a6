//! Station routes (authenticated)
//!
//! - POST /stations/:station/produce/single
//! - POST /stations/:station/produce/batch
//! - GET|POST /stations/:station/consume/batch
//! - POST /stations/:station/consume/batch/ack

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::{header::CONTENT_TYPE, HeaderMap},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use stationgate_core::{BufferedMessage, MessageId, OutboundMessage};

use crate::constants::MAX_PRODUCE_BATCH;
use crate::error::{ApiError, ApiResult};
use crate::middleware::Caller;
use crate::services::{acknowledge, consume_batch, produce_batch, produce_one};
use crate::state::AppState;
use crate::validation::{
    classify_content_type, message_headers, resolve_consume_params, validate_payload, ConsumeBody,
    ConsumeQuery,
};

// ============================================================================
// TYPES
// ============================================================================

/// One consumed message as returned to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumedMessage {
    pub id: MessageId,
    pub data: String,
}

impl From<BufferedMessage> for ConsumedMessage {
    fn from(message: BufferedMessage) -> Self {
        Self {
            id: message.id,
            data: message.data_lossy(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AckRequest {
    pub consumer_name: Option<String>,
    #[serde(default)]
    pub ids: Vec<MessageId>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckQuery {
    pub consumer_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    pub acknowledged: Vec<MessageId>,
}

fn query_or_400<T>(query: Result<Query<T>, QueryRejection>) -> ApiResult<T> {
    query
        .map(|Query(inner)| inner)
        .map_err(|e| ApiError::invalid_input(e.body_text()))
}

/// Headers forwarded to the broker, minus the ones the station's policy
/// authenticates with.
fn forwarded_headers(
    state: &AppState,
    station: &str,
    headers: &HeaderMap,
) -> BTreeMap<String, String> {
    let policy = state.config.auth.policy_for(Some(station));
    message_headers(
        headers,
        &[policy.api_token_header.as_str(), policy.hmac_header.as_str()],
    )
}

// ============================================================================
// PRODUCE
// ============================================================================

/// POST /stations/:station/produce/single
pub async fn produce_single_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(station): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let content_type = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
    let kind = classify_content_type(content_type)?;
    validate_payload(kind, &body)?;

    let message = OutboundMessage::new(
        body.to_vec(),
        forwarded_headers(&state, &station, &headers),
    );
    let connection = state.connections.connection_for(&caller).await?;
    produce_one(
        &connection,
        &station,
        &state.config.broker.producer_name,
        &message,
    )
    .await?;

    Ok(Json(json!({ "success": true })))
}

/// POST /stations/:station/produce/batch
pub async fn produce_batch_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(station): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<Json<Value>> {
    let items: Vec<Value> = serde_json::from_slice(&body)?;
    if items.is_empty() || items.len() > MAX_PRODUCE_BATCH {
        return Err(ApiError::invalid_range("messages", 1, MAX_PRODUCE_BATCH));
    }

    let message_headers = forwarded_headers(&state, &station, &headers);
    let messages = items
        .iter()
        .map(|item| -> ApiResult<OutboundMessage> {
            Ok(OutboundMessage::new(
                serde_json::to_vec(item)?,
                message_headers.clone(),
            ))
        })
        .collect::<ApiResult<Vec<_>>>()?;

    let connection = state.connections.connection_for(&caller).await?;
    let produced = produce_batch(
        &connection,
        &station,
        &state.config.broker.producer_name,
        &messages,
    )
    .await?;

    Ok(Json(json!({ "success": true, "produced": produced })))
}

// ============================================================================
// CONSUME
// ============================================================================

/// GET /stations/:station/consume/batch
pub async fn consume_get_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(station): Path<String>,
    query: Result<Query<ConsumeQuery>, QueryRejection>,
) -> ApiResult<Json<Vec<ConsumedMessage>>> {
    let params = resolve_consume_params(query_or_400(query)?, None, &state.config.consume)?;
    let messages =
        consume_batch(&state.connections, &state.buffer, &caller, &station, &params).await?;
    Ok(Json(messages.into_iter().map(ConsumedMessage::from).collect()))
}

/// POST /stations/:station/consume/batch
///
/// The optional JSON body overrides the query parameters.
pub async fn consume_post_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(station): Path<String>,
    query: Result<Query<ConsumeQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Json<Vec<ConsumedMessage>>> {
    let body = if body.iter().all(u8::is_ascii_whitespace) {
        None
    } else {
        Some(serde_json::from_slice::<ConsumeBody>(&body)?)
    };
    let params = resolve_consume_params(query_or_400(query)?, body, &state.config.consume)?;
    let messages =
        consume_batch(&state.connections, &state.buffer, &caller, &station, &params).await?;
    Ok(Json(messages.into_iter().map(ConsumedMessage::from).collect()))
}

/// POST /stations/:station/consume/batch/ack
pub async fn ack_handler(
    State(state): State<AppState>,
    Caller(caller): Caller,
    Path(station): Path<String>,
    query: Result<Query<AckQuery>, QueryRejection>,
    body: Bytes,
) -> ApiResult<Json<AckResponse>> {
    let query = query_or_400(query)?;
    let request: AckRequest = serde_json::from_slice(&body)?;

    let consumer = request
        .consumer_name
        .or(query.consumer_name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::missing_field("consumer_name"))?;
    if request.ids.is_empty() {
        return Err(ApiError::missing_field("ids"));
    }

    let owner = caller.username(state.connections.broker_config());
    let acknowledged = acknowledge(&state.buffer, &station, &consumer, &owner, &request.ids).await?;

    Ok(Json(AckResponse {
        success: true,
        acknowledged,
    }))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Station routes. The caller applies the auth middleware.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/stations/:station/produce/single", post(produce_single_handler))
        .route("/stations/:station/produce/batch", post(produce_batch_handler))
        .route(
            "/stations/:station/consume/batch",
            get(consume_get_handler).post(consume_post_handler),
        )
        .route("/stations/:station/consume/batch/ack", post(ack_handler))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consumed_message_is_lossy_utf8() {
        let message = BufferedMessage {
            id: 7,
            station: "s".to_string(),
            consumer: "c".to_string(),
            owner_username: "alice".to_string(),
            payload: vec![b'h', b'i', 0xff],
            created_at: 0,
        };
        let consumed = ConsumedMessage::from(message);
        assert_eq!(consumed.id, 7);
        assert_eq!(consumed.data, "hi\u{fffd}");
    }

    #[test]
    fn test_ack_request_defaults_ids() -> Result<(), serde_json::Error> {
        let request: AckRequest = serde_json::from_str(r#"{"consumer_name":"c"}"#)?;
        assert!(request.ids.is_empty());
        assert_eq!(request.consumer_name.as_deref(), Some("c"));
        Ok(())
    }
}
