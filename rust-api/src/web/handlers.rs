//! HTTP endpoint handlers.
//!
//! The webhook handler gates each request in order:
//! 1. Verify the signature over the raw body
//! 2. Parse and validate the payload
//! 3. Insert idempotently by `message_id`
//!
//! A failed gate returns immediately without touching later stages.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{
        rejection::{BytesRejection, QueryRejection},
        Query, State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::metrics::{self, Metrics};
use crate::store::{InsertOutcome, Message, MessageFilter, MessageStats, MessageStore};
use crate::web::payload::{ValidationError, WebhookPayload};
use crate::web::signature::{verify_signature, SIGNATURE_HEADER};
use crate::Config;

/// Page size when `limit` is not given.
pub const DEFAULT_LIMIT: u32 = 50;

/// Largest page size; larger requests are clamped.
pub const MAX_LIMIT: u32 = 100;

/// Largest accepted webhook body, in bytes.
pub const MAX_BODY_BYTES: usize = 64 * 1024;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn MessageStore>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config, store: Arc<dyn MessageStore>, metrics: Metrics) -> Self {
        Self {
            config: Arc::new(config),
            store,
            metrics,
        }
    }
}

// =============================================================================
// Health Checks
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness probe. Healthy whenever the process is serving.
pub async fn live() -> Json<HealthResponse> {
    Json(HealthResponse { status: "live" })
}

/// Readiness probe. Healthy only if the store answers a trivial query.
pub async fn ready(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    state
        .store
        .ping()
        .await
        .map_err(|e| ApiError::NotReady(e.to_string()))?;

    Ok(Json(HealthResponse { status: "ready" }))
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub message_id: String,
    pub dup: bool,
    pub result: &'static str,
}

/// Outcome of one webhook call, attached to the response for request logging.
#[derive(Debug, Clone)]
pub struct WebhookOutcome {
    pub message_id: Option<String>,
    pub dup: bool,
    pub result: &'static str,
}

/// Webhook ingestion endpoint.
///
/// Returns 201 for a new message, 200 for a duplicate, 401 for a bad
/// signature and 422 for an invalid payload. A body that cannot be read
/// (e.g. over `MAX_BODY_BYTES`) keeps its rejection status and counts as
/// `validation_error`.
pub async fn receive_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let (message_id, result) = match body {
        Ok(body) => ingest(&state, &headers, &body).await,
        Err(rejection) => (None, Err(ApiError::from(rejection))),
    };

    let label = match &result {
        Ok(inserted) => inserted.as_str(),
        Err(e) => e.code(),
    };
    state.metrics.inc_webhook(label);

    let dup = matches!(result, Ok(InsertOutcome::Duplicate));
    let outcome = WebhookOutcome {
        message_id: message_id.clone(),
        dup,
        result: label,
    };

    let mut response = match result {
        Ok(inserted) => {
            let status = if inserted.is_duplicate() {
                StatusCode::OK
            } else {
                StatusCode::CREATED
            };
            let body = WebhookResponse {
                message_id: message_id.unwrap_or_default(),
                dup,
                result: label,
            };
            (status, Json(body)).into_response()
        }
        Err(e) => e.into_response(),
    };

    response.extensions_mut().insert(outcome);
    response
}

async fn ingest(
    state: &AppState,
    headers: &HeaderMap,
    body: &[u8],
) -> (Option<String>, Result<InsertOutcome, ApiError>) {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if !verify_signature(&state.config.webhook_secret, body, signature) {
        return (None, Err(ApiError::InvalidSignature));
    }

    let message = match WebhookPayload::parse(body) {
        Ok(message) => message,
        Err(ValidationError { message_id, reason }) => {
            return (message_id, Err(ApiError::Validation(reason)));
        }
    };

    let message_id = message.message_id.clone();
    let result = state.store.insert(message).await.map_err(ApiError::from);

    (Some(message_id), result)
}

// =============================================================================
// Messages
// =============================================================================

/// Raw `/messages` query parameters, validated by `ListParams::parse`.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<String>,
    pub offset: Option<String>,
    pub from: Option<String>,
    pub since: Option<String>,
    pub q: Option<String>,
}

/// Validated listing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    pub filter: MessageFilter,
    pub limit: u32,
    pub offset: u64,
}

impl ListParams {
    pub fn parse(self) -> Result<ListQuery, ApiError> {
        let limit = parse_limit(non_empty(self.limit).as_deref())?;
        let offset = parse_offset(non_empty(self.offset).as_deref())?;

        let since_unix_ms = match non_empty(self.since) {
            Some(raw) => Some(
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.timestamp_millis())
                    .map_err(|_| {
                        ApiError::InvalidQuery("since must be an RFC 3339 timestamp".to_string())
                    })?,
            ),
            None => None,
        };

        Ok(ListQuery {
            filter: MessageFilter {
                from_msisdn: non_empty(self.from).map(|f| normalize_sender(&f)),
                since_unix_ms,
                // Surrounding spaces are part of the substring search.
                text_query: self.q.filter(|q| !q.is_empty()),
            },
            limit,
            offset,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_limit(raw: Option<&str>) -> Result<u32, ApiError> {
    let Some(raw) = raw else {
        return Ok(DEFAULT_LIMIT);
    };

    match raw.parse::<i64>() {
        Ok(n) if n < 1 => Err(ApiError::InvalidQuery("limit must be >= 1".to_string())),
        Ok(n) => Ok(n.min(i64::from(MAX_LIMIT)) as u32),
        // Too many digits for i64 is still just "too large".
        Err(_) if raw.bytes().all(|b| b.is_ascii_digit()) => Ok(MAX_LIMIT),
        Err(_) => Err(ApiError::InvalidQuery("limit must be an integer".to_string())),
    }
}

fn parse_offset(raw: Option<&str>) -> Result<u64, ApiError> {
    let Some(raw) = raw else {
        return Ok(0);
    };

    match raw.parse::<i64>() {
        Ok(n) if n < 0 => Err(ApiError::InvalidQuery("offset must be >= 0".to_string())),
        Ok(n) => Ok(n as u64),
        Err(_) => Err(ApiError::InvalidQuery("offset must be an integer".to_string())),
    }
}

/// Restore the `+` that form decoding turns into a space.
fn normalize_sender(raw: &str) -> String {
    if raw.starts_with(|c: char| c.is_ascii_digit()) {
        format!("+{}", raw)
    } else {
        raw.to_string()
    }
}

/// Paginated listing response.
#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub data: Vec<Message>,
    pub total: u64,
    pub limit: u32,
    pub offset: u64,
}

/// List messages ordered by `(ts, message_id)`.
pub async fn list_messages(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<ListResponse>, ApiError> {
    let Query(params) = params?;
    let query = params.parse()?;
    let page = state
        .store
        .list(query.filter, query.limit, query.offset)
        .await?;

    Ok(Json(ListResponse {
        data: page.data,
        total: page.total,
        limit: query.limit,
        offset: query.offset,
    }))
}

// =============================================================================
// Stats & Metrics
// =============================================================================

/// Aggregate message statistics.
pub async fn stats(State(state): State<AppState>) -> Result<Json<MessageStats>, ApiError> {
    Ok(Json(state.store.stats().await?))
}

/// Prometheus text exposition.
pub async fn export_metrics(State(state): State<AppState>) -> Result<Response, ApiError> {
    let text = state.metrics.render()?;
    Ok(([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], text).into_response())
}
