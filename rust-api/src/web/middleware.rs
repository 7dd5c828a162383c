//! Per-request tracking: metrics and the single structured log line.

use std::time::Instant;

use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use tracing::info;
use uuid::Uuid;

use super::handlers::{AppState, WebhookOutcome};
use crate::error::ErrorContext;

/// Path label for requests that matched no route.
pub const UNMATCHED_PATH: &str = "unmatched";

/// Record `http_requests_total`, `request_latency_ms` and log one line.
///
/// Webhook responses carry a `WebhookOutcome` extension and error responses
/// an `ErrorContext`; both are folded into the same record, so every request
/// logs exactly once. Requests with no matching route are labelled
/// `unmatched` to keep the label set bounded.
pub async fn track_requests(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = Uuid::new_v4().to_string();
    let method = request.method().clone();
    let path = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| UNMATCHED_PATH.to_string());

    let response = next.run(request).await;

    let latency = started.elapsed();
    let status = response.status().as_u16();
    let latency_ms = latency.as_millis() as u64;

    state.metrics.observe_http(&path, status, latency);

    let context = response.extensions().get::<ErrorContext>();
    let error = context.map(|c| c.code);
    let reason = context.map(|c| c.reason.as_str());

    match response.extensions().get::<WebhookOutcome>() {
        Some(outcome) => info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency_ms,
            message_id = outcome.message_id.as_deref(),
            dup = outcome.dup,
            result = outcome.result,
            error = error,
            reason = reason,
            "webhook_request"
        ),
        None => info!(
            request_id = %request_id,
            method = %method,
            path = %path,
            status = status,
            latency_ms = latency_ms,
            error = error,
            reason = reason,
            "http_request"
        ),
    }

    response
}
