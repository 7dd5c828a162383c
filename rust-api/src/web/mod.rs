//! Web server module.
//!
//! Routes:
//! - `POST /webhook`: signed message ingestion
//! - `GET /messages`: paginated, filtered listing
//! - `GET /stats`: aggregate statistics
//! - `GET /health/live`, `GET /health/ready`: probes
//! - `GET /metrics`: Prometheus exposition

pub mod handlers;
pub mod middleware;
pub mod payload;
pub mod signature;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

pub use handlers::{
    export_metrics, list_messages, live, ready, receive_webhook, stats, AppState,
    HealthResponse, ListResponse, WebhookOutcome, WebhookResponse, DEFAULT_LIMIT, MAX_BODY_BYTES,
    MAX_LIMIT,
};
pub use payload::{ValidationError, WebhookPayload};
pub use signature::{compute_signature, verify_signature, SIGNATURE_HEADER};

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/webhook", post(receive_webhook))
        .route("/messages", get(list_messages))
        .route("/stats", get(stats))
        .route("/health/live", get(live))
        .route("/health/ready", get(ready))
        .route("/metrics", get(export_metrics))
        .fallback(|| async { StatusCode::NOT_FOUND })
        // Applied after the fallback so unmatched requests are tracked too.
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::track_requests,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
