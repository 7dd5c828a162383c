//! API error taxonomy and its HTTP mapping.
//!
//! Every error renders as `{"error": <code>, "detail": <message>}`. Internal
//! failures carry no detail so storage errors never leak to callers.
//!
//! The full reason is attached to the response as an `ErrorContext`
//! extension and logged once by the request middleware.

use axum::{
    extract::rejection::{BytesRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid signature")]
    InvalidSignature,

    #[error("{0}")]
    Validation(String),

    /// The request body could not be read (e.g. larger than the body limit).
    #[error("{0}")]
    BodyRejected(#[from] BytesRejection),

    #[error("{0}")]
    InvalidQuery(String),

    #[error("storage not ready: {0}")]
    NotReady(String),

    #[error("internal error: {0}")]
    Internal(#[from] StoreError),

    #[error("metrics exposition failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Error code and full reason, attached to error responses for logging.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    pub code: &'static str,
    pub reason: String,
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::InvalidQuery(rejection.body_text())
    }
}

impl ApiError {
    /// Stable machine-readable code, also used as the webhook result label.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::InvalidSignature => "invalid_signature",
            ApiError::Validation(_) | ApiError::BodyRejected(_) => "validation_error",
            ApiError::InvalidQuery(_) => "invalid_query",
            ApiError::NotReady(_) => "not_ready",
            ApiError::Internal(_) | ApiError::Metrics(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidSignature => StatusCode::UNAUTHORIZED,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::BodyRejected(rejection) => rejection.status(),
            ApiError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            ApiError::NotReady(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) | ApiError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Detail safe to show callers.
    fn public_detail(&self) -> Option<String> {
        match self {
            ApiError::Internal(_) | ApiError::Metrics(_) | ApiError::NotReady(_) => None,
            other => Some(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.code(),
            detail: self.public_detail(),
        };
        let context = ErrorContext {
            code: self.code(),
            reason: self.to_string(),
        };

        let mut response = (self.status(), Json(body)).into_response();
        response.extensions_mut().insert(context);
        response
    }
}
