//! Lyftr - signed webhook ingestion API.
//!
//! Accepts HMAC-signed inbound messages, stores them idempotently in SQLite
//! keyed by `message_id`, and serves listing, statistics, health and metrics
//! endpoints.
//!
//! ## Architecture
//!
//! ```text
//! POST /webhook → verify signature → validate payload → idempotent insert
//! GET  /messages, /stats → aggregate SQL → JSON envelope
//! ```

pub mod config;
pub mod error;
pub mod metrics;
pub mod store;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError, DatabaseLocation};
pub use error::ApiError;
pub use metrics::Metrics;
pub use store::{MessageStore, SqliteStore, StoreError};
pub use web::{router, AppState};
