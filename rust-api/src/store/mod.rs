//! Persistence layer for ingested messages.
//!
//! This module provides:
//! - The `Message` record and the query/filter types used by the API
//! - The `MessageStore` trait implemented by storage backends
//! - A SQLite implementation backed by an `r2d2` connection pool
//!
//! All aggregation happens inside the database; no method loads the full
//! table into memory.

pub mod sqlite;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

pub use sqlite::SqliteStore;

/// Maximum number of rows returned in `top_senders`.
pub const TOP_SENDERS_LIMIT: usize = 10;

/// Errors raised by a storage backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("blocking task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("failed to prepare database: {0}")]
    Init(String),
}

/// A stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub message_id: String,
    pub from_msisdn: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_msisdn: Option<String>,
    pub ts: String,
    pub text: String,
    pub created_at: String,
}

/// A validated message ready to be inserted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub message_id: String,
    pub from_msisdn: String,
    pub to_msisdn: Option<String>,
    /// Timestamp exactly as supplied by the caller.
    pub ts: String,
    /// `ts` in milliseconds since the Unix epoch, used for ordering.
    pub ts_unix_ms: i64,
    pub text: String,
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Created,
    Duplicate,
}

impl InsertOutcome {
    pub fn is_duplicate(self) -> bool {
        matches!(self, InsertOutcome::Duplicate)
    }

    /// Label used in responses, logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            InsertOutcome::Created => "created",
            InsertOutcome::Duplicate => "duplicate",
        }
    }
}

/// Optional filters for listing messages. All present filters are ANDed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageFilter {
    /// Exact sender match.
    pub from_msisdn: Option<String>,
    /// Inclusive lower bound on `ts`, in Unix milliseconds.
    pub since_unix_ms: Option<i64>,
    /// Case-insensitive substring of `text`.
    pub text_query: Option<String>,
}

/// One page of messages plus the unpaginated match count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessagePage {
    pub data: Vec<Message>,
    pub total: u64,
}

/// Message count for one sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderCount {
    pub sender: String,
    pub count: u64,
}

/// Aggregate statistics over all stored messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageStats {
    pub total_messages: u64,
    pub senders_count: u64,
    pub top_senders: Vec<SenderCount>,
    pub first_ts: Option<String>,
    pub last_ts: Option<String>,
}

/// Storage backend for messages.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert a message unless one with the same `message_id` already exists.
    ///
    /// Uniqueness is decided by the backend atomically; concurrent inserts of
    /// the same id yield exactly one `Created`.
    async fn insert(&self, message: NewMessage) -> Result<InsertOutcome, StoreError>;

    /// List messages ordered by `(ts, message_id)` ascending.
    async fn list(
        &self,
        filter: MessageFilter,
        limit: u32,
        offset: u64,
    ) -> Result<MessagePage, StoreError>;

    /// Compute aggregate statistics.
    async fn stats(&self) -> Result<MessageStats, StoreError>;

    /// Trivial round-trip used by the readiness probe.
    async fn ping(&self) -> Result<(), StoreError>;
}
