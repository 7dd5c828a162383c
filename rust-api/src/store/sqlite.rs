//! SQLite implementation of `MessageStore`.
//!
//! Uses an `r2d2` pool of rusqlite connections. Every operation checks out a
//! connection inside `tokio::task::spawn_blocking` so synchronous SQLite calls
//! never block the async runtime, and returns it before the next `.await`.
//!
//! The `message_id` primary key is the only guard against duplicate inserts.
//! A losing concurrent insert surfaces as a constraint violation, which is
//! mapped to `InsertOutcome::Duplicate`.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ffi, params, params_from_iter, types::Value, Connection, OptionalExtension, Row};
use tracing::info;

use super::{
    InsertOutcome, Message, MessageFilter, MessagePage, MessageStats, MessageStore, NewMessage,
    SenderCount, StoreError, TOP_SENDERS_LIMIT,
};
use crate::config::DatabaseLocation;

/// Pool size for file-backed databases.
const DEFAULT_POOL_SIZE: u32 = 8;

/// How long a connection waits on a locked database before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    message_id  TEXT PRIMARY KEY,
    from_msisdn TEXT NOT NULL,
    to_msisdn   TEXT,
    ts          TEXT NOT NULL,
    ts_unix_ms  INTEGER NOT NULL,
    text        TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_order ON messages (ts_unix_ms, message_id);
CREATE INDEX IF NOT EXISTS idx_messages_from ON messages (from_msisdn);
"#;

const MESSAGE_COLUMNS: &str = "message_id, from_msisdn, to_msisdn, ts, text, created_at";

/// SQLite-backed message store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Open (or create) a database file and ensure the schema exists.
    ///
    /// Missing parent directories are created. Connections run in WAL mode
    /// with a busy timeout so concurrent writers queue inside SQLite.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Init(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }

        let manager = SqliteConnectionManager::file(path).with_init(configure_connection);
        let pool = Pool::builder().max_size(DEFAULT_POOL_SIZE).build(manager)?;

        info!(path = %path.display(), pool_size = DEFAULT_POOL_SIZE, "sqlite_store_opened");
        Self::with_schema(pool)
    }

    /// Open a private in-memory database.
    ///
    /// The pool holds a single connection that never expires, since each
    /// SQLite in-memory connection is its own database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(SqliteConnectionManager::memory())?;

        info!("sqlite_store_opened_in_memory");
        Self::with_schema(pool)
    }

    /// Open the store described by a configured location.
    pub fn open_location(location: &DatabaseLocation) -> Result<Self, StoreError> {
        match location {
            DatabaseLocation::Memory => Self::open_in_memory(),
            DatabaseLocation::File(path) => Self::open(path),
        }
    }

    fn with_schema(pool: Pool<SqliteConnectionManager>) -> Result<Self, StoreError> {
        pool.get()?.execute_batch(SCHEMA)?;
        Ok(Self { pool })
    }

    /// Run `f` on a pooled connection off the async runtime.
    async fn with_conn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let conn = pool.get()?;
            f(&*conn)
        })
        .await?
    }
}

fn configure_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    Ok(())
}

/// True for a PRIMARY KEY / UNIQUE violation, false for any other failure
/// (including NOT NULL or CHECK constraints).
fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            e.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                || e.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE
        }
        _ => false,
    }
}

fn to_count(n: i64) -> u64 {
    u64::try_from(n).unwrap_or_default()
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        message_id: row.get(0)?,
        from_msisdn: row.get(1)?,
        to_msisdn: row.get(2)?,
        ts: row.get(3)?,
        text: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Build a `WHERE` clause and its positional parameters.
fn build_filters(filter: &MessageFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    if let Some(from) = &filter.from_msisdn {
        clauses.push("from_msisdn = ?");
        values.push(Value::Text(from.clone()));
    }

    if let Some(since) = filter.since_unix_ms {
        clauses.push("ts_unix_ms >= ?");
        values.push(Value::Integer(since));
    }

    if let Some(q) = &filter.text_query {
        // LIKE is case-insensitive for ASCII in SQLite.
        clauses.push("text LIKE ? ESCAPE '\\'");
        values.push(Value::Text(format!("%{}%", escape_like(q))));
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!(" WHERE {}", clauses.join(" AND ")), values)
    }
}

#[async_trait]
impl MessageStore for SqliteStore {
    async fn insert(&self, message: NewMessage) -> Result<InsertOutcome, StoreError> {
        self.with_conn(move |conn| {
            let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

            let result = conn.execute(
                "INSERT INTO messages (message_id, from_msisdn, to_msisdn, ts, ts_unix_ms, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    message.message_id,
                    message.from_msisdn,
                    message.to_msisdn,
                    message.ts,
                    message.ts_unix_ms,
                    message.text,
                    created_at,
                ],
            );

            match result {
                Ok(_) => Ok(InsertOutcome::Created),
                Err(e) if is_unique_violation(&e) => Ok(InsertOutcome::Duplicate),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    async fn list(
        &self,
        filter: MessageFilter,
        limit: u32,
        offset: u64,
    ) -> Result<MessagePage, StoreError> {
        self.with_conn(move |conn| {
            let (where_sql, values) = build_filters(&filter);

            // Count and page read from the same snapshot.
            let tx = conn.unchecked_transaction()?;

            let total: i64 = tx.query_row(
                &format!("SELECT COUNT(*) FROM messages{}", where_sql),
                params_from_iter(values.iter()),
                |row| row.get(0),
            )?;

            let mut page_values = values;
            page_values.push(Value::Integer(i64::from(limit)));
            page_values.push(Value::Integer(i64::try_from(offset).unwrap_or(i64::MAX)));

            let data = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {} FROM messages{} ORDER BY ts_unix_ms ASC, message_id ASC LIMIT ? OFFSET ?",
                    MESSAGE_COLUMNS, where_sql
                ))?;
                let rows = stmt.query_map(params_from_iter(page_values.iter()), row_to_message)?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            tx.commit()?;

            Ok(MessagePage {
                data,
                total: to_count(total),
            })
        })
        .await
    }

    async fn stats(&self) -> Result<MessageStats, StoreError> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;

            let (total, senders): (i64, i64) = tx.query_row(
                "SELECT COUNT(*), COUNT(DISTINCT from_msisdn) FROM messages",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;

            let top_senders = {
                let mut stmt = tx.prepare(
                    "SELECT from_msisdn, COUNT(*) AS cnt FROM messages
                     GROUP BY from_msisdn
                     ORDER BY cnt DESC, from_msisdn ASC
                     LIMIT ?1",
                )?;
                let rows = stmt.query_map([TOP_SENDERS_LIMIT as i64], |row| {
                    Ok(SenderCount {
                        sender: row.get(0)?,
                        count: to_count(row.get(1)?),
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()?
            };

            let first_ts: Option<String> = tx
                .query_row(
                    "SELECT ts FROM messages ORDER BY ts_unix_ms ASC, message_id ASC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            let last_ts: Option<String> = tx
                .query_row(
                    "SELECT ts FROM messages ORDER BY ts_unix_ms DESC, message_id DESC LIMIT 1",
                    [],
                    |row| row.get(0),
                )
                .optional()?;

            tx.commit()?;

            Ok(MessageStats {
                total_messages: to_count(total),
                senders_count: to_count(senders),
                top_senders,
                first_ts,
                last_ts,
            })
        })
        .await
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.with_conn(|conn| {
            let _: i64 = conn.query_row("SELECT 1", [], |row| row.get(0))?;
            Ok(())
        })
        .await
    }
}
