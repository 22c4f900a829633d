//! Persistent stores shared by every request handler and worker run.
//!
//! Two independent aggregates live here, joined only by the task id:
//! - [`TaskStore`]: task status, progress and results
//! - [`ConnectionRegistry`]: which live connection watches which task
//!
//! Both are traits so the worker and handlers can be exercised against
//! failing or scripted stores in tests. The SQLite implementations share
//! one `SqlitePool`.

use chrono::{DateTime, SecondsFormat, Utc};

pub mod registry;
pub mod tasks;

pub use registry::{ConnectionRegistry, SqliteConnectionRegistry};
pub use tasks::{SqliteTaskStore, TaskStore};

/// Errors surfaced by the persistence layer.
#[derive(Debug, thiserror::Error, Clone)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Rejected write: {0}")]
    Rejected(String),

    #[error("Invalid stored value: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Millisecond RFC 3339 in UTC, so stored timestamps sort lexicographically.
pub(crate) fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt(format!("timestamp '{raw}': {e}")))
}
