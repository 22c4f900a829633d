//! Connection registry: task id -> live connection id.
//!
//! Bindings are keyed by (task_id, connection_id). A resubscribe from the
//! same connection overwrites its row; a subscribe from a new connection
//! adds a row. Either way the write gets a fresh `seq`, and lookups return
//! the highest `seq` for the task.
//!
//! Bindings are never reaped. A binding that points at a dead connection is
//! discovered lazily when a push reports the connection as gone.

use async_trait::async_trait;
use chrono::Utc;
use shared_types::ConnectionBinding;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{format_timestamp, parse_timestamp, StoreError};

#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Upsert the binding and make it the most recent one for the task.
    async fn bind(
        &self,
        task_id: &str,
        connection_id: &str,
        url: Option<&str>,
    ) -> Result<ConnectionBinding, StoreError>;

    /// The authoritative (most recently written) binding for a task.
    async fn latest(&self, task_id: &str) -> Result<Option<ConnectionBinding>, StoreError>;
}

#[derive(Debug, Clone)]
pub struct SqliteConnectionRegistry {
    pool: SqlitePool,
}

impl SqliteConnectionRegistry {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn binding_from_row(row: &SqliteRow) -> Result<ConnectionBinding, StoreError> {
    let created_at: String = row.try_get("created_at")?;
    Ok(ConnectionBinding {
        task_id: row.try_get("task_id")?,
        connection_id: row.try_get("connection_id")?,
        url: row.try_get("url")?,
        created_at: parse_timestamp(&created_at)?,
        seq: row.try_get("seq")?,
    })
}

#[async_trait]
impl ConnectionRegistry for SqliteConnectionRegistry {
    async fn bind(
        &self,
        task_id: &str,
        connection_id: &str,
        url: Option<&str>,
    ) -> Result<ConnectionBinding, StoreError> {
        if task_id.is_empty() || connection_id.is_empty() {
            return Err(StoreError::Rejected(
                "task id and connection id must be non-empty".to_string(),
            ));
        }
        if task_id == connection_id {
            return Err(StoreError::Rejected(format!(
                "connection id equals task id '{task_id}'"
            )));
        }

        let now = Utc::now();
        let created_at = format_timestamp(now);
        let seq: i64 = sqlx::query_scalar(
            "INSERT INTO connection_bindings (task_id, connection_id, url, created_at, seq)
             VALUES (?1, ?2, ?3, ?4, (SELECT COALESCE(MAX(seq), 0) + 1 FROM connection_bindings))
             ON CONFLICT(task_id, connection_id) DO UPDATE SET
                url = COALESCE(excluded.url, connection_bindings.url),
                created_at = excluded.created_at,
                seq = excluded.seq
             RETURNING seq",
        )
        .bind(task_id)
        .bind(connection_id)
        .bind(url)
        .bind(&created_at)
        .fetch_one(&self.pool)
        .await?;

        tracing::debug!(task_id, connection_id, seq, "connection binding written");

        Ok(ConnectionBinding {
            task_id: task_id.to_string(),
            connection_id: connection_id.to_string(),
            url: url.map(ToString::to_string),
            created_at: parse_timestamp(&created_at)?,
            seq,
        })
    }

    async fn latest(&self, task_id: &str) -> Result<Option<ConnectionBinding>, StoreError> {
        let row = sqlx::query(
            "SELECT task_id, connection_id, url, created_at, seq
             FROM connection_bindings
             WHERE task_id = ? AND connection_id <> task_id
             ORDER BY seq DESC
             LIMIT 1",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(binding_from_row).transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::test_support::temp_pool;

    /// Rows stored for a task, newest first, as (connection_id, seq).
    async fn stored_rows(pool: &SqlitePool, task_id: &str) -> Vec<(String, i64)> {
        sqlx::query_as(
            "SELECT connection_id, seq FROM connection_bindings
             WHERE task_id = ? ORDER BY seq DESC",
        )
        .bind(task_id)
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_latest_is_none_without_subscription() {
        let (pool, _dir) = temp_pool().await;
        let registry = SqliteConnectionRegistry::new(pool);
        assert!(registry.latest("t-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rebinding_same_connection_is_idempotent() {
        let (pool, _dir) = temp_pool().await;
        let registry = SqliteConnectionRegistry::new(pool.clone());

        registry.bind("t-1", "conn-a", None).await.unwrap();
        registry.bind("t-1", "conn-a", None).await.unwrap();

        assert_eq!(stored_rows(&pool, "t-1").await.len(), 1);
        let latest = registry.latest("t-1").await.unwrap().unwrap();
        assert_eq!(latest.connection_id, "conn-a");
    }

    #[tokio::test]
    async fn test_most_recent_binding_wins() {
        let (pool, _dir) = temp_pool().await;
        let registry = SqliteConnectionRegistry::new(pool.clone());

        registry.bind("t-1", "conn-a", None).await.unwrap();
        registry.bind("t-1", "conn-b", None).await.unwrap();
        assert_eq!(
            registry.latest("t-1").await.unwrap().unwrap().connection_id,
            "conn-b"
        );

        // Reconnecting on the old connection id moves it back to the front,
        // even within the same millisecond.
        registry.bind("t-1", "conn-a", Some("example.com")).await.unwrap();
        let latest = registry.latest("t-1").await.unwrap().unwrap();
        assert_eq!(latest.connection_id, "conn-a");
        assert_eq!(latest.url.as_deref(), Some("example.com"));

        let rows = stored_rows(&pool, "t-1").await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, "conn-a");
        assert!(rows[0].1 > rows[1].1);
    }

    #[tokio::test]
    async fn test_bindings_are_scoped_per_task() {
        let (pool, _dir) = temp_pool().await;
        let registry = SqliteConnectionRegistry::new(pool);

        registry.bind("t-1", "conn-a", None).await.unwrap();
        registry.bind("t-2", "conn-b", None).await.unwrap();

        assert_eq!(
            registry.latest("t-1").await.unwrap().unwrap().connection_id,
            "conn-a"
        );
        assert_eq!(
            registry.latest("t-2").await.unwrap().unwrap().connection_id,
            "conn-b"
        );
    }

    #[tokio::test]
    async fn test_self_referential_binding_rejected() {
        let (pool, _dir) = temp_pool().await;
        let registry = SqliteConnectionRegistry::new(pool);

        let err = registry.bind("t-1", "t-1", None).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(registry.latest("t-1").await.unwrap().is_none());
    }
}
