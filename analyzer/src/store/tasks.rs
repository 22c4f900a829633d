//! Task record store.
//!
//! Schema (see `migrations/`):
//! ```sql
//! CREATE TABLE tasks (
//!     task_id TEXT PRIMARY KEY, url TEXT, status TEXT, progress INTEGER,
//!     current_step TEXT, problems TEXT, error TEXT,
//!     created_at TEXT, updated_at TEXT
//! );
//! ```
//!
//! Every write after creation is conditional on the stored status being
//! non-terminal, which makes duplicate worker runs harmless: the loser of a
//! race sees `Ok(false)` and must not announce a result.

use async_trait::async_trait;
use chrono::Utc;
use shared_types::{Finding, TaskRecord, TaskStatus};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{format_timestamp, parse_timestamp, StoreError};

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new pending task. Fails if the id already exists.
    async fn create(&self, task_id: &str, url: &str) -> Result<TaskRecord, StoreError>;

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError>;

    /// Move the task to `processing` at the given step. Returns `false` when
    /// the task is terminal or the progress would go backwards.
    async fn record_progress(
        &self,
        task_id: &str,
        url: &str,
        step: &str,
        progress: u8,
    ) -> Result<bool, StoreError>;

    /// Terminal write: completed with findings. Returns `false` if the task
    /// had already reached a terminal state.
    async fn complete(
        &self,
        task_id: &str,
        url: &str,
        problems: &[Finding],
    ) -> Result<bool, StoreError>;

    /// Terminal write: error with message. Returns `false` if the task had
    /// already reached a terminal state.
    async fn fail(&self, task_id: &str, url: &str, error: &str) -> Result<bool, StoreError>;

    /// Completed tasks, most recently finished first.
    async fn list_completed(&self) -> Result<Vec<TaskRecord>, StoreError>;
}

/// SQLite-backed task store using the service's shared pool.
#[derive(Debug, Clone)]
pub struct SqliteTaskStore {
    pool: SqlitePool,
}

impl SqliteTaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Upsert that only touches rows whose status is not terminal. A missing
    /// row is created, since a trigger may arrive for a task whose initial
    /// write came from another deployment.
    #[allow(clippy::too_many_arguments)]
    async fn guarded_upsert(
        &self,
        task_id: &str,
        url: &str,
        status: TaskStatus,
        progress: u8,
        current_step: Option<&str>,
        problems: Option<String>,
        error: Option<&str>,
    ) -> Result<bool, StoreError> {
        let now = format_timestamp(Utc::now());
        let rows = sqlx::query(
            "INSERT INTO tasks
                (task_id, url, status, progress, current_step, problems, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(task_id) DO UPDATE SET
                status = excluded.status,
                progress = excluded.progress,
                current_step = excluded.current_step,
                problems = excluded.problems,
                error = excluded.error,
                updated_at = excluded.updated_at
             WHERE tasks.status NOT IN ('completed', 'error')
               AND (excluded.status <> 'processing' OR tasks.progress <= excluded.progress)",
        )
        .bind(task_id)
        .bind(url)
        .bind(status.as_str())
        .bind(i64::from(progress))
        .bind(current_step)
        .bind(problems)
        .bind(error)
        .bind(&now)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(rows > 0)
    }
}

fn record_from_row(row: &SqliteRow) -> Result<TaskRecord, StoreError> {
    let status: String = row.try_get("status")?;
    let status = status.parse::<TaskStatus>().map_err(StoreError::Corrupt)?;
    let progress: i64 = row.try_get("progress")?;
    let problems: Option<String> = row.try_get("problems")?;
    let problems = problems
        .map(|raw| serde_json::from_str::<Vec<Finding>>(&raw))
        .transpose()?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(TaskRecord {
        task_id: row.try_get("task_id")?,
        url: row.try_get("url")?,
        status,
        progress: progress.clamp(0, 100) as u8,
        current_step: row.try_get("current_step")?,
        problems,
        error: row.try_get("error")?,
        timestamp: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl TaskStore for SqliteTaskStore {
    async fn create(&self, task_id: &str, url: &str) -> Result<TaskRecord, StoreError> {
        let now = Utc::now();
        let ts = format_timestamp(now);
        sqlx::query(
            "INSERT INTO tasks (task_id, url, status, progress, created_at, updated_at)
             VALUES (?1, ?2, 'pending', 0, ?3, ?3)",
        )
        .bind(task_id)
        .bind(url)
        .bind(&ts)
        .execute(&self.pool)
        .await?;

        Ok(TaskRecord {
            task_id: task_id.to_string(),
            url: url.to_string(),
            status: TaskStatus::Pending,
            progress: 0,
            current_step: None,
            problems: None,
            error: None,
            timestamp: parse_timestamp(&ts)?,
        })
    }

    async fn get(&self, task_id: &str) -> Result<Option<TaskRecord>, StoreError> {
        let row = sqlx::query(
            "SELECT task_id, url, status, progress, current_step, problems, error, updated_at
             FROM tasks WHERE task_id = ?",
        )
        .bind(task_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(record_from_row).transpose()
    }

    async fn record_progress(
        &self,
        task_id: &str,
        url: &str,
        step: &str,
        progress: u8,
    ) -> Result<bool, StoreError> {
        self.guarded_upsert(
            task_id,
            url,
            TaskStatus::Processing,
            progress.min(100),
            Some(step),
            None,
            None,
        )
        .await
    }

    async fn complete(
        &self,
        task_id: &str,
        url: &str,
        problems: &[Finding],
    ) -> Result<bool, StoreError> {
        let problems_json = serde_json::to_string(problems)?;
        self.guarded_upsert(
            task_id,
            url,
            TaskStatus::Completed,
            100,
            Some(shared_types::STEP_COMPLETED),
            Some(problems_json),
            None,
        )
        .await
    }

    async fn fail(&self, task_id: &str, url: &str, error: &str) -> Result<bool, StoreError> {
        // Keep whatever progress was reached; only the status becomes final.
        let current = self.get(task_id).await?;
        let progress = current.map(|record| record.progress).unwrap_or(0);
        self.guarded_upsert(
            task_id,
            url,
            TaskStatus::Error,
            progress,
            Some(shared_types::STEP_ERROR),
            None,
            Some(error),
        )
        .await
    }

    async fn list_completed(&self) -> Result<Vec<TaskRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT task_id, url, status, progress, current_step, problems, error, updated_at
             FROM tasks WHERE status = 'completed'
             ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(record_from_row).collect()
    }
}
