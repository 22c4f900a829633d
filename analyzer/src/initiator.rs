//! Task intake: validate, persist pending, trigger the worker.

use std::sync::Arc;

use shared_types::{AnalyzeResponse, WorkerPayload, URL_REQUIRED_MESSAGE};
use uuid::Uuid;

use crate::error::AppError;
use crate::invoker::JobInvoker;
use crate::retry::RetryPolicy;
use crate::store::TaskStore;

pub struct TaskInitiator {
    tasks: Arc<dyn TaskStore>,
    invoker: Arc<dyn JobInvoker>,
    write_policy: RetryPolicy,
}

impl TaskInitiator {
    pub fn new(tasks: Arc<dyn TaskStore>, invoker: Arc<dyn JobInvoker>) -> Self {
        Self {
            tasks,
            invoker,
            write_policy: RetryPolicy::lightweight(),
        }
    }

    pub fn with_write_policy(mut self, policy: RetryPolicy) -> Self {
        self.write_policy = policy;
        self
    }

    /// Returns as soon as the worker has been triggered; it does not wait
    /// for the analysis.
    ///
    /// The worker is only triggered once the pending record exists. If the
    /// trigger then fails the record stays pending.
    pub async fn initiate(&self, url: Option<&str>) -> Result<AnalyzeResponse, AppError> {
        let url = url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| AppError::InvalidInput(URL_REQUIRED_MESSAGE.to_string()))?;

        let task_id = Uuid::new_v4().to_string();
        self.write_policy
            .retry("create task", |_| self.tasks.create(&task_id, url))
            .await?;
        tracing::info!(task_id = %task_id, url, "Task created");

        let payload = WorkerPayload {
            url: url.to_string(),
            task_id: task_id.clone(),
        };
        if let Err(e) = self.invoker.invoke(&payload).await {
            tracing::error!(task_id = %task_id, error = %e, "Worker trigger failed; task left pending");
            return Err(AppError::InvokeFailed(e.to_string()));
        }

        Ok(AnalyzeResponse { task_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::InvokeError;
    use crate::store::test_support::temp_pool;
    use crate::store::{SqliteTaskStore, StoreError};
    use async_trait::async_trait;
    use shared_types::{Finding, TaskRecord, TaskStatus};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingInvoker {
        payloads: Mutex<Vec<WorkerPayload>>,
        reject: bool,
    }

    #[async_trait]
    impl JobInvoker for RecordingInvoker {
        async fn invoke(&self, payload: &WorkerPayload) -> Result<(), InvokeError> {
            self.payloads.lock().unwrap().push(payload.clone());
            if self.reject {
                Err(InvokeError::Rejected(503))
            } else {
                Ok(())
            }
        }
    }

    struct DownTasks;

    #[async_trait]
    impl TaskStore for DownTasks {
        async fn create(&self, _: &str, _: &str) -> Result<TaskRecord, StoreError> {
            Err(StoreError::Database("unable to open database file".to_string()))
        }
        async fn get(&self, _: &str) -> Result<Option<TaskRecord>, StoreError> {
            Ok(None)
        }
        async fn record_progress(&self, _: &str, _: &str, _: &str, _: u8) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn complete(&self, _: &str, _: &str, _: &[Finding]) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn fail(&self, _: &str, _: &str, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn list_completed(&self) -> Result<Vec<TaskRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn quick() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_fraction: 0.0,
        }
    }

    #[tokio::test]
    async fn test_initiate_creates_pending_and_triggers_once() {
        let (pool, _dir) = temp_pool().await;
        let tasks = Arc::new(SqliteTaskStore::new(pool));
        let invoker = Arc::new(RecordingInvoker::default());
        let initiator = TaskInitiator::new(tasks.clone(), invoker.clone());

        let response = initiator.initiate(Some(" example.com ")).await.unwrap();
        assert!(Uuid::parse_str(&response.task_id).is_ok());

        let record = tasks.get(&response.task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
        assert_eq!(record.url, "example.com");

        let payloads = invoker.payloads.lock().unwrap();
        assert_eq!(payloads.len(), 1);
        assert_eq!(payloads[0].task_id, response.task_id);
        assert_eq!(payloads[0].url, "example.com");
    }

    #[tokio::test]
    async fn test_missing_url_has_no_side_effects() {
        let (pool, _dir) = temp_pool().await;
        let tasks = Arc::new(SqliteTaskStore::new(pool));
        let invoker = Arc::new(RecordingInvoker::default());
        let initiator = TaskInitiator::new(tasks, invoker.clone());

        for url in [None, Some(""), Some("  ")] {
            match initiator.initiate(url).await {
                Err(AppError::InvalidInput(message)) => assert_eq!(message, URL_REQUIRED_MESSAGE),
                other => panic!("expected InvalidInput, got {other:?}"),
            }
        }
        assert!(invoker.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_storage_failure_does_not_trigger_worker() {
        let invoker = Arc::new(RecordingInvoker::default());
        let initiator =
            TaskInitiator::new(Arc::new(DownTasks), invoker.clone()).with_write_policy(quick());

        let result = initiator.initiate(Some("example.com")).await;
        assert!(matches!(result, Err(AppError::StorageUnavailable(_))));
        assert!(invoker.payloads.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_trigger_failure_leaves_pending_record() {
        let (pool, _dir) = temp_pool().await;
        let tasks = Arc::new(SqliteTaskStore::new(pool));
        let invoker = Arc::new(RecordingInvoker {
            payloads: Mutex::new(Vec::new()),
            reject: true,
        });
        let initiator = TaskInitiator::new(tasks.clone(), invoker.clone());

        let result = initiator.initiate(Some("example.com")).await;
        assert!(matches!(result, Err(AppError::InvokeFailed(_))));

        let task_id = invoker.payloads.lock().unwrap()[0].task_id.clone();
        let record = tasks.get(&task_id).await.unwrap().unwrap();
        assert_eq!(record.status, TaskStatus::Pending);
    }
}
