//! Fire-and-forget worker triggers.
//!
//! The initiator hands `{url, taskId}` to a [`JobInvoker`] and returns as
//! soon as the trigger is accepted. Delivery is at-least-once; the worker
//! tolerates duplicates.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use shared_types::WorkerPayload;

use crate::worker::Worker;

/// Header that asks the worker endpoint to run in the background.
pub const INVOCATION_TYPE_HEADER: &str = "x-invocation-type";
pub const INVOCATION_TYPE_EVENT: &str = "Event";

#[derive(Debug, thiserror::Error)]
pub enum InvokeError {
    #[error("Request to worker failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Worker endpoint returned {0}")]
    Rejected(u16),

    #[error("Invalid worker payload: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait JobInvoker: Send + Sync {
    async fn invoke(&self, payload: &WorkerPayload) -> Result<(), InvokeError>;
}

/// Runs the worker on this process's runtime.
pub struct SpawnInvoker {
    worker: Arc<Worker>,
}

impl SpawnInvoker {
    pub fn new(worker: Arc<Worker>) -> Self {
        Self { worker }
    }
}

#[async_trait]
impl JobInvoker for SpawnInvoker {
    async fn invoke(&self, payload: &WorkerPayload) -> Result<(), InvokeError> {
        let worker = self.worker.clone();
        let payload = payload.clone();
        tokio::spawn(async move {
            let task_id = payload.task_id.clone();
            let report = worker.run(payload).await;
            tracing::debug!(
                task_id = %task_id,
                status_code = report.status_code,
                skipped = report.skipped,
                "Background worker run finished"
            );
        });
        Ok(())
    }
}

/// Triggers a worker in another process through its `/internal/worker`
/// endpoint.
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new(worker_url: &str) -> Result<Self, reqwest::Error> {
        let endpoint = format!("{}/internal/worker", worker_url.trim_end_matches('/'));
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl JobInvoker for HttpInvoker {
    async fn invoke(&self, payload: &WorkerPayload) -> Result<(), InvokeError> {
        let body = serde_json::to_vec(payload)?;
        let response = self
            .client
            .post(&self.endpoint)
            .header(INVOCATION_TYPE_HEADER, INVOCATION_TYPE_EVENT)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(InvokeError::Rejected(status.as_u16()));
        }
        tracing::debug!(task_id = %payload.task_id, endpoint = %self.endpoint, "Worker triggered");
        Ok(())
    }
}
