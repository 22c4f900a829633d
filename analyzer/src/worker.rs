//! Analysis worker: one run per trigger.
//!
//! ```text
//! started -> resolving_connection -> validate -> step* -> completed
//!                                        |          |
//!                                        +----------+--> error
//! ```
//!
//! The domain is validated before any progress is shown, so an unknown site
//! fails fast with a single error event. The connection is resolved once
//! and reused for every push of the run.
//!
//! Pushes are best-effort: progress and terminal pushes that fail are logged
//! and the run continues. The record is always written before the terminal
//! push, so a client that missed the push can still fetch the result.
//!
//! Triggers are at-least-once. A run for a task that is already terminal is
//! skipped, and terminal writes are conditional, so a second run racing the
//! first cannot overwrite its result or announce a second outcome.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde_json::Value;
use shared_types::{
    Finding, TaskEvent, TaskStatus, WorkerPayload, WorkerReport, STEP_ERROR, STEP_VALIDATION,
};

use crate::catalog::AnalysisSource;
use crate::error::AppError;
use crate::push::Pusher;
use crate::resolve::resolve_connection;
use crate::retry::RetryPolicy;
use crate::store::{ConnectionRegistry, TaskStore};

/// A named stage of the simulated analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressStep {
    pub name: &'static str,
    pub progress: u8,
}

pub const PROGRESS_STEPS: [ProgressStep; 4] = [
    ProgressStep {
        name: "Fetching Website",
        progress: 20,
    },
    ProgressStep {
        name: "Analyzing Performance",
        progress: 40,
    },
    ProgressStep {
        name: "Analyzing UI/UX",
        progress: 60,
    },
    ProgressStep {
        name: "Generating Recommendations",
        progress: 80,
    },
];

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Policy for finding the connection bound to the task.
    pub resolve_policy: RetryPolicy,
    /// Policy for the terminal record writes.
    pub write_policy: RetryPolicy,
    /// Each step waits a uniformly random time in this range.
    pub step_delay_min: Duration,
    pub step_delay_max: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            resolve_policy: RetryPolicy::default(),
            write_policy: RetryPolicy::lightweight(),
            step_delay_min: Duration::from_secs(5),
            step_delay_max: Duration::from_secs(10),
        }
    }
}

impl WorkerSettings {
    fn step_delay(&self) -> Duration {
        let min = self.step_delay_min;
        let max = self.step_delay_max;
        if max <= min {
            return min;
        }
        let span = (max - min).as_millis() as u64;
        min + Duration::from_millis(rand::rng().random_range(0..=span))
    }
}

/// How a run that got past validation ended.
enum Finish {
    Completed { domain: String, problems: Vec<Finding> },
    /// Another run reached a terminal state first.
    Superseded,
}

pub struct Worker {
    tasks: Arc<dyn TaskStore>,
    registry: Arc<dyn ConnectionRegistry>,
    catalog: Arc<dyn AnalysisSource>,
    pusher: Pusher,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        tasks: Arc<dyn TaskStore>,
        registry: Arc<dyn ConnectionRegistry>,
        catalog: Arc<dyn AnalysisSource>,
        pusher: Pusher,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            tasks,
            registry,
            catalog,
            pusher,
            settings,
        }
    }

    /// Parse a raw trigger payload.
    ///
    /// Accepts `{url, taskId}` directly or wrapped in a gateway-style
    /// envelope `{"body": ...}` where the body is an object or a JSON string.
    pub fn parse_payload(raw: &[u8]) -> Result<WorkerPayload, AppError> {
        let value: Value = serde_json::from_slice(raw)
            .map_err(|e| AppError::InvalidPayload(format!("not valid JSON: {e}")))?;

        let payload = match value.get("body") {
            Some(Value::String(inner)) => serde_json::from_str::<Value>(inner)
                .map_err(|e| AppError::InvalidPayload(format!("body is not valid JSON: {e}")))?,
            Some(inner @ Value::Object(_)) => inner.clone(),
            _ => value,
        };

        let field = |name: &str| {
            payload
                .get(name)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(ToString::to_string)
        };

        match (field("url"), field("taskId")) {
            (Some(url), Some(task_id)) => Ok(WorkerPayload { url, task_id }),
            _ => Err(AppError::InvalidPayload(
                "URL and taskId are required in the payload".to_string(),
            )),
        }
    }

    /// Entry point for raw triggers. Malformed payloads are logged and
    /// reported; no record can be touched without a task id.
    pub async fn handle_raw(&self, raw: &[u8]) -> WorkerReport {
        match Self::parse_payload(raw) {
            Ok(payload) => self.run(payload).await,
            Err(e) => {
                tracing::error!(error = %e, "Rejected worker payload");
                WorkerReport {
                    task_id: None,
                    status: None,
                    status_code: e.status_code().as_u16(),
                    url: None,
                    message: Some(e.to_string()),
                    problems: None,
                    skipped: false,
                }
            }
        }
    }

    pub async fn run(&self, payload: WorkerPayload) -> WorkerReport {
        let WorkerPayload { url, task_id } = payload;
        tracing::info!(task_id = %task_id, url = %url, "Worker run started");

        match self.tasks.get(&task_id).await {
            Ok(Some(record)) if record.status.is_terminal() => {
                tracing::info!(
                    task_id = %task_id,
                    status = %record.status,
                    "Task already finished; ignoring duplicate trigger"
                );
                return WorkerReport {
                    task_id: Some(task_id),
                    status: Some(record.status),
                    status_code: 200,
                    url: Some(record.url),
                    message: Some("Task already finished".to_string()),
                    problems: record.problems,
                    skipped: true,
                };
            }
            Ok(_) => {}
            Err(e) => {
                // The conditional terminal write still protects the record.
                tracing::warn!(task_id = %task_id, error = %e, "Could not read task before run");
            }
        }

        let connection_id =
            resolve_connection(self.registry.as_ref(), &task_id, &self.settings.resolve_policy)
                .await;

        match self.execute(&task_id, &url, connection_id.as_deref()).await {
            Ok(Finish::Completed { domain, problems }) => {
                tracing::info!(
                    task_id = %task_id,
                    domain = %domain,
                    problems = problems.len(),
                    "Worker run completed"
                );
                WorkerReport {
                    task_id: Some(task_id),
                    status: Some(TaskStatus::Completed),
                    status_code: 200,
                    url: Some(domain),
                    message: None,
                    problems: Some(problems),
                    skipped: false,
                }
            }
            Ok(Finish::Superseded) => WorkerReport {
                task_id: Some(task_id),
                status: None,
                status_code: 200,
                url: Some(url),
                message: Some("Task already finished".to_string()),
                problems: None,
                skipped: true,
            },
            Err(e) => self.finish_with_error(&task_id, &url, connection_id.as_deref(), e).await,
        }
    }

    async fn execute(
        &self,
        task_id: &str,
        url: &str,
        connection_id: Option<&str>,
    ) -> Result<Finish, AppError> {
        let domain = self
            .catalog
            .recognize(url)
            .await
            .map_err(|e| AppError::UpstreamFailure(e.to_string()))?
            .ok_or_else(|| AppError::DomainNotRecognized {
                domain: crate::domain::base_domain(url),
            })?;

        for step in PROGRESS_STEPS {
            tracing::debug!(task_id, step = step.name, progress = step.progress, "Progress step");

            if let Err(e) = self
                .tasks
                .record_progress(task_id, url, step.name, step.progress)
                .await
            {
                tracing::warn!(task_id, step = step.name, error = %e, "Failed to record progress");
            }

            let event = TaskEvent::progress(task_id, step.name, step.progress);
            if let Err(e) = self.pusher.push(connection_id, &event).await {
                tracing::warn!(task_id, step = step.name, error = %e, "Failed to send progress update");
            }

            tokio::time::sleep(self.settings.step_delay()).await;
        }

        let problems = self
            .catalog
            .findings(&domain)
            .await
            .map_err(|e| AppError::UpstreamFailure(e.to_string()))?;
        if problems.is_empty() {
            return Err(AppError::UpstreamFailure(format!(
                "No analysis data found for URL: {domain}"
            )));
        }

        let written = self
            .settings
            .write_policy
            .retry("complete task", |_| self.tasks.complete(task_id, url, &problems))
            .await?;
        if !written {
            tracing::warn!(task_id, "Task reached a terminal state in another run");
            return Ok(Finish::Superseded);
        }

        let event = TaskEvent::completed(task_id, domain.clone(), problems.clone());
        if let Err(e) = self.pusher.push(connection_id, &event).await {
            tracing::warn!(task_id, error = %e, "Failed to send completed event");
        }

        Ok(Finish::Completed { domain, problems })
    }

    async fn finish_with_error(
        &self,
        task_id: &str,
        url: &str,
        connection_id: Option<&str>,
        error: AppError,
    ) -> WorkerReport {
        let message = error.to_string();
        let (step, status_code) = match &error {
            AppError::DomainNotRecognized { domain } => {
                tracing::warn!(task_id, domain = %domain, "No analysis available for domain");
                (STEP_VALIDATION, 404)
            }
            _ => (STEP_ERROR, 500),
        };
        tracing::error!(task_id, error = %message, code = error.code(), "Worker run failed");

        let written = self
            .settings
            .write_policy
            .retry("fail task", |_| self.tasks.fail(task_id, url, &message))
            .await;

        let announce = match written {
            Ok(true) => true,
            Ok(false) => {
                tracing::warn!(task_id, "Task already terminal; error not recorded");
                false
            }
            Err(e) => {
                // Still tell the client, or it waits forever.
                tracing::error!(task_id, error = %e, "Error updating task status after failure");
                true
            }
        };

        if announce {
            let event = TaskEvent::failed(task_id, step, message.clone());
            if let Err(e) = self.pusher.push(connection_id, &event).await {
                tracing::error!(task_id, error = %e, "Error sending error status to connection");
            }
        }

        WorkerReport {
            task_id: Some(task_id.to_string()),
            status: Some(TaskStatus::Error),
            status_code,
            url: Some(url.to_string()),
            message: Some(message),
            problems: None,
            skipped: !announce,
        }
    }
}
