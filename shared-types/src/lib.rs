//! Shared types between the analyzer backend and its web client
//!
//! These types are used by both:
//! - the analyzer service (HTTP + websocket API, worker, stores)
//! - the browser client (TypeScript bindings generated with ts-rs)
//!
//! Serializable with serde for JSON over WebSocket/HTTP. Field names are
//! camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

// ============================================================================
// Task Records
// ============================================================================

/// Lifecycle status of an analysis task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "analyzer.ts")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Error => "error",
        }
    }

    /// Completed and error are final; nothing may follow them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Error)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "processing" => Ok(TaskStatus::Processing),
            "completed" => Ok(TaskStatus::Completed),
            "error" => Ok(TaskStatus::Error),
            other => Err(format!("unknown task status '{other}'")),
        }
    }
}

/// Persisted state of one analysis request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct TaskRecord {
    pub task_id: String,
    pub url: String,
    pub status: TaskStatus,
    /// 0..=100, never decreases while processing
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Present only once the task is completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problems: Option<Vec<Finding>>,
    /// Present only once the task failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time of the last write
    pub timestamp: DateTime<Utc>,
}

// ============================================================================
// Findings
// ============================================================================

/// A single conversion issue reported for a site.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct Finding {
    pub problem_description: String,
    pub solution_text: String,
    pub impact_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    #[serde(default)]
    pub experiments: Vec<Experiment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct Experiment {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default)]
    pub variants: Vec<Variant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct Variant {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub changes: Vec<Change>,
}

/// One page edit applied by an experiment variant.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct Change {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placement: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webpage_url: Option<String>,
}

// ============================================================================
// Connection Bindings
// ============================================================================

/// Association between a task and the live connection watching it.
///
/// `seq` is assigned by the registry on every write; the binding with the
/// highest `seq` for a task is the authoritative one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct ConnectionBinding {
    pub task_id: String,
    pub connection_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub seq: i64,
}

// ============================================================================
// HTTP API
// ============================================================================

/// POST /analyze body. `url` is optional so a missing field is reported as
/// a 400 by the handler instead of a deserialization rejection.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct AnalyzeResponse {
    pub task_id: String,
}

/// One row of GET /fetchRecords.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct CompletedRecord {
    pub url: String,
    pub status: TaskStatus,
    pub problems: Vec<Finding>,
    pub timestamp: DateTime<Utc>,
}

impl From<TaskRecord> for CompletedRecord {
    fn from(record: TaskRecord) -> Self {
        Self {
            url: record.url,
            status: record.status,
            problems: record.problems.unwrap_or_default(),
            timestamp: record.timestamp,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct FetchRecordsResponse {
    pub success: bool,
    pub data: Vec<CompletedRecord>,
}

/// Catalog maintenance body for PUT/DELETE /admin/analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct CatalogUpdate {
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub problems: Vec<Finding>,
}

// ============================================================================
// Worker Trigger
// ============================================================================

/// Payload handed from the initiator to the worker.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct WorkerPayload {
    pub url: String,
    pub task_id: String,
}

/// Outcome of one worker run, shaped like the HTTP response a synchronous
/// invocation would return.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct WorkerReport {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    pub status_code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problems: Option<Vec<Finding>>,
    /// Set when the run was a duplicate trigger for an already finished task
    #[serde(default)]
    pub skipped: bool,
}

// ============================================================================
// WebSocket Protocol
// ============================================================================

/// Client -> server messages on the duplex channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "action", rename_all = "lowercase")]
#[ts(export, export_to = "analyzer.ts")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default, rename = "taskId")]
        task_id: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    Ping,
}

/// Server -> client session messages that are not task events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(tag = "type", rename_all = "snake_case")]
#[ts(export, export_to = "analyzer.ts")]
pub enum SessionMessage {
    Connected {
        #[serde(rename = "connectionId")]
        connection_id: String,
    },
    Pong,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "analyzer.ts")]
pub enum AckStatus {
    Subscribed,
    Warning,
    Error,
}

/// Reply to an inbound client message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct SubscriptionAck {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub status: AckStatus,
}

/// Progress or terminal event pushed by the worker.
///
/// `timestamp` is left empty by producers and stamped by the push adapter
/// at send time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export, export_to = "analyzer.ts")]
pub struct TaskEvent {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub problems: Option<Vec<Finding>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl TaskEvent {
    pub fn progress(task_id: impl Into<String>, step: impl Into<String>, progress: u8) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Processing,
            current_step: Some(step.into()),
            progress: Some(progress),
            url: None,
            problems: None,
            error: None,
            timestamp: None,
        }
    }

    pub fn completed(
        task_id: impl Into<String>,
        url: impl Into<String>,
        problems: Vec<Finding>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Completed,
            current_step: Some(STEP_COMPLETED.to_string()),
            progress: Some(100),
            url: Some(url.into()),
            problems: Some(problems),
            error: None,
            timestamp: None,
        }
    }

    pub fn failed(
        task_id: impl Into<String>,
        step: impl Into<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            status: TaskStatus::Error,
            current_step: Some(step.into()),
            progress: None,
            url: None,
            problems: None,
            error: Some(error.into()),
            timestamp: None,
        }
    }
}

// ============================================================================
// Constants
// ============================================================================

pub const STEP_VALIDATION: &str = "validation";
pub const STEP_COMPLETED: &str = "completed";
pub const STEP_ERROR: &str = "error";

pub const CLIENT_NOT_FOUND_MESSAGE: &str = "Client doesn't exist";
pub const URL_REQUIRED_MESSAGE: &str = "URL is required";

// ============================================================================
// Tests
// ============================================================================
