//! Registering a live connection's interest in a task.

use shared_types::{AckStatus, ConnectionBinding, SubscriptionAck};

use crate::error::AppError;
use crate::store::ConnectionRegistry;

pub const SUBSCRIBED_MESSAGE: &str = "Subscription successful";
pub const SUBSCRIBE_FAILED_MESSAGE: &str = "Subscription failed";

/// Bind `connection_id` to `task_id`. Repeating the call is harmless and
/// makes this connection the most recent one for the task. The task does
/// not have to exist yet.
pub async fn subscribe(
    registry: &dyn ConnectionRegistry,
    connection_id: &str,
    task_id: Option<&str>,
    url: Option<&str>,
) -> Result<ConnectionBinding, AppError> {
    let task_id = task_id
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| AppError::InvalidInput("taskId is required".to_string()))?;

    if connection_id.is_empty() {
        return Err(AppError::InvalidInput("connectionId is required".to_string()));
    }
    if connection_id == task_id {
        return Err(AppError::InvalidInput(
            "connectionId must differ from taskId".to_string(),
        ));
    }

    let url = url.map(str::trim).filter(|u| !u.is_empty());
    let binding = registry.bind(task_id, connection_id, url).await?;
    tracing::info!(
        task_id,
        connection_id,
        seq = binding.seq,
        "Subscription stored"
    );
    Ok(binding)
}

/// The reply sent back on the channel for a subscribe attempt.
pub fn ack_for(task_id: Option<&str>, result: &Result<ConnectionBinding, AppError>) -> SubscriptionAck {
    match result {
        Ok(binding) => SubscriptionAck {
            message: SUBSCRIBED_MESSAGE.to_string(),
            task_id: Some(binding.task_id.clone()),
            status: AckStatus::Subscribed,
        },
        Err(AppError::StorageUnavailable(_)) => SubscriptionAck {
            message: SUBSCRIBE_FAILED_MESSAGE.to_string(),
            task_id: task_id.map(ToString::to_string),
            status: AckStatus::Warning,
        },
        Err(e) => SubscriptionAck {
            message: e.to_string(),
            task_id: task_id.map(ToString::to_string),
            status: AckStatus::Error,
        },
    }
}
