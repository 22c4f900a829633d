//! Task -> connection resolution with backoff.
//!
//! The subscription may land before or after the worker starts, so the
//! lookup is retried. Running out of attempts is an expected outcome (the
//! client may never subscribe) and yields `None`; storage errors on the way
//! are retried the same way and never abort the task.

use crate::retry::RetryPolicy;
use crate::store::ConnectionRegistry;

pub async fn resolve_connection(
    registry: &dyn ConnectionRegistry,
    task_id: &str,
    policy: &RetryPolicy,
) -> Option<String> {
    tracing::debug!(
        task_id,
        max_attempts = policy.max_attempts,
        initial_delay_ms = policy.initial_delay.as_millis() as u64,
        max_delay_ms = policy.max_delay.as_millis() as u64,
        "Looking up connection for task"
    );

    let mut attempt = 0;
    loop {
        match registry.latest(task_id).await {
            Ok(Some(binding)) if binding.connection_id != task_id => {
                tracing::info!(
                    task_id,
                    connection_id = %binding.connection_id,
                    attempt = attempt + 1,
                    "Found connection for task"
                );
                return Some(binding.connection_id);
            }
            Ok(_) => {
                tracing::debug!(task_id, attempt = attempt + 1, "No connection bound yet");
            }
            Err(e) => {
                tracing::warn!(
                    task_id,
                    attempt = attempt + 1,
                    error = %e,
                    "Connection lookup failed"
                );
            }
        }

        if !policy.pause(attempt).await {
            break;
        }
        attempt += 1;
    }

    tracing::info!(
        task_id,
        attempts = policy.attempts(),
        "No connection found for task; continuing without live updates"
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use chrono::Utc;
    use shared_types::ConnectionBinding;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::{Duration, Instant};

    /// Registry whose `latest` answers from a script, one entry per call.
    struct ScriptedRegistry {
        script: Vec<Result<Option<&'static str>, StoreError>>,
        calls: AtomicU32,
    }

    impl ScriptedRegistry {
        fn new(script: Vec<Result<Option<&'static str>, StoreError>>) -> Self {
            Self {
                script,
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConnectionRegistry for ScriptedRegistry {
        async fn bind(
            &self,
            _task_id: &str,
            _connection_id: &str,
            _url: Option<&str>,
        ) -> Result<ConnectionBinding, StoreError> {
            unreachable!("resolution never writes")
        }

        async fn latest(&self, task_id: &str) -> Result<Option<ConnectionBinding>, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
            let step = self.script.get(call).cloned().unwrap_or(Ok(None));
            step.map(|found| {
                found.map(|connection_id| ConnectionBinding {
                    task_id: task_id.to_string(),
                    connection_id: connection_id.to_string(),
                    url: None,
                    created_at: Utc::now(),
                    seq: call as i64 + 1,
                })
            })
        }
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            jitter_fraction: 0.3,
        }
    }

    #[tokio::test]
    async fn test_found_on_first_attempt() {
        let registry = ScriptedRegistry::new(vec![Ok(Some("conn-1"))]);
        let found = resolve_connection(&registry, "t-1", &fast_policy(3)).await;
        assert_eq!(found.as_deref(), Some("conn-1"));
        assert_eq!(registry.calls(), 1);
    }

    #[tokio::test]
    async fn test_subscription_landing_late_is_found() {
        let registry = ScriptedRegistry::new(vec![Ok(None), Ok(None), Ok(Some("conn-late"))]);
        let found = resolve_connection(&registry, "t-1", &fast_policy(5)).await;
        assert_eq!(found.as_deref(), Some("conn-late"));
        assert_eq!(registry.calls(), 3);
    }

    #[tokio::test]
    async fn test_storage_errors_are_retried() {
        let registry = ScriptedRegistry::new(vec![
            Err(StoreError::Database("disk I/O error".to_string())),
            Ok(Some("conn-1")),
        ]);
        let found = resolve_connection(&registry, "t-1", &fast_policy(3)).await;
        assert_eq!(found.as_deref(), Some("conn-1"));
    }

    #[tokio::test]
    async fn test_exhaustion_returns_none_within_bounds() {
        let registry = ScriptedRegistry::new(vec![
            Ok(None),
            Err(StoreError::Database("locked".to_string())),
            Ok(None),
            Ok(None),
        ]);
        let policy = fast_policy(4);
        let started = Instant::now();
        let found = resolve_connection(&registry, "t-1", &policy).await;

        assert!(found.is_none());
        assert_eq!(registry.calls(), 4);
        // Generous slack for scheduler noise; the sleeps alone are <= 15ms.
        assert!(started.elapsed() < policy.max_delay * policy.max_attempts + Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_zero_attempt_policy_queries_once() {
        let registry = ScriptedRegistry::new(vec![Ok(None), Ok(Some("conn-1"))]);
        let found = resolve_connection(&registry, "t-1", &fast_policy(0)).await;
        assert!(found.is_none());
        assert_eq!(registry.calls(), 1);
    }

    #[tokio::test]
    async fn test_self_referential_binding_is_ignored() {
        let registry = ScriptedRegistry::new(vec![Ok(Some("t-1")), Ok(Some("conn-1"))]);
        let found = resolve_connection(&registry, "t-1", &fast_policy(3)).await;
        assert_eq!(found.as_deref(), Some("conn-1"));
    }
}
