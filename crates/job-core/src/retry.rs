//! Bounded fixed-delay retry for transient store failures.

use std::future::Future;
use std::time::Duration;

use crate::error::StoreResult;
use crate::model::{TaskId, TaskNode, TaskUpdate};
use crate::store::JobStore;

/// How many times to try and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub const fn fixed(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }

    /// Launcher status writes: 5 attempts, 5 seconds apart.
    pub const fn status_updates() -> Self {
        Self::fixed(5, Duration::from_secs(5))
    }

    /// Event persistence: 10 attempts, 1 second apart.
    pub const fn event_writes() -> Self {
        Self::fixed(10, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds, fails permanently, or attempts run out.
///
/// Only transient errors ([`StoreError::is_transient`](crate::StoreError::is_transient))
/// are retried.
pub async fn retry_transient<T, F, Fut>(policy: RetryPolicy, what: &str, mut op: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts = attempts,
                    error = %e,
                    what,
                    "Transient store failure, retrying"
                );
                tokio::time::sleep(policy.delay).await;
                attempt += 1;
            }
            Err(e) => {
                if e.is_transient() {
                    tracing::error!(
                        attempts,
                        error = %e,
                        what,
                        "Store write failed after all retries"
                    );
                }
                return Err(e);
            }
        }
    }
}

/// [`JobStore::update`] with [`retry_transient`].
pub async fn update_with_retry(
    store: &dyn JobStore,
    id: TaskId,
    update: TaskUpdate,
    policy: RetryPolicy,
) -> StoreResult<TaskNode> {
    retry_transient(policy, "task update", || store.update(id, update.clone())).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::model::{NewTask, TaskKind, TaskStatus};
    use crate::store::MemoryJobStore;

    const FAST: RetryPolicy = RetryPolicy::fixed(5, Duration::from_millis(1));

    #[tokio::test]
    async fn test_retries_through_conflicts() {
        let store = MemoryJobStore::new();
        let task = store
            .insert(NewTask::new(TaskKind::ProjectSync, "sync"))
            .await
            .unwrap();
        store.inject_conflicts(4).await;

        let updated = update_with_retry(&store, task.id, TaskUpdate::status(TaskStatus::Waiting), FAST)
            .await
            .unwrap();
        assert_eq!(updated.status, TaskStatus::Waiting);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let store = MemoryJobStore::new();
        let task = store
            .insert(NewTask::new(TaskKind::ProjectSync, "sync"))
            .await
            .unwrap();
        store.inject_conflicts(5).await;

        let err = update_with_retry(&store, task.id, TaskUpdate::status(TaskStatus::Waiting), FAST)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let mut calls = 0;
        let result: StoreResult<()> = retry_transient(FAST, "lookup", || {
            calls += 1;
            async { Err(StoreError::NotFound(1)) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls, 1);
    }
}
