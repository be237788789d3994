//! Seams between the scheduler and whatever executes tasks.

use std::collections::HashSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::StoreResult;
use crate::model::{TaskId, TaskKind, TaskNode, TaskStatus, TaskUpdate};
use crate::store::JobStore;

/// The execution backend could not answer.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Execution backend unavailable: {0}")]
    Unavailable(String),
}

/// Introspection of the execution backend, used for orphan detection.
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Execution handles currently recognized as active.
    async fn active_handles(&self) -> Result<HashSet<String>, BackendError>;
}

/// Why a task may not start.
#[derive(Debug, Error)]
pub enum PreflightError {
    #[error("Task is {0}, not ready to start")]
    WrongStatus(TaskStatus),

    #[error("Missing required input: {0}")]
    NeedsInput(String),

    #[error("Invalid launch parameters: {0}")]
    Invalid(String),
}

/// A task that waits on another one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependentRef {
    pub kind: TaskKind,
    pub id: TaskId,
}

/// Dependents to fail when a task does not succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureNotice {
    pub dependents: Vec<DependentRef>,
}

impl FailureNotice {
    pub fn new(dependents: Vec<DependentRef>) -> Self {
        Self { dependents }
    }

    pub fn is_empty(&self) -> bool {
        self.dependents.is_empty()
    }

    /// Explanation recorded on each dependent of `failed`.
    pub fn explanation(failed: &TaskNode) -> String {
        let detail = serde_json::json!({
            "job_type": failed.kind,
            "job_name": failed.name,
            "job_id": failed.id,
        });
        format!("Previous Task Failed: {}", detail)
    }

    /// Mark every still-active dependent failed. Returns how many were marked.
    pub async fn apply(&self, store: &dyn JobStore, failed: &TaskNode) -> usize {
        let explanation = Self::explanation(failed);
        let mut marked = 0;

        for dependent in &self.dependents {
            match self.fail_dependent(store, dependent, &explanation).await {
                Ok(true) => marked += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        task_id = failed.id,
                        dependent_id = dependent.id,
                        error = %e,
                        "Failed to mark dependent task failed"
                    );
                }
            }
        }

        if marked > 0 {
            tracing::info!(
                task_id = failed.id,
                dependents = marked,
                "Dependents failed after prerequisite did not succeed"
            );
        }
        marked
    }

    async fn fail_dependent(
        &self,
        store: &dyn JobStore,
        dependent: &DependentRef,
        explanation: &str,
    ) -> StoreResult<bool> {
        let current = store.get(dependent.id).await?;
        if current.status.is_terminal() {
            return Ok(false);
        }
        let update = TaskUpdate::finished(TaskStatus::Failed, explanation).expecting(current.status);
        store.update(dependent.id, update).await?;
        Ok(true)
    }
}

/// Starts admitted tasks.
#[async_trait]
pub trait TaskDispatcher: Send + Sync {
    /// Check that a task can start without consuming anything.
    async fn preflight(&self, task: &TaskNode) -> Result<(), PreflightError>;

    /// Start a task and return its execution handle.
    ///
    /// On return the task is `running` with the handle recorded. When the
    /// task later ends without succeeding, `notice` is applied.
    async fn start(&self, task: &TaskNode, notice: FailureNotice) -> StoreResult<String>;
}
