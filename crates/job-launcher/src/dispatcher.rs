//! In-process dispatch of admitted tasks to the launcher.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use job_core::{
    BackendError, ExecutionBackend, FailureNotice, PreflightError, ResultExt, StoreResult,
    TaskDispatcher, TaskId, TaskNode, TaskStatus, TaskUpdate,
};
use uuid::Uuid;

use crate::engine::Launcher;

type FinishHook = Arc<dyn Fn(&TaskNode) + Send + Sync>;

/// Execution handles of launches still running in this process.
#[derive(Clone, Default)]
pub struct ActiveRegistry {
    handles: Arc<Mutex<HashMap<String, TaskId>>>,
}

impl ActiveRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: &str, task_id: TaskId) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.insert(handle.to_string(), task_id);
        }
    }

    pub fn release(&self, handle: &str) {
        if let Ok(mut handles) = self.handles.lock() {
            handles.remove(handle);
        }
    }

    pub fn len(&self) -> usize {
        self.handles.lock().map(|h| h.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ExecutionBackend for ActiveRegistry {
    async fn active_handles(&self) -> Result<HashSet<String>, BackendError> {
        let handles = self
            .handles
            .lock()
            .map_err(|e| BackendError::Unavailable(format!("registry poisoned: {}", e)))?;
        Ok(handles.keys().cloned().collect())
    }
}

/// Runs each started task as a supervised launch on the local host.
pub struct LocalDispatcher {
    launcher: Arc<Launcher>,
    registry: ActiveRegistry,
    on_finish: Option<FinishHook>,
}

impl LocalDispatcher {
    pub fn new(launcher: Arc<Launcher>, registry: ActiveRegistry) -> Self {
        Self {
            launcher,
            registry,
            on_finish: None,
        }
    }

    /// Called with the final record after every launch ends.
    pub fn on_finish(mut self, hook: impl Fn(&TaskNode) + Send + Sync + 'static) -> Self {
        self.on_finish = Some(Arc::new(hook));
        self
    }

    pub fn registry(&self) -> &ActiveRegistry {
        &self.registry
    }
}

#[async_trait]
impl TaskDispatcher for LocalDispatcher {
    async fn preflight(&self, task: &TaskNode) -> Result<(), PreflightError> {
        if !matches!(
            task.status,
            TaskStatus::New | TaskStatus::Waiting | TaskStatus::Pending
        ) {
            return Err(PreflightError::WrongStatus(task.status));
        }
        self.launcher.check(task)?;
        Ok(())
    }

    async fn start(&self, task: &TaskNode, notice: FailureNotice) -> StoreResult<String> {
        let handle = Uuid::new_v4().to_string();
        self.registry.register(&handle, task.id);

        let running = match self.launcher.begin(task, &handle).await {
            Ok(running) => running,
            Err(e) => {
                self.registry.release(&handle);
                return Err(e);
            }
        };

        let launcher = Arc::clone(&self.launcher);
        let registry = self.registry.clone();
        let on_finish = self.on_finish.clone();
        let handle_owned = handle.clone();

        tokio::spawn(async move {
            let task_id = running.id;
            let fallback = running.clone();
            let supervised = {
                let launcher = Arc::clone(&launcher);
                tokio::spawn(async move { launcher.supervise(running).await })
            };

            let finished = match supervised.await {
                Ok(finished) => finished,
                Err(e) => {
                    tracing::error!(task_id, error = %e, "Launch supervisor crashed");
                    crash_record(&launcher, fallback).await
                }
            };

            registry.release(&handle_owned);

            if finished.status != TaskStatus::Successful && !notice.is_empty() {
                notice.apply(launcher.store().as_ref(), &finished).await;
            }
            if let Some(hook) = on_finish {
                hook(&finished);
            }
        });

        Ok(handle)
    }
}

/// Record a crashed supervisor as an error, keeping any status it already wrote.
async fn crash_record(launcher: &Launcher, fallback: TaskNode) -> TaskNode {
    let store = launcher.store();
    let current = store
        .get(fallback.id)
        .await
        .log("reloading crashed task")
        .unwrap_or(fallback);
    if current.status.is_terminal() {
        return current;
    }
    let update = TaskUpdate::finished(TaskStatus::Error, "Launcher crashed").expecting(current.status);
    match store.update(current.id, update).await {
        Ok(node) => node,
        Err(e) => {
            tracing::error!(task_id = current.id, error = %e, "Failed to record crashed launch");
            current
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_registry_tracks_handles() {
        let registry = ActiveRegistry::new();
        registry.register("a", 1);
        registry.register("b", 2);
        registry.release("a");

        let handles = registry.active_handles().await.unwrap();
        assert_eq!(handles, HashSet::from(["b".to_string()]));
        assert_eq!(registry.len(), 1);
    }
}
