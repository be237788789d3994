//! In-memory job store.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::JobStore;
use crate::error::{StoreError, StoreResult};
use crate::model::{NewTask, TargetRef, TargetState, TaskId, TaskNode, TaskStatus, TaskUpdate};

#[derive(Default)]
struct Inner {
    next_id: TaskId,
    tasks: BTreeMap<TaskId, TaskNode>,
    targets: HashMap<TargetRef, TargetState>,
    /// Number of upcoming updates to reject with a write conflict.
    injected_conflicts: u32,
}

/// Job store kept in process memory.
///
/// Used by tests and single-node setups; clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryJobStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` updates with [`StoreError::Conflict`].
    pub async fn inject_conflicts(&self, count: u32) {
        self.inner.write().await.injected_conflicts = count;
    }

    /// Snapshot of every record, including terminal ones.
    pub async fn all(&self) -> Vec<TaskNode> {
        self.inner.read().await.tasks.values().cloned().collect()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn list_active(&self) -> StoreResult<Vec<TaskNode>> {
        let inner = self.inner.read().await;
        let mut active: Vec<TaskNode> = inner
            .tasks
            .values()
            .filter(|t| t.status.is_active())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        Ok(active)
    }

    async fn get(&self, id: TaskId) -> StoreResult<TaskNode> {
        self.inner
            .read()
            .await
            .tasks
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn insert(&self, task: NewTask) -> StoreResult<TaskNode> {
        let mut inner = self.inner.write().await;
        inner.next_id += 1;
        let node = task.into_node(inner.next_id, Utc::now());
        inner.tasks.insert(node.id, node.clone());
        Ok(node)
    }

    async fn update(&self, id: TaskId, update: TaskUpdate) -> StoreResult<TaskNode> {
        let mut inner = self.inner.write().await;
        if inner.injected_conflicts > 0 {
            inner.injected_conflicts -= 1;
            return Err(StoreError::Conflict(format!(
                "injected conflict updating task {}",
                id
            )));
        }

        let node = inner.tasks.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        let mut updated = node.clone();
        update.apply_to(&mut updated)?;
        *node = updated.clone();
        Ok(updated)
    }

    async fn target_state(&self, target: TargetRef) -> StoreResult<Option<TargetState>> {
        Ok(self.inner.read().await.targets.get(&target).cloned())
    }

    async fn record_target_run(
        &self,
        target: TargetRef,
        status: TaskStatus,
        finished: DateTime<Utc>,
    ) -> StoreResult<TargetState> {
        let mut inner = self.inner.write().await;
        let state = inner.targets.entry(target).or_default();
        state.record(status, finished);
        Ok(state.clone())
    }
}
