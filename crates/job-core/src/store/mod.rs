//! Job record store.
//!
//! The store is the single source of truth for task status and cancel flags.
//! Neither the scheduler nor the launcher caches status across iterations;
//! both re-read it through this trait.

mod memory;
mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreResult;
use crate::model::{NewTask, TargetRef, TargetState, TaskId, TaskNode, TaskStatus, TaskUpdate};

/// Durable store of task records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All tasks in `new`, `waiting`, `pending` or `running`, oldest first.
    async fn list_active(&self) -> StoreResult<Vec<TaskNode>>;

    async fn get(&self, id: TaskId) -> StoreResult<TaskNode>;

    async fn insert(&self, task: NewTask) -> StoreResult<TaskNode>;

    /// Apply a field-level update and return the updated record.
    async fn update(&self, id: TaskId, update: TaskUpdate) -> StoreResult<TaskNode>;

    /// Aggregates of a target, if it has ever been recorded.
    async fn target_state(&self, target: TargetRef) -> StoreResult<Option<TargetState>>;

    /// Fold one finished run into a target's aggregates.
    async fn record_target_run(
        &self,
        target: TargetRef,
        status: TaskStatus,
        finished: DateTime<Utc>,
    ) -> StoreResult<TargetState>;
}
