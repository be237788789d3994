//! Execution event store.

mod memory;
mod postgres;

pub use memory::MemoryEventStore;
pub use postgres::PgEventStore;

use async_trait::async_trait;
use job_core::{StoreResult, TaskId};

use crate::model::{EventId, ExecutionEvent, NewEvent};

#[async_trait]
pub trait EventStore: Send + Sync {
    async fn insert(&self, event: NewEvent) -> StoreResult<ExecutionEvent>;

    /// Raise the derived `failed` flag on an already persisted event.
    async fn mark_failed(&self, id: EventId) -> StoreResult<()>;

    /// Events of one job ordered by their sequence counter.
    async fn list_for_job(&self, job_id: TaskId) -> StoreResult<Vec<ExecutionEvent>>;
}
