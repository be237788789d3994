//! In-memory event store.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use job_core::{StoreError, StoreResult, TaskId};
use tokio::sync::Mutex;

use super::EventStore;
use crate::model::{EventId, ExecutionEvent, NewEvent};

#[derive(Default)]
struct Inner {
    next_id: EventId,
    events: BTreeMap<EventId, ExecutionEvent>,
    injected_conflicts: u32,
}

/// Event store kept in process memory; clones share the same events.
#[derive(Clone, Default)]
pub struct MemoryEventStore {
    inner: Arc<Mutex<Inner>>,
    latency: Duration,
}

impl MemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every insert, simulating a slow database.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Reject the next `count` inserts with [`StoreError::Conflict`].
    pub async fn inject_conflicts(&self, count: u32) {
        self.inner.lock().await.injected_conflicts = count;
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    pub async fn get(&self, id: EventId) -> Option<ExecutionEvent> {
        self.inner.lock().await.events.get(&id).cloned()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn insert(&self, event: NewEvent) -> StoreResult<ExecutionEvent> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let mut inner = self.inner.lock().await;
        if inner.injected_conflicts > 0 {
            inner.injected_conflicts -= 1;
            return Err(StoreError::Conflict("injected conflict".to_string()));
        }

        inner.next_id += 1;
        let event = event.into_event(inner.next_id);
        inner.events.insert(event.id, event.clone());
        Ok(event)
    }

    async fn mark_failed(&self, id: EventId) -> StoreResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.events.get_mut(&id) {
            Some(event) => {
                event.failed = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }

    async fn list_for_job(&self, job_id: TaskId) -> StoreResult<Vec<ExecutionEvent>> {
        let inner = self.inner.lock().await;
        let mut events: Vec<ExecutionEvent> = inner
            .events
            .values()
            .filter(|e| e.job_id == job_id)
            .cloned()
            .collect();
        events.sort_by_key(|e| (e.counter, e.id));
        Ok(events)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::InboundEvent;

    #[tokio::test]
    async fn test_list_orders_by_counter() {
        let store = MemoryEventStore::new();
        for counter in [3, 1, 2] {
            store
                .insert(NewEvent::from_inbound(InboundEvent::new(1, "runner_on_ok", counter), None))
                .await
                .unwrap();
        }
        store
            .insert(NewEvent::from_inbound(InboundEvent::new(2, "runner_on_ok", 1), None))
            .await
            .unwrap();

        let counters: Vec<u64> = store.list_for_job(1).await.unwrap().iter().map(|e| e.counter).collect();
        assert_eq!(counters, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_mark_failed_unknown_event() {
        let store = MemoryEventStore::new();
        assert!(matches!(store.mark_failed(99).await, Err(StoreError::NotFound(99))));
    }
}
