//! Ingestion front end.
//!
//! Reads the ordered intake stream and resolves every event's parent from a
//! per-job map of the latest anchors. Anchor events are persisted right here,
//! before the next message is read, so their ids are known by the time any
//! child referencing them is handed to a worker. All other events go to the
//! worker pool round-robin.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use job_core::{RetryPolicy, TaskId};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::config::IngestConfig;
use crate::error::IngestResult;
use crate::model::{EventId, EventKind, InboundEvent, NewEvent};
use crate::persist::persist_with_retry;
use crate::store::EventStore;
use crate::worker::{WorkerPool, WorkerSettings};

const RECYCLE_INTERVAL: Duration = Duration::from_secs(1);

/// Latest persisted anchors of one running job.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct Anchors {
    play_start: Option<EventId>,
    task_start: Option<EventId>,
}

impl Anchors {
    fn parent_for(&self, kind: &EventKind) -> Option<EventId> {
        match kind {
            EventKind::PlayStart => None,
            EventKind::TaskStart => self.play_start,
            _ => self.task_start.or(self.play_start),
        }
    }

    fn record(&mut self, kind: &EventKind, id: EventId) {
        match kind {
            EventKind::PlayStart => {
                self.play_start = Some(id);
                self.task_start = None;
            }
            EventKind::TaskStart => self.task_start = Some(id),
            _ => {}
        }
    }
}

pub struct IngestFrontEnd {
    store: Arc<dyn EventStore>,
    pool: WorkerPool,
    anchors: HashMap<TaskId, Anchors>,
    retry: RetryPolicy,
    received: u64,
}

impl IngestFrontEnd {
    /// Start the worker pool. Must be called inside a runtime.
    pub fn new(store: Arc<dyn EventStore>, config: &IngestConfig) -> Self {
        let retry = config.retry_policy();
        let settings = WorkerSettings {
            queue_size: config.queue_size,
            max_messages: config.max_messages,
            retry,
        };
        Self {
            pool: WorkerPool::start(config.workers, store.clone(), settings),
            store,
            anchors: HashMap::new(),
            retry,
            received: 0,
        }
    }

    pub fn workers(&self) -> usize {
        self.pool.len()
    }

    /// Handle one inbound message.
    pub async fn handle(&mut self, msg: InboundEvent) -> IngestResult<()> {
        let job_id = msg.job_id;
        let kind = EventKind::from(msg.event.as_str());
        let anchors = self.anchors.get(&job_id).copied().unwrap_or_default();
        let event = NewEvent::from_inbound(msg, anchors.parent_for(&kind));

        if kind.is_anchor() {
            if let Some(persisted) = persist_with_retry(self.store.as_ref(), event, self.retry).await {
                self.anchors
                    .entry(job_id)
                    .or_default()
                    .record(&kind, persisted.id);
            }
            return Ok(());
        }

        let worker = (self.received % self.pool.len() as u64) as usize;
        self.received += 1;
        self.pool.dispatch(worker, event).await?;

        if kind == EventKind::Stats {
            self.anchors.remove(&job_id);
        }
        Ok(())
    }

    /// Consume `intake` until it closes, then drain the workers.
    ///
    /// Workers that stopped at their message limit are replaced between
    /// messages and on a timer while the intake is quiet.
    pub async fn run(mut self, mut intake: mpsc::Receiver<InboundEvent>) -> IngestResult<()> {
        let mut recycle = tokio::time::interval(RECYCLE_INTERVAL);
        recycle.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(workers = self.pool.len(), "Event front end started");

        loop {
            tokio::select! {
                msg = intake.recv() => match msg {
                    Some(msg) => self.handle(msg).await?,
                    None => break,
                },
                _ = recycle.tick() => self.pool.recycle_all().await,
            }
        }

        tracing::info!(received = self.received, "Intake closed, draining workers");
        self.shutdown().await;
        Ok(())
    }

    /// Wait for every queued event to be persisted.
    pub async fn shutdown(self) {
        self.pool.shutdown().await;
    }
}
