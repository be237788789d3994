//! Persistence workers.
//!
//! Each worker owns one bounded queue. A worker that has handled
//! `max_messages` events returns its queue and exits; the pool then starts a
//! replacement on the same queue, so nothing already queued is lost.

use std::sync::Arc;
use std::time::Duration;

use job_core::RetryPolicy;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::{IngestError, IngestResult};
use crate::model::NewEvent;
use crate::persist::{flag_parent, persist_with_retry};
use crate::store::EventStore;

const QUEUE_WAIT: Duration = Duration::from_millis(50);
const MAX_CLOSED_ATTEMPTS: u32 = 20;

/// Settings shared by every worker in a pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub queue_size: usize,
    /// Zero disables recycling.
    pub max_messages: u64,
    pub retry: RetryPolicy,
}

struct Slot {
    tx: mpsc::Sender<NewEvent>,
    handle: JoinHandle<mpsc::Receiver<NewEvent>>,
    generation: u64,
}

/// Fixed set of workers fed round-robin.
pub struct WorkerPool {
    slots: Vec<Slot>,
    store: Arc<dyn EventStore>,
    settings: WorkerSettings,
}

impl WorkerPool {
    /// Start `size` workers (at least one). Must be called inside a runtime.
    pub fn start(size: usize, store: Arc<dyn EventStore>, settings: WorkerSettings) -> Self {
        let slots = (0..size.max(1))
            .map(|index| {
                let (tx, rx) = mpsc::channel(settings.queue_size.max(1));
                Slot {
                    tx,
                    handle: spawn_worker(index, 0, rx, store.clone(), settings),
                    generation: 0,
                }
            })
            .collect();
        Self {
            slots,
            store,
            settings,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Queue `event` on worker `index`, waiting while its queue is full.
    ///
    /// A full queue may belong to a worker that just reached its message
    /// limit, so the wait is sliced and the worker replaced in between.
    pub async fn dispatch(&mut self, index: usize, event: NewEvent) -> IngestResult<()> {
        let index = index % self.slots.len();
        let mut closed_attempts = 0;

        loop {
            self.recycle(index).await;
            match tokio::time::timeout(QUEUE_WAIT, self.slots[index].tx.reserve()).await {
                Ok(Ok(permit)) => {
                    permit.send(event);
                    return Ok(());
                }
                Ok(Err(_)) => {
                    // Receiver dropped: the worker died holding it.
                    closed_attempts += 1;
                    if closed_attempts > MAX_CLOSED_ATTEMPTS {
                        return Err(IngestError::WorkerGone(index));
                    }
                    tokio::time::sleep(QUEUE_WAIT).await;
                }
                Err(_) => {}
            }
        }
    }

    /// Replace every worker that has exited.
    pub async fn recycle_all(&mut self) {
        for index in 0..self.slots.len() {
            self.recycle(index).await;
        }
    }

    async fn recycle(&mut self, index: usize) {
        let slot = &mut self.slots[index];
        if !slot.handle.is_finished() {
            return;
        }

        let rx = match (&mut slot.handle).await {
            Ok(rx) => rx,
            Err(e) => {
                tracing::error!(worker = index, error = %e, "Event worker crashed, queued events lost");
                let (tx, rx) = mpsc::channel(self.settings.queue_size.max(1));
                slot.tx = tx;
                rx
            }
        };

        slot.generation += 1;
        tracing::debug!(worker = index, generation = slot.generation, "Replacing event worker");
        slot.handle = spawn_worker(index, slot.generation, rx, self.store.clone(), self.settings);
    }

    /// Close every queue and wait for the workers to drain it.
    pub async fn shutdown(self) {
        for (index, slot) in self.slots.into_iter().enumerate() {
            let Slot { tx, handle, .. } = slot;
            drop(tx);
            let mut rx = match handle.await {
                Ok(rx) => rx,
                Err(e) => {
                    tracing::error!(worker = index, error = %e, "Event worker crashed during shutdown");
                    continue;
                }
            };
            // A worker that stopped at its message limit may leave events behind.
            while let Some(event) = rx.recv().await {
                if let Some(persisted) = persist_with_retry(self.store.as_ref(), event, self.settings.retry).await {
                    flag_parent(self.store.as_ref(), &persisted, self.settings.retry).await;
                }
            }
        }
    }
}

fn spawn_worker(
    index: usize,
    generation: u64,
    rx: mpsc::Receiver<NewEvent>,
    store: Arc<dyn EventStore>,
    settings: WorkerSettings,
) -> JoinHandle<mpsc::Receiver<NewEvent>> {
    tokio::spawn(run_worker(index, generation, rx, store, settings))
}

async fn run_worker(
    index: usize,
    generation: u64,
    mut rx: mpsc::Receiver<NewEvent>,
    store: Arc<dyn EventStore>,
    settings: WorkerSettings,
) -> mpsc::Receiver<NewEvent> {
    let mut processed: u64 = 0;

    while settings.max_messages == 0 || processed < settings.max_messages {
        let Some(event) = rx.recv().await else {
            break;
        };
        processed += 1;

        if let Some(persisted) = persist_with_retry(store.as_ref(), event, settings.retry).await {
            flag_parent(store.as_ref(), &persisted, settings.retry).await;
        }
    }

    tracing::debug!(worker = index, generation, processed, "Event worker exiting");
    rx
}
