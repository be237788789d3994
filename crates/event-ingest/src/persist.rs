//! Event writes with bounded retry.

use job_core::retry::retry_transient;
use job_core::RetryPolicy;

use crate::model::{ExecutionEvent, NewEvent};
use crate::store::EventStore;

/// Insert `event`, retrying transient failures.
///
/// Returns `None` when the event is lost; the loss is logged and the pipeline
/// carries on.
pub async fn persist_with_retry(
    store: &dyn EventStore,
    event: NewEvent,
    policy: RetryPolicy,
) -> Option<ExecutionEvent> {
    let job_id = event.job_id;
    let counter = event.counter;
    let kind = event.kind.clone();

    match retry_transient(policy, "event insert", || store.insert(event.clone())).await {
        Ok(persisted) => Some(persisted),
        Err(e) => {
            tracing::error!(
                job_id,
                counter,
                event = %kind,
                error = %e,
                "Event lost"
            );
            None
        }
    }
}

/// Flag the parent of a failed event, retrying transient failures.
pub async fn flag_parent(store: &dyn EventStore, child: &ExecutionEvent, policy: RetryPolicy) {
    let Some(parent_id) = child.parent_id.filter(|_| child.failed) else {
        return;
    };
    if let Err(e) = retry_transient(policy, "event failed flag", || store.mark_failed(parent_id)).await {
        tracing::warn!(
            job_id = child.job_id,
            parent_id,
            error = %e,
            "Failed to flag parent event"
        );
    }
}
