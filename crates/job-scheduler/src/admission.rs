//! Admission controller.
//!
//! Starts ready tasks from the tick's graph, oldest first, while their total
//! impact fits the remaining capacity. When nothing at all is running the
//! oldest candidate starts regardless of its impact, so an oversized task is
//! never blocked forever.

use std::sync::Arc;

use job_core::{
    DependentRef, FailureNotice, JobStore, Notifier, StatusChange, TaskDispatcher, TaskId,
    TaskNode, TaskStatus, TaskUpdate,
};

use crate::context::SchedulingContext;

/// Decisions taken by one admission pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AdmissionReport {
    pub started: Vec<TaskId>,
    /// Failed pre-flight or could not be handed off.
    pub failed: Vec<TaskId>,
    /// Ready but did not fit the remaining capacity.
    pub deferred: Vec<TaskId>,
}

impl AdmissionReport {
    pub fn is_empty(&self) -> bool {
        self.started.is_empty() && self.failed.is_empty() && self.deferred.is_empty()
    }
}

pub struct AdmissionController {
    store: Arc<dyn JobStore>,
    dispatcher: Arc<dyn TaskDispatcher>,
    notifier: Arc<dyn Notifier>,
}

impl AdmissionController {
    pub fn new(
        store: Arc<dyn JobStore>,
        dispatcher: Arc<dyn TaskDispatcher>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            dispatcher,
            notifier,
        }
    }

    /// Run one admission pass over `ctx.graph`.
    pub async fn admit(&self, ctx: &mut SchedulingContext) -> AdmissionReport {
        let mut report = AdmissionReport::default();
        let suppress = ctx.suppress_notifications;
        let capacity = i64::from(ctx.capacity);

        let Some(graph) = ctx.graph.as_mut() else {
            return report;
        };

        let (running, candidates): (Vec<TaskNode>, Vec<TaskNode>) = graph
            .leaf_nodes()
            .into_iter()
            .cloned()
            .partition(|t| t.status == TaskStatus::Running);

        let mut running_count = running.len();
        let mut remaining = capacity
            - running
                .iter()
                .map(|t| i64::from(t.task_impact))
                .sum::<i64>();

        for task in candidates {
            let cost = i64::from(task.task_impact);
            if cost > remaining && running_count > 0 {
                report.deferred.push(task.id);
                continue;
            }

            let notice = FailureNotice::new(
                graph
                    .dependents_of(task.id)
                    .into_iter()
                    .map(|d| DependentRef { kind: d.kind, id: d.id })
                    .collect(),
            );

            if let Err(e) = self.dispatcher.preflight(&task).await {
                tracing::warn!(task_id = task.id, error = %e, "Pre-flight check failed");
                let explanation = format!("Pre-flight check failed: {}", e);
                if let Some(failed) = self.fail(&task, explanation).await {
                    notice.apply(self.store.as_ref(), &failed).await;
                    self.emit(suppress, &failed).await;
                }
                graph.set_status(task.id, TaskStatus::Failed);
                report.failed.push(task.id);
                continue;
            }

            let pending = match self
                .store
                .update(task.id, TaskUpdate::status(TaskStatus::Pending).expecting(task.status))
                .await
            {
                Ok(pending) => pending,
                Err(e) => {
                    // Most likely canceled or finished since the rebuild.
                    tracing::debug!(task_id = task.id, error = %e, "Task changed before start, skipping");
                    continue;
                }
            };

            remaining -= cost;
            running_count += 1;

            match self.dispatcher.start(&pending, notice).await {
                Ok(handle) => {
                    tracing::info!(
                        task_id = task.id,
                        kind = %task.kind,
                        task_impact = task.task_impact,
                        remaining,
                        handle = %handle,
                        "Task started"
                    );
                    graph.set_status(task.id, TaskStatus::Running);
                    report.started.push(task.id);
                }
                Err(e) => {
                    tracing::error!(task_id = task.id, error = %e, "Failed to hand task to launcher");
                    let explanation = format!("Failed to start: {}", e);
                    if let Some(failed) = self.fail(&pending, explanation).await {
                        self.emit(suppress, &failed).await;
                    }
                    graph.set_status(task.id, TaskStatus::Failed);
                    report.failed.push(task.id);
                }
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                started = report.started.len(),
                failed = report.failed.len(),
                deferred = report.deferred.len(),
                "Admission pass complete"
            );
        }
        report
    }

    async fn fail(&self, task: &TaskNode, explanation: String) -> Option<TaskNode> {
        let update = TaskUpdate::finished(TaskStatus::Failed, explanation).expecting(task.status);
        match self.store.update(task.id, update).await {
            Ok(failed) => Some(failed),
            Err(e) => {
                tracing::warn!(task_id = task.id, error = %e, "Failed to mark task failed");
                None
            }
        }
    }

    async fn emit(&self, suppress: bool, task: &TaskNode) {
        if suppress {
            return;
        }
        self.notifier
            .notify(StatusChange::for_task(task).with("explanation", task.job_explanation.as_str()))
            .await;
    }
}
