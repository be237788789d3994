//! Dependency graph builder.
//!
//! Rebuilds the tick's graph from every non-terminal task:
//!
//! 1. load active tasks, oldest first
//! 2. split running from not-running
//! 3. fail running tasks the execution backend no longer knows (orphans)
//! 4. expand `new` tasks into synthetic `waiting` prerequisites
//! 5. assemble the graph: running tasks first, then waiting tasks with an
//!    edge to every already-added task they are blocked by

use std::sync::Arc;

use chrono::{Duration, Utc};
use job_core::{
    ExecutionBackend, JobStore, NewTask, Notifier, StatusChange, StoreError, TaskNode, TaskStatus,
    TaskUpdate,
};

use crate::blocking::BlockingRules;
use crate::context::SchedulingContext;
use crate::error::SchedulerResult;
use crate::graph::TaskGraph;

/// Counts from one successful rebuild.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildSummary {
    pub running: usize,
    pub waiting: usize,
    pub orphaned: usize,
    pub expanded: usize,
    pub prerequisites_created: usize,
    pub canceled: usize,
}

pub struct GraphBuilder {
    store: Arc<dyn JobStore>,
    backend: Arc<dyn ExecutionBackend>,
    notifier: Arc<dyn Notifier>,
    rules: BlockingRules,
}

impl GraphBuilder {
    pub fn new(
        store: Arc<dyn JobStore>,
        backend: Arc<dyn ExecutionBackend>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            backend,
            notifier,
            rules: BlockingRules::default(),
        }
    }

    pub fn with_rules(mut self, rules: BlockingRules) -> Self {
        self.rules = rules;
        self
    }

    pub fn rules(&self) -> &BlockingRules {
        &self.rules
    }

    /// Rebuild `ctx.graph`.
    ///
    /// Returns `Ok(None)` and clears the graph when the execution backend
    /// cannot be reached: a missing handle is then indistinguishable from a
    /// backend outage, so no task is declared orphaned.
    pub async fn rebuild(&self, ctx: &mut SchedulingContext) -> SchedulerResult<Option<BuildSummary>> {
        let active = self.store.list_active().await?;

        let (running, rest): (Vec<TaskNode>, Vec<TaskNode>) = active
            .into_iter()
            .partition(|t| t.status == TaskStatus::Running);

        let handles = match self.backend.active_handles().await {
            Ok(handles) => handles,
            Err(e) => {
                tracing::warn!(error = %e, "Execution backend unreachable, skipping tick");
                ctx.graph = None;
                return Ok(None);
            }
        };

        let mut summary = BuildSummary::default();

        let mut still_running = Vec::with_capacity(running.len());
        for task in running {
            let known = task
                .execution_handle
                .as_ref()
                .is_some_and(|h| handles.contains(h));
            if known {
                still_running.push(task);
            } else if self.fail_orphan(ctx, &task).await {
                summary.orphaned += 1;
            }
        }

        let mut waiting = Vec::with_capacity(rest.len());
        for task in rest {
            if task.cancel_flag {
                if self.cancel_unstarted(ctx, &task).await {
                    summary.canceled += 1;
                }
                continue;
            }

            if task.status != TaskStatus::New {
                waiting.push(task);
                continue;
            }

            match self.expand(&task, &still_running, &waiting).await {
                Ok((dependent, prerequisites)) => {
                    summary.expanded += 1;
                    summary.prerequisites_created += prerequisites.len();
                    waiting.extend(prerequisites);
                    waiting.push(dependent);
                }
                Err(e) => {
                    tracing::warn!(task_id = task.id, error = %e, "Dependency expansion failed, retrying next tick");
                }
            }
        }

        waiting.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));

        summary.running = still_running.len();
        summary.waiting = waiting.len();
        ctx.graph = Some(self.assemble(still_running, waiting));

        tracing::debug!(
            running = summary.running,
            waiting = summary.waiting,
            orphaned = summary.orphaned,
            expanded = summary.expanded,
            "Dependency graph rebuilt"
        );

        Ok(Some(summary))
    }

    fn assemble(&self, running: Vec<TaskNode>, waiting: Vec<TaskNode>) -> TaskGraph {
        let mut graph = TaskGraph::new();
        let mut added: Vec<TaskNode> = Vec::with_capacity(running.len() + waiting.len());

        for task in running {
            graph.add_task(task.clone());
            added.push(task);
        }

        for task in waiting {
            graph.add_task(task.clone());
            for other in &added {
                if self.rules.is_blocked_by(&task, other) {
                    graph.add_edge(task.id, other.id);
                }
            }
            added.push(task);
        }

        // A linked prerequisite may have been created after its dependent.
        for task in &added {
            for &prerequisite in &task.prerequisite_ids {
                graph.add_edge(task.id, prerequisite);
            }
        }

        graph
    }

    async fn fail_orphan(&self, ctx: &SchedulingContext, task: &TaskNode) -> bool {
        let explanation = match &task.execution_handle {
            Some(handle) => format!(
                "Task was orphaned: execution handle {} is no longer active",
                handle
            ),
            None => "Task was orphaned: running without an execution handle".to_string(),
        };

        let update = TaskUpdate::finished(TaskStatus::Failed, explanation).expecting(TaskStatus::Running);
        match self.store.update(task.id, update).await {
            Ok(updated) => {
                tracing::warn!(
                    task_id = task.id,
                    handle = ?task.execution_handle,
                    "Orphaned task marked failed"
                );
                self.emit(ctx, &updated).await;
                true
            }
            Err(StoreError::StatusMismatch { found, .. }) => {
                tracing::debug!(task_id = task.id, status = %found, "Task left running before orphan check");
                false
            }
            Err(e) => {
                tracing::warn!(task_id = task.id, error = %e, "Failed to mark orphaned task");
                false
            }
        }
    }

    async fn cancel_unstarted(&self, ctx: &SchedulingContext, task: &TaskNode) -> bool {
        let update = TaskUpdate::finished(TaskStatus::Canceled, "Canceled before start").expecting(task.status);
        match self.store.update(task.id, update).await {
            Ok(updated) => {
                tracing::info!(task_id = task.id, "Canceled task before start");
                self.emit(ctx, &updated).await;
                true
            }
            Err(e) => {
                tracing::warn!(task_id = task.id, error = %e, "Failed to cancel unstarted task");
                false
            }
        }
    }

    /// Create the prerequisites of a `new` task and move it to `waiting`.
    ///
    /// A dependency is skipped when its target synced within the cache
    /// timeout, and linked instead of duplicated when a task of the same kind
    /// on the same target is already active.
    async fn expand(
        &self,
        task: &TaskNode,
        running: &[TaskNode],
        waiting: &[TaskNode],
    ) -> SchedulerResult<(TaskNode, Vec<TaskNode>)> {
        let now = Utc::now();
        let mut linked = Vec::new();
        let mut to_create = Vec::new();

        for dependency in &task.spec.dependencies {
            let target = dependency.target();

            let existing = running
                .iter()
                .chain(waiting.iter())
                .find(|other| other.kind == dependency.kind && other.sync_target() == Some(target));
            if let Some(existing) = existing {
                linked.push(existing.id);
                continue;
            }

            if let Some(state) = self.store.target_state(target).await? {
                if state.is_fresh(now, dependency.cache_timeout_secs) {
                    tracing::debug!(task_id = task.id, ?target, "Target is fresh, no prerequisite needed");
                    continue;
                }
            }

            to_create.push(dependency);
        }

        let total = to_create.len() as i64;
        let mut prerequisites = Vec::with_capacity(to_create.len());
        for (position, dependency) in to_create.into_iter().enumerate() {
            let created = task.created - Duration::seconds(total - position as i64);
            let new_task = NewTask::new(
                dependency.kind,
                format!("{} (dependency of {})", dependency.kind, task.log_name()),
            )
            .with_status(TaskStatus::Waiting)
            .with_impact(dependency.task_impact)
            .with_spec(dependency.prerequisite_spec())
            .created_at(created);

            let prerequisite = self.store.insert(new_task).await?;
            tracing::info!(
                task_id = task.id,
                prerequisite_id = prerequisite.id,
                kind = %prerequisite.kind,
                "Created prerequisite task"
            );
            linked.push(prerequisite.id);
            prerequisites.push(prerequisite);
        }

        let update = TaskUpdate {
            prerequisite_ids: Some(linked),
            ..TaskUpdate::status(TaskStatus::Waiting).expecting(TaskStatus::New)
        };
        let dependent = self.store.update(task.id, update).await?;
        Ok((dependent, prerequisites))
    }

    async fn emit(&self, ctx: &SchedulingContext, task: &TaskNode) {
        if ctx.suppress_notifications {
            return;
        }
        self.notifier
            .notify(StatusChange::for_task(task).with("explanation", task.job_explanation.as_str()))
            .await;
    }
}
