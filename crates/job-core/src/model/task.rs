//! Task records and the status machine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::spec::TaskSpec;
use super::target::TargetRef;
use crate::error::StoreError;

/// Task identifier assigned by the store.
pub type TaskId = i64;

/// Kind of work a task performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Run a playbook against an inventory.
    PlaybookRun,
    /// Refresh a project checkout from source control.
    ProjectSync,
    /// Refresh an inventory from an external source.
    InventorySync,
    /// Run a single module against a host pattern.
    AdHoc,
    /// Maintenance job (cleanup and similar).
    SystemJob,
}

impl TaskKind {
    /// All kinds, in declaration order.
    pub const ALL: [TaskKind; 5] = [
        TaskKind::PlaybookRun,
        TaskKind::ProjectSync,
        TaskKind::InventorySync,
        TaskKind::AdHoc,
        TaskKind::SystemJob,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::PlaybookRun => "playbook_run",
            TaskKind::ProjectSync => "project_sync",
            TaskKind::InventorySync => "inventory_sync",
            TaskKind::AdHoc => "ad_hoc",
            TaskKind::SystemJob => "system_job",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("Unknown task kind: {}", s))
    }
}

/// Task status.
///
/// Moves only forward along
/// `new -> waiting -> pending -> running -> {successful, failed, error, canceled}`.
/// Steps may be skipped; a terminal status is final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    New,
    Waiting,
    Pending,
    Running,
    Successful,
    Failed,
    Error,
    Canceled,
}

impl TaskStatus {
    /// Statuses the scheduler loads on every tick.
    pub const ACTIVE: [TaskStatus; 4] = [
        TaskStatus::New,
        TaskStatus::Waiting,
        TaskStatus::Pending,
        TaskStatus::Running,
    ];

    const ALL: [TaskStatus; 8] = [
        TaskStatus::New,
        TaskStatus::Waiting,
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Successful,
        TaskStatus::Failed,
        TaskStatus::Error,
        TaskStatus::Canceled,
    ];

    /// Position along the lifecycle; all terminal statuses share the last rank.
    pub fn rank(&self) -> u8 {
        match self {
            TaskStatus::New => 0,
            TaskStatus::Waiting => 1,
            TaskStatus::Pending => 2,
            TaskStatus::Running => 3,
            TaskStatus::Successful
            | TaskStatus::Failed
            | TaskStatus::Error
            | TaskStatus::Canceled => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.rank() == 4
    }

    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }

    /// Whether a task in this status may be moved to `next`.
    ///
    /// Re-writing the current status is always accepted.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        if *self == next {
            return true;
        }
        !self.is_terminal() && next.rank() >= self.rank()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::New => "new",
            TaskStatus::Waiting => "waiting",
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Successful => "successful",
            TaskStatus::Failed => "failed",
            TaskStatus::Error => "error",
            TaskStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("Unknown task status: {}", s))
    }
}

/// One schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: TaskId,
    pub kind: TaskKind,
    pub name: String,
    pub status: TaskStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,

    /// Capacity cost while running.
    pub task_impact: u32,

    /// Opaque handle assigned when the task is dispatched.
    pub execution_handle: Option<String>,

    /// Operator cancellation request. Never lowered once raised.
    pub cancel_flag: bool,

    /// Short explanation of why the task ended the way it did.
    pub job_explanation: String,

    pub result_output_location: Option<String>,
    pub result_error_trace: String,

    /// Redacted argument vector actually used.
    pub args_used: Vec<String>,
    pub cwd_used: Option<String>,
    /// Redacted environment actually used.
    pub env_used: BTreeMap<String, String>,

    /// Synthetic prerequisites created for this task during expansion.
    pub prerequisite_ids: Vec<TaskId>,

    pub spec: TaskSpec,
}

impl TaskNode {
    /// The target a sync task refreshes, if this is a sync task.
    pub fn sync_target(&self) -> Option<TargetRef> {
        match self.kind {
            TaskKind::ProjectSync => self.spec.project_id.map(TargetRef::Project),
            TaskKind::InventorySync => self
                .spec
                .inventory_source_id
                .map(TargetRef::InventorySource),
            _ => None,
        }
    }

    /// `"<kind>-<id>"`, used in log lines and scratch directory names.
    pub fn log_name(&self) -> String {
        format!("{}-{}", self.kind, self.id)
    }
}

/// A task to be inserted; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub kind: TaskKind,
    pub name: String,
    pub status: TaskStatus,
    pub created: Option<DateTime<Utc>>,
    pub task_impact: u32,
    pub spec: TaskSpec,
}

impl NewTask {
    pub fn new(kind: TaskKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            status: TaskStatus::New,
            created: None,
            task_impact: 0,
            spec: TaskSpec::default(),
        }
    }

    pub fn with_impact(mut self, task_impact: u32) -> Self {
        self.task_impact = task_impact;
        self
    }

    pub fn with_spec(mut self, spec: TaskSpec) -> Self {
        self.spec = spec;
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    pub fn created_at(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    /// Materialize the record with the id assigned by the store.
    pub fn into_node(self, id: TaskId, now: DateTime<Utc>) -> TaskNode {
        TaskNode {
            id,
            kind: self.kind,
            name: self.name,
            status: self.status,
            created: self.created.unwrap_or(now),
            started: None,
            finished: None,
            task_impact: self.task_impact,
            execution_handle: None,
            cancel_flag: false,
            job_explanation: String::new(),
            result_output_location: None,
            result_error_trace: String::new(),
            args_used: Vec::new(),
            cwd_used: None,
            env_used: BTreeMap::new(),
            prerequisite_ids: Vec::new(),
            spec: self.spec,
        }
    }
}

/// Field-level update of one task.
///
/// `None` fields are left untouched. When `expect_status` is set the update
/// only applies if the task is currently in that status.
#[derive(Debug, Clone, Default)]
pub struct TaskUpdate {
    pub expect_status: Option<TaskStatus>,
    pub status: Option<TaskStatus>,
    pub created: Option<DateTime<Utc>>,
    pub started: Option<DateTime<Utc>>,
    pub finished: Option<DateTime<Utc>>,
    pub execution_handle: Option<String>,
    pub cancel_requested: bool,
    pub job_explanation: Option<String>,
    pub result_output_location: Option<String>,
    pub result_error_trace: Option<String>,
    pub args_used: Option<Vec<String>>,
    pub cwd_used: Option<String>,
    pub env_used: Option<BTreeMap<String, String>>,
    pub prerequisite_ids: Option<Vec<TaskId>>,
}

impl TaskUpdate {
    /// Update that only changes the status.
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Terminal status with explanation and finish time.
    pub fn finished(status: TaskStatus, explanation: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            finished: Some(Utc::now()),
            job_explanation: Some(explanation.into()),
            ..Default::default()
        }
    }

    /// Raise the cancel flag.
    pub fn cancel() -> Self {
        Self {
            cancel_requested: true,
            ..Default::default()
        }
    }

    pub fn expecting(mut self, status: TaskStatus) -> Self {
        self.expect_status = Some(status);
        self
    }

    pub fn with_explanation(mut self, explanation: impl Into<String>) -> Self {
        self.job_explanation = Some(explanation.into());
        self
    }

    pub fn with_created(mut self, created: DateTime<Utc>) -> Self {
        self.created = Some(created);
        self
    }

    /// Validate and apply this update to an in-memory record.
    ///
    /// Every store funnels writes through here so the status machine and the
    /// cancel-flag monotonicity hold regardless of the backend.
    pub fn apply_to(&self, node: &mut TaskNode) -> Result<(), StoreError> {
        if let Some(expected) = self.expect_status {
            if node.status != expected {
                return Err(StoreError::StatusMismatch {
                    id: node.id,
                    expected,
                    found: node.status,
                });
            }
        }

        if let Some(next) = self.status {
            if !node.status.can_transition_to(next) {
                return Err(StoreError::InvalidTransition {
                    id: node.id,
                    from: node.status,
                    to: next,
                });
            }
            node.status = next;
        }

        if self.cancel_requested {
            node.cancel_flag = true;
        }
        if let Some(created) = self.created {
            node.created = created;
        }
        if let Some(started) = self.started {
            node.started = Some(started);
        }
        if let Some(finished) = self.finished {
            node.finished = Some(finished);
        }
        if let Some(handle) = &self.execution_handle {
            node.execution_handle = Some(handle.clone());
        }
        if let Some(explanation) = &self.job_explanation {
            node.job_explanation = explanation.clone();
        }
        if let Some(location) = &self.result_output_location {
            node.result_output_location = Some(location.clone());
        }
        if let Some(trace) = &self.result_error_trace {
            node.result_error_trace = trace.clone();
        }
        if let Some(args) = &self.args_used {
            node.args_used = args.clone();
        }
        if let Some(cwd) = &self.cwd_used {
            node.cwd_used = Some(cwd.clone());
        }
        if let Some(env) = &self.env_used {
            node.env_used = env.clone();
        }
        if let Some(ids) = &self.prerequisite_ids {
            node.prerequisite_ids = ids.clone();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(status: TaskStatus) -> TaskNode {
        NewTask::new(TaskKind::PlaybookRun, "deploy")
            .with_status(status)
            .into_node(1, Utc::now())
    }

    #[test]
    fn test_status_never_regresses() {
        assert!(TaskStatus::New.can_transition_to(TaskStatus::Waiting));
        assert!(TaskStatus::Waiting.can_transition_to(TaskStatus::Running));
        assert!(TaskStatus::New.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Running.can_transition_to(TaskStatus::Pending));
        assert!(!TaskStatus::Failed.can_transition_to(TaskStatus::Canceled));
        assert!(TaskStatus::Failed.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in TaskStatus::ALL {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert_eq!("ad_hoc".parse::<TaskKind>().unwrap(), TaskKind::AdHoc);
        assert!("job".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_update_rejects_backwards_move() {
        let mut task = node(TaskStatus::Running);
        let err = TaskUpdate::status(TaskStatus::Waiting)
            .apply_to(&mut task)
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Running);
    }

    #[test]
    fn test_update_expect_status_guard() {
        let mut task = node(TaskStatus::Successful);
        let err = TaskUpdate::finished(TaskStatus::Failed, "orphaned")
            .expecting(TaskStatus::Running)
            .apply_to(&mut task)
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusMismatch { .. }));
    }

    #[test]
    fn test_cancel_flag_is_monotonic() {
        let mut task = node(TaskStatus::Running);
        TaskUpdate::cancel().apply_to(&mut task).unwrap();
        assert!(task.cancel_flag);

        TaskUpdate::status(TaskStatus::Running)
            .apply_to(&mut task)
            .unwrap();
        assert!(task.cancel_flag);
    }

    #[test]
    fn test_sync_target() {
        let mut task = node(TaskStatus::New);
        assert_eq!(task.sync_target(), None);

        task.kind = TaskKind::ProjectSync;
        task.spec.project_id = Some(4);
        assert_eq!(task.sync_target(), Some(TargetRef::Project(4)));
    }
}
