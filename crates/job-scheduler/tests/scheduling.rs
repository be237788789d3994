//! Scheduler ticks against the in-memory store and a fake launcher.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use job_core::notify::NullNotifier;
use job_core::{
    BackendError, Dependency, ExecutionBackend, FailureNotice, JobStore, MemoryJobStore, NewTask,
    PreflightError, StoreResult, TaskDispatcher, TaskKind, TaskNode, TaskSpec, TaskStatus,
    TaskUpdate,
};
use job_scheduler::control::{self, ControlHandle, ControlInbox, ControlMessage};
use job_scheduler::{SchedulerConfig, SchedulerDaemon};

/// Handles the fake launcher considers alive.
#[derive(Clone, Default)]
struct FakeBackend {
    handles: Arc<Mutex<HashSet<String>>>,
}

#[async_trait]
impl ExecutionBackend for FakeBackend {
    async fn active_handles(&self) -> Result<HashSet<String>, BackendError> {
        Ok(self.handles.lock().unwrap().clone())
    }
}

struct DownBackend;

#[async_trait]
impl ExecutionBackend for DownBackend {
    async fn active_handles(&self) -> Result<HashSet<String>, BackendError> {
        Err(BackendError::Unavailable("connection refused".to_string()))
    }
}

/// Marks tasks running without launching anything.
struct FakeDispatcher {
    store: Arc<MemoryJobStore>,
    backend: FakeBackend,
    reject: HashSet<TaskKind>,
}

#[async_trait]
impl TaskDispatcher for FakeDispatcher {
    async fn preflight(&self, task: &TaskNode) -> Result<(), PreflightError> {
        if self.reject.contains(&task.kind) {
            return Err(PreflightError::Invalid("scm_url is required".to_string()));
        }
        Ok(())
    }

    async fn start(&self, task: &TaskNode, _notice: FailureNotice) -> StoreResult<String> {
        let handle = format!("handle-{}", task.id);
        self.backend.handles.lock().unwrap().insert(handle.clone());
        let update = TaskUpdate {
            execution_handle: Some(handle.clone()),
            started: Some(Utc::now()),
            ..TaskUpdate::status(TaskStatus::Running)
        };
        self.store.update(task.id, update).await?;
        Ok(handle)
    }
}

struct Harness {
    store: Arc<MemoryJobStore>,
    daemon: SchedulerDaemon<ControlInbox>,
    control: ControlHandle,
}

fn harness_with(capacity: u32, backend_down: bool, reject: &[TaskKind]) -> Harness {
    let store = Arc::new(MemoryJobStore::new());
    let fake_backend = FakeBackend::default();
    let dispatcher = FakeDispatcher {
        store: store.clone(),
        backend: fake_backend.clone(),
        reject: reject.iter().copied().collect(),
    };
    let backend: Arc<dyn ExecutionBackend> = if backend_down {
        Arc::new(DownBackend)
    } else {
        Arc::new(fake_backend)
    };
    let config = SchedulerConfig {
        capacity,
        ..Default::default()
    };
    let (control, inbox) = control::channel();
    let daemon = SchedulerDaemon::new(
        &config,
        store.clone(),
        backend,
        Arc::new(dispatcher),
        Arc::new(NullNotifier),
        inbox,
    );
    Harness {
        store,
        daemon,
        control,
    }
}

fn harness(capacity: u32) -> Harness {
    harness_with(capacity, false, &[])
}

async fn insert(store: &MemoryJobStore, task: NewTask) -> TaskNode {
    store.insert(task).await.unwrap()
}

async fn status_of(store: &MemoryJobStore, task: &TaskNode) -> TaskStatus {
    store.get(task.id).await.unwrap().status
}

#[tokio::test]
async fn test_single_task_starts_within_capacity() {
    let mut h = harness(50);
    let task = insert(&h.store, NewTask::new(TaskKind::PlaybookRun, "deploy").with_impact(10)).await;

    let outcome = h.daemon.tick().await;

    let admission = outcome.admission.unwrap();
    assert_eq!(admission.started, vec![task.id]);
    assert_eq!(status_of(&h.store, &task).await, TaskStatus::Running);
    let graph = h.daemon.context().graph.as_ref().unwrap();
    assert_eq!(graph.running_cost(), 10);
}

#[tokio::test]
async fn test_oldest_task_wins_contended_capacity() {
    let mut h = harness(50);
    let now = Utc::now();
    let first = insert(
        &h.store,
        NewTask::new(TaskKind::PlaybookRun, "first")
            .with_impact(40)
            .created_at(now - chrono::Duration::seconds(10)),
    )
    .await;
    let second = insert(
        &h.store,
        NewTask::new(TaskKind::PlaybookRun, "second")
            .with_impact(40)
            .created_at(now),
    )
    .await;

    let admission = h.daemon.tick().await.admission.unwrap();
    assert_eq!(admission.started, vec![first.id]);
    assert_eq!(admission.deferred, vec![second.id]);
    assert_eq!(status_of(&h.store, &first).await, TaskStatus::Running);
    assert_eq!(status_of(&h.store, &second).await, TaskStatus::Waiting);

    // Still no room while the first one runs.
    let admission = h.daemon.tick().await.admission.unwrap();
    assert_eq!(admission.deferred, vec![second.id]);
}

#[tokio::test]
async fn test_oversized_task_starts_when_idle() {
    let mut h = harness(50);
    let task = insert(&h.store, NewTask::new(TaskKind::PlaybookRun, "huge").with_impact(80)).await;

    let admission = h.daemon.tick().await.admission.unwrap();
    assert_eq!(admission.started, vec![task.id]);
}

#[tokio::test]
async fn test_orphaned_running_task_is_failed() {
    let mut h = harness(50);
    let task = insert(
        &h.store,
        NewTask::new(TaskKind::PlaybookRun, "lost")
            .with_impact(20)
            .with_status(TaskStatus::Running),
    )
    .await;
    h.store
        .update(
            task.id,
            TaskUpdate {
                execution_handle: Some("gone".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    let outcome = h.daemon.tick().await;

    assert_eq!(outcome.build.unwrap().orphaned, 1);
    let failed = h.store.get(task.id).await.unwrap();
    assert_eq!(failed.status, TaskStatus::Failed);
    assert!(failed.job_explanation.contains("orphaned"));
    assert_eq!(h.daemon.context().graph.as_ref().unwrap().running_cost(), 0);
}

#[tokio::test]
async fn test_backend_outage_skips_tick() {
    let mut h = harness_with(50, true, &[]);
    let running = insert(
        &h.store,
        NewTask::new(TaskKind::PlaybookRun, "busy").with_status(TaskStatus::Running),
    )
    .await;
    let queued = insert(&h.store, NewTask::new(TaskKind::PlaybookRun, "queued")).await;

    let outcome = h.daemon.tick().await;

    assert!(outcome.build.is_none());
    assert!(outcome.admission.is_none());
    assert!(h.daemon.context().graph.is_none());
    assert_eq!(status_of(&h.store, &running).await, TaskStatus::Running);
    assert_eq!(status_of(&h.store, &queued).await, TaskStatus::New);
}

#[tokio::test]
async fn test_prerequisite_created_once_and_blocks_dependent() {
    let mut h = harness(100);
    let spec = TaskSpec {
        project_id: Some(7),
        dependencies: vec![Dependency::new(TaskKind::ProjectSync, 7)],
        ..Default::default()
    };
    let deploy = insert(&h.store, NewTask::new(TaskKind::PlaybookRun, "deploy").with_spec(spec)).await;

    let outcome = h.daemon.tick().await;
    let build = outcome.build.unwrap();
    assert_eq!(build.prerequisites_created, 1);

    let all = h.store.all().await;
    let syncs: Vec<&TaskNode> = all.iter().filter(|t| t.kind == TaskKind::ProjectSync).collect();
    assert_eq!(syncs.len(), 1);
    let sync = syncs[0];
    assert!(sync.created < deploy.created);
    assert_eq!(sync.spec.project_id, Some(7));

    let graph = h.daemon.context().graph.as_ref().unwrap();
    assert!(graph.has_edge(deploy.id, sync.id));
    assert_eq!(graph.edge_count(), 1);

    // The prerequisite runs first; the dependent keeps waiting.
    assert_eq!(outcome.admission.unwrap().started, vec![sync.id]);
    assert_eq!(status_of(&h.store, &deploy).await, TaskStatus::Waiting);

    // Rebuilding does not create a second prerequisite.
    let build = h.daemon.tick().await.build.unwrap();
    assert_eq!(build.prerequisites_created, 0);
    let sync_count = h
        .store
        .all()
        .await
        .iter()
        .filter(|t| t.kind == TaskKind::ProjectSync)
        .count();
    assert_eq!(sync_count, 1);
    assert_eq!(status_of(&h.store, &deploy).await, TaskStatus::Waiting);

    // Once the sync finishes the dependent is released.
    h.store
        .update(sync.id, TaskUpdate::finished(TaskStatus::Successful, ""))
        .await
        .unwrap();
    let admission = h.daemon.tick().await.admission.unwrap();
    assert_eq!(admission.started, vec![deploy.id]);
}

#[tokio::test]
async fn test_failed_preflight_fails_dependents() {
    let mut h = harness_with(100, false, &[TaskKind::ProjectSync]);
    let spec = TaskSpec {
        dependencies: vec![Dependency::new(TaskKind::ProjectSync, 3)],
        ..Default::default()
    };
    let deploy = insert(&h.store, NewTask::new(TaskKind::PlaybookRun, "deploy").with_spec(spec)).await;

    let admission = h.daemon.tick().await.admission.unwrap();
    assert_eq!(admission.failed.len(), 1);
    assert!(admission.started.is_empty());

    let sync = h
        .store
        .all()
        .await
        .into_iter()
        .find(|t| t.kind == TaskKind::ProjectSync)
        .unwrap();
    assert_eq!(sync.status, TaskStatus::Failed);
    assert!(sync.job_explanation.starts_with("Pre-flight check failed"));

    let deploy = h.store.get(deploy.id).await.unwrap();
    assert_eq!(deploy.status, TaskStatus::Failed);
    assert!(deploy.job_explanation.starts_with("Previous Task Failed:"));
}

#[tokio::test]
async fn test_cancel_before_start() {
    let mut h = harness(50);
    let task = insert(&h.store, NewTask::new(TaskKind::AdHoc, "ping")).await;
    h.store.update(task.id, TaskUpdate::cancel()).await.unwrap();

    let outcome = h.daemon.tick().await;

    assert_eq!(outcome.build.unwrap().canceled, 1);
    assert!(outcome.admission.unwrap().started.is_empty());
    assert_eq!(status_of(&h.store, &task).await, TaskStatus::Canceled);
}

#[tokio::test]
async fn test_paused_scheduler_builds_but_does_not_admit() {
    let mut h = harness(50);
    h.daemon.context_mut().paused = true;
    let task = insert(&h.store, NewTask::new(TaskKind::PlaybookRun, "deploy")).await;

    let outcome = h.daemon.tick().await;

    assert!(outcome.build.is_some());
    assert!(outcome.admission.is_none());
    assert_eq!(status_of(&h.store, &task).await, TaskStatus::Waiting);
}

#[tokio::test]
async fn test_system_job_waits_for_running_work() {
    let mut h = harness(100);
    let deploy = insert(&h.store, NewTask::new(TaskKind::PlaybookRun, "deploy")).await;
    h.daemon.tick().await;
    assert_eq!(status_of(&h.store, &deploy).await, TaskStatus::Running);

    let cleanup = insert(&h.store, NewTask::new(TaskKind::SystemJob, "cleanup")).await;
    let admission = h.daemon.tick().await.admission.unwrap();
    assert!(admission.started.is_empty());
    assert_eq!(status_of(&h.store, &cleanup).await, TaskStatus::Waiting);
}

#[tokio::test(start_paused = true)]
async fn test_daemon_applies_pause_message() {
    let h = harness(50);
    let store = h.store.clone();
    let task = insert(&store, NewTask::new(TaskKind::PlaybookRun, "deploy")).await;

    h.control.send(ControlMessage::pause(true));
    let shutdown = tokio::time::sleep(std::time::Duration::from_secs(1));
    h.daemon.run_until(shutdown).await.unwrap();

    assert_eq!(status_of(&store, &task).await, TaskStatus::Waiting);
}
