//! Job Core
//!
//! Shared building blocks for the job orchestration services:
//!
//! - **Model**: [`TaskNode`] records, their kinds and the status machine
//! - **Stores**: the [`JobStore`] seam with in-memory and PostgreSQL backends
//! - **Dispatch**: the seams between the scheduler and the process launcher
//!   ([`TaskDispatcher`], [`ExecutionBackend`], [`FailureNotice`])
//! - **Notifications**: best-effort status-changed broadcasts
//! - **Retry**: bounded fixed-delay retry for transient store conflicts
//!
//! The scheduler, launcher and event pipeline crates depend on this crate;
//! it depends on none of them.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod model;
pub mod notify;
pub mod result_ext;
pub mod retry;
pub mod signals;
pub mod store;

pub use dispatch::{
    BackendError, DependentRef, ExecutionBackend, FailureNotice, PreflightError, TaskDispatcher,
};
pub use error::{StoreError, StoreResult};
pub use model::{
    Credential, Dependency, NewTask, TargetRef, TargetState, TaskId, TaskKind, TaskNode, TaskSpec,
    TaskStatus, TaskUpdate,
};
pub use notify::{Notifier, StatusChange};
pub use result_ext::ResultExt;
pub use retry::RetryPolicy;
pub use store::{JobStore, MemoryJobStore, PgJobStore};
