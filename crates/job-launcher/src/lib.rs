//! Job Launcher
//!
//! Runs admitted tasks as supervised children on a pseudo-terminal:
//!
//! - **Engine**: the shared launch lifecycle (scratch space, prompts,
//!   cancellation, idle timeout, terminal status)
//! - **Kinds**: per-kind arguments, environment and post-run hooks
//! - **Dispatcher**: the in-process [`job_core::TaskDispatcher`] and the
//!   registry of live execution handles
//! - **Isolation**: private scratch directories, key agent and sandbox
//!   wrapping, secret redaction

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod keyagent;
pub mod kinds;
pub mod prompts;
pub mod pty;
pub mod redact;
pub mod sandbox;
pub mod scratch;

pub use config::LauncherConfig;
pub use dispatcher::{ActiveRegistry, LocalDispatcher};
pub use engine::Launcher;
pub use error::{LaunchError, LaunchResult};
pub use kinds::{profile_for, KindProfile, LaunchContext};
pub use prompts::PasswordTable;
pub use pty::{Output, PtyProcess};
pub use sandbox::SandboxWrapper;
pub use scratch::ScratchSpace;
