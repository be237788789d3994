//! Job Scheduler
//!
//! Decides which queued tasks may run:
//!
//! - **Builder**: rebuilds the per-tick dependency graph, fails orphaned
//!   running tasks and expands missing prerequisites
//! - **Admission**: starts ready tasks within capacity, oldest first
//! - **Daemon**: timer- and control-driven loop tying the two together

pub mod admission;
pub mod blocking;
pub mod builder;
pub mod config;
pub mod context;
pub mod control;
pub mod daemon;
pub mod error;
pub mod graph;

pub use admission::{AdmissionController, AdmissionReport};
pub use blocking::BlockingRules;
pub use builder::{BuildSummary, GraphBuilder};
pub use config::SchedulerConfig;
pub use context::SchedulingContext;
pub use control::{ControlHandle, ControlInbox, ControlMessage, ControlReceiver, NatsControlListener};
pub use daemon::{SchedulerDaemon, TickOutcome};
pub use error::{SchedulerError, SchedulerResult};
pub use graph::TaskGraph;
