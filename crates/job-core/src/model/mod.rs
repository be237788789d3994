//! Job record model.

mod spec;
mod target;
mod task;

pub use spec::{Credential, Dependency, TaskSpec, ASK};
pub use target::{TargetRef, TargetState};
pub use task::{NewTask, TaskId, TaskKind, TaskNode, TaskStatus, TaskUpdate};
