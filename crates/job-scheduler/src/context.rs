//! State carried from one scheduling tick to the next.

use crate::graph::TaskGraph;

/// Explicit scheduling state passed through the builder and the admission
/// controller.
#[derive(Debug, Default)]
pub struct SchedulingContext {
    /// Total task impact that may run concurrently.
    pub capacity: u32,

    /// Graph built by the most recent successful rebuild. `None` when the
    /// last rebuild was aborted.
    pub graph: Option<TaskGraph>,

    /// Admission is skipped while set; rebuilding continues.
    pub paused: bool,

    /// Suppress status-changed notifications emitted by the scheduler.
    pub suppress_notifications: bool,
}

impl SchedulingContext {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            ..Default::default()
        }
    }

    pub fn paused(mut self, paused: bool) -> Self {
        self.paused = paused;
        self
    }
}
