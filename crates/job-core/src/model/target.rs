//! Targets of tasks and their derived aggregates.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskStatus;

/// An entity tasks act upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum TargetRef {
    Project(i64),
    InventorySource(i64),
    Inventory(i64),
    Template(i64),
}

impl TargetRef {
    /// `(kind, id)` as stored.
    pub fn key(&self) -> (&'static str, i64) {
        match self {
            TargetRef::Project(id) => ("project", *id),
            TargetRef::InventorySource(id) => ("inventory_source", *id),
            TargetRef::Inventory(id) => ("inventory", *id),
            TargetRef::Template(id) => ("template", *id),
        }
    }

    pub fn from_key(kind: &str, id: i64) -> Option<Self> {
        match kind {
            "project" => Some(TargetRef::Project(id)),
            "inventory_source" => Some(TargetRef::InventorySource(id)),
            "inventory" => Some(TargetRef::Inventory(id)),
            "template" => Some(TargetRef::Template(id)),
            _ => None,
        }
    }
}

/// Aggregates recomputed by post-completion hooks.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetState {
    pub last_run: Option<DateTime<Utc>>,
    pub last_status: Option<TaskStatus>,
    pub runs: u64,
    pub failed_runs: u64,
}

impl TargetState {
    /// Fold one finished run into the aggregates.
    pub fn record(&mut self, status: TaskStatus, finished: DateTime<Utc>) {
        self.last_run = Some(finished);
        self.last_status = Some(status);
        self.runs += 1;
        if status != TaskStatus::Successful {
            self.failed_runs += 1;
        }
    }

    /// Whether the last successful run is recent enough to reuse.
    pub fn is_fresh(&self, now: DateTime<Utc>, cache_timeout_secs: u64) -> bool {
        if cache_timeout_secs == 0 || self.last_status != Some(TaskStatus::Successful) {
            return false;
        }
        match self.last_run {
            Some(last) => (now - last).num_seconds() < cache_timeout_secs as i64,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_record_counts_failures() {
        let mut state = TargetState::default();
        state.record(TaskStatus::Successful, Utc::now());
        state.record(TaskStatus::Failed, Utc::now());
        assert_eq!(state.runs, 2);
        assert_eq!(state.failed_runs, 1);
        assert_eq!(state.last_status, Some(TaskStatus::Failed));
    }

    #[test]
    fn test_freshness_window() {
        let now = Utc::now();
        let mut state = TargetState::default();
        state.record(TaskStatus::Successful, now - Duration::seconds(30));

        assert!(state.is_fresh(now, 60));
        assert!(!state.is_fresh(now, 10));
        assert!(!state.is_fresh(now, 0));
    }

    #[test]
    fn test_key_round_trip() {
        let target = TargetRef::InventorySource(9);
        let (kind, id) = target.key();
        assert_eq!(TargetRef::from_key(kind, id), Some(target));
    }
}
