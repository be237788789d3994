//! "Is this waiting task blocked by that task" rules.
//!
//! Each rule is keyed by the pair (kind of the waiting task, kind of the other
//! task) and may be replaced or removed. Explicit prerequisite links created by
//! dependency expansion always block, whatever the rules say.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use job_core::{TaskKind, TaskNode};

/// Predicate `(waiting, other) -> blocked`.
pub type BlockPredicate = Arc<dyn Fn(&TaskNode, &TaskNode) -> bool + Send + Sync>;

/// Per-kind-pair blocking predicates.
#[derive(Clone)]
pub struct BlockingRules {
    rules: HashMap<(TaskKind, TaskKind), BlockPredicate>,
}

fn same<T: PartialEq>(a: Option<T>, b: Option<T>) -> bool {
    matches!((a, b), (Some(a), Some(b)) if a == b)
}

impl BlockingRules {
    /// No rules at all; only explicit prerequisite links block.
    pub fn empty() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Add or replace the rule for `(waiting, other)`.
    pub fn with_rule<F>(mut self, waiting: TaskKind, other: TaskKind, predicate: F) -> Self
    where
        F: Fn(&TaskNode, &TaskNode) -> bool + Send + Sync + 'static,
    {
        self.rules.insert((waiting, other), Arc::new(predicate));
        self
    }

    pub fn without_rule(mut self, waiting: TaskKind, other: TaskKind) -> Self {
        self.rules.remove(&(waiting, other));
        self
    }

    pub fn has_rule(&self, waiting: TaskKind, other: TaskKind) -> bool {
        self.rules.contains_key(&(waiting, other))
    }

    /// Whether `task` must wait for `other`.
    pub fn is_blocked_by(&self, task: &TaskNode, other: &TaskNode) -> bool {
        if task.id == other.id {
            return false;
        }
        if task.prerequisite_ids.contains(&other.id) {
            return true;
        }
        self.rules
            .get(&(task.kind, other.kind))
            .is_some_and(|predicate| predicate(task, other))
    }
}

impl Default for BlockingRules {
    fn default() -> Self {
        use TaskKind::*;

        let mut rules = Self::empty()
            .with_rule(PlaybookRun, ProjectSync, |t, o| {
                same(t.spec.project_id, o.spec.project_id)
            })
            .with_rule(PlaybookRun, InventorySync, |t, o| {
                same(t.spec.inventory_id, o.spec.inventory_id)
            })
            .with_rule(PlaybookRun, PlaybookRun, |t, o| {
                !t.spec.allow_simultaneous && same(t.spec.template_id, o.spec.template_id)
            })
            .with_rule(ProjectSync, ProjectSync, |t, o| {
                same(t.spec.project_id, o.spec.project_id)
            })
            .with_rule(InventorySync, InventorySync, |t, o| {
                same(t.spec.inventory_source_id, o.spec.inventory_source_id)
            })
            .with_rule(AdHoc, InventorySync, |t, o| {
                same(t.spec.inventory_id, o.spec.inventory_id)
            });

        // System jobs are exclusive both ways.
        for kind in TaskKind::ALL {
            rules = rules
                .with_rule(kind, SystemJob, |_, _| true)
                .with_rule(SystemJob, kind, |_, _| true);
        }
        rules
    }
}

impl fmt::Debug for BlockingRules {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut pairs: Vec<_> = self.rules.keys().collect();
        pairs.sort();
        f.debug_struct("BlockingRules").field("pairs", &pairs).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use job_core::{NewTask, TaskSpec};

    fn node(id: i64, kind: TaskKind, spec: TaskSpec) -> TaskNode {
        NewTask::new(kind, format!("task-{}", id))
            .with_spec(spec)
            .into_node(id, Utc::now())
    }

    #[test]
    fn test_playbook_blocked_by_sync_of_same_project() {
        let rules = BlockingRules::default();
        let run = node(2, TaskKind::PlaybookRun, TaskSpec { project_id: Some(7), ..Default::default() });
        let sync = node(1, TaskKind::ProjectSync, TaskSpec { project_id: Some(7), ..Default::default() });
        let other = node(3, TaskKind::ProjectSync, TaskSpec { project_id: Some(8), ..Default::default() });

        assert!(rules.is_blocked_by(&run, &sync));
        assert!(!rules.is_blocked_by(&run, &other));
        assert!(!rules.is_blocked_by(&sync, &run));
    }

    #[test]
    fn test_same_template_unless_simultaneous() {
        let rules = BlockingRules::default();
        let spec = TaskSpec { template_id: Some(4), ..Default::default() };
        let first = node(1, TaskKind::PlaybookRun, spec.clone());
        let second = node(2, TaskKind::PlaybookRun, spec.clone());
        assert!(rules.is_blocked_by(&second, &first));

        let concurrent = node(
            3,
            TaskKind::PlaybookRun,
            TaskSpec { allow_simultaneous: true, ..spec },
        );
        assert!(!rules.is_blocked_by(&concurrent, &first));
    }

    #[test]
    fn test_unset_targets_never_match() {
        let rules = BlockingRules::default();
        let a = node(1, TaskKind::PlaybookRun, TaskSpec::default());
        let b = node(2, TaskKind::PlaybookRun, TaskSpec::default());
        assert!(!rules.is_blocked_by(&b, &a));
    }

    #[test]
    fn test_system_jobs_are_exclusive() {
        let rules = BlockingRules::default();
        let system = node(1, TaskKind::SystemJob, TaskSpec::default());
        let adhoc = node(2, TaskKind::AdHoc, TaskSpec::default());
        assert!(rules.is_blocked_by(&adhoc, &system));
        assert!(rules.is_blocked_by(&system, &adhoc));
    }

    #[test]
    fn test_never_blocked_by_itself() {
        let rules = BlockingRules::default();
        let mut system = node(1, TaskKind::SystemJob, TaskSpec::default());
        system.prerequisite_ids.push(1);
        assert!(!rules.is_blocked_by(&system, &system.clone()));
    }

    #[test]
    fn test_prerequisite_links_block_without_rules() {
        let rules = BlockingRules::empty();
        let sync = node(1, TaskKind::InventorySync, TaskSpec::default());
        let mut run = node(2, TaskKind::PlaybookRun, TaskSpec::default());
        assert!(!rules.is_blocked_by(&run, &sync));

        run.prerequisite_ids.push(1);
        assert!(rules.is_blocked_by(&run, &sync));
    }

    #[test]
    fn test_rules_are_replaceable() {
        let rules = BlockingRules::default()
            .without_rule(TaskKind::AdHoc, TaskKind::SystemJob)
            .with_rule(TaskKind::AdHoc, TaskKind::AdHoc, |_, _| true);
        let system = node(1, TaskKind::SystemJob, TaskSpec::default());
        let first = node(2, TaskKind::AdHoc, TaskSpec::default());
        let second = node(3, TaskKind::AdHoc, TaskSpec::default());

        assert!(!rules.is_blocked_by(&first, &system));
        assert!(rules.is_blocked_by(&second, &first));
        assert!(!rules.has_rule(TaskKind::AdHoc, TaskKind::SystemJob));
    }
}
