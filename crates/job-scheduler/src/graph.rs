//! In-memory dependency graph for one scheduling tick.
//!
//! An edge `a -> b` means "a is blocked by b". Edges are never persisted.

use std::collections::HashMap;

use job_core::{TaskId, TaskNode, TaskStatus};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;

#[derive(Debug, Default, Clone)]
pub struct TaskGraph {
    graph: DiGraph<TaskNode, ()>,
    index: HashMap<TaskId, NodeIndex>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task, replacing the stored record if it is already present.
    pub fn add_task(&mut self, task: TaskNode) -> NodeIndex {
        if let Some(&idx) = self.index.get(&task.id) {
            self.graph[idx] = task;
            return idx;
        }
        let id = task.id;
        let idx = self.graph.add_node(task);
        self.index.insert(id, idx);
        idx
    }

    /// Record that `dependent` is blocked by `blocker`.
    ///
    /// Self-edges and edges to unknown tasks are ignored; an existing edge is
    /// not duplicated. Returns whether the edge is present afterwards.
    pub fn add_edge(&mut self, dependent: TaskId, blocker: TaskId) -> bool {
        if dependent == blocker {
            return false;
        }
        match (self.index.get(&dependent), self.index.get(&blocker)) {
            (Some(&from), Some(&to)) => {
                self.graph.update_edge(from, to, ());
                true
            }
            _ => false,
        }
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    pub fn get(&self, id: TaskId) -> Option<&TaskNode> {
        self.index.get(&id).map(|&idx| &self.graph[idx])
    }

    pub fn has_edge(&self, dependent: TaskId, blocker: TaskId) -> bool {
        match (self.index.get(&dependent), self.index.get(&blocker)) {
            (Some(&from), Some(&to)) => self.graph.contains_edge(from, to),
            _ => false,
        }
    }

    pub fn set_status(&mut self, id: TaskId, status: TaskStatus) {
        if let Some(&idx) = self.index.get(&id) {
            self.graph[idx].status = status;
        }
    }

    /// Tasks with no outstanding blocker: every outgoing edge targets a task
    /// that has reached a terminal status. Ordered oldest first.
    pub fn leaf_nodes(&self) -> Vec<&TaskNode> {
        let mut leaves: Vec<&TaskNode> = self
            .graph
            .node_indices()
            .filter(|&idx| {
                self.graph
                    .edges_directed(idx, Direction::Outgoing)
                    .all(|edge| self.graph[edge.target()].status.is_terminal())
            })
            .map(|idx| &self.graph[idx])
            .collect();
        leaves.sort_by(|a, b| a.created.cmp(&b.created).then(a.id.cmp(&b.id)));
        leaves
    }

    /// Tasks blocked by `id`.
    pub fn dependents_of(&self, id: TaskId) -> Vec<&TaskNode> {
        let Some(&idx) = self.index.get(&id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, Direction::Incoming)
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Tasks `id` is blocked by.
    pub fn blockers_of(&self, id: TaskId) -> Vec<&TaskNode> {
        let Some(&idx) = self.index.get(&id) else {
            return Vec::new();
        };
        self.graph
            .neighbors_directed(idx, Direction::Outgoing)
            .map(|n| &self.graph[n])
            .collect()
    }

    /// Total impact of tasks currently running.
    pub fn running_cost(&self) -> u64 {
        self.tasks()
            .filter(|t| t.status == TaskStatus::Running)
            .map(|t| u64::from(t.task_impact))
            .sum()
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TaskNode> {
        self.graph.node_weights()
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use job_core::{NewTask, TaskKind};

    fn node(id: i64, status: TaskStatus, age_secs: i64) -> TaskNode {
        NewTask::new(TaskKind::PlaybookRun, format!("task-{}", id))
            .with_status(status)
            .with_impact(10)
            .created_at(Utc::now() - Duration::seconds(age_secs))
            .into_node(id, Utc::now())
    }

    #[test]
    fn test_no_self_edges() {
        let mut graph = TaskGraph::new();
        graph.add_task(node(1, TaskStatus::Waiting, 0));
        assert!(!graph.add_edge(1, 1));
        assert_eq!(graph.edge_count(), 0);
    }

    #[test]
    fn test_edges_to_unknown_tasks_are_ignored() {
        let mut graph = TaskGraph::new();
        graph.add_task(node(1, TaskStatus::Waiting, 0));
        assert!(!graph.add_edge(1, 99));
        assert_eq!(graph.leaf_nodes().len(), 1);
    }

    #[test]
    fn test_leaves_have_no_active_blockers() {
        let mut graph = TaskGraph::new();
        graph.add_task(node(1, TaskStatus::Running, 30));
        graph.add_task(node(2, TaskStatus::Waiting, 20));
        graph.add_task(node(3, TaskStatus::Waiting, 10));
        assert!(graph.add_edge(2, 1));
        assert!(graph.add_edge(2, 1));
        assert_eq!(graph.edge_count(), 1);

        let leaves: Vec<TaskId> = graph.leaf_nodes().iter().map(|t| t.id).collect();
        assert_eq!(leaves, vec![1, 3]);

        graph.set_status(1, TaskStatus::Successful);
        let leaves: Vec<TaskId> = graph.leaf_nodes().iter().map(|t| t.id).collect();
        assert_eq!(leaves, vec![1, 2, 3]);
    }

    #[test]
    fn test_dependents_and_blockers() {
        let mut graph = TaskGraph::new();
        graph.add_task(node(1, TaskStatus::Waiting, 30));
        graph.add_task(node(2, TaskStatus::Waiting, 20));
        graph.add_task(node(3, TaskStatus::Waiting, 10));
        graph.add_edge(2, 1);
        graph.add_edge(3, 1);

        let mut dependents: Vec<TaskId> = graph.dependents_of(1).iter().map(|t| t.id).collect();
        dependents.sort();
        assert_eq!(dependents, vec![2, 3]);
        assert_eq!(graph.blockers_of(3)[0].id, 1);
        assert!(graph.has_edge(3, 1));
        assert!(!graph.has_edge(1, 3));
    }

    #[test]
    fn test_running_cost() {
        let mut graph = TaskGraph::new();
        graph.add_task(node(1, TaskStatus::Running, 30));
        graph.add_task(node(2, TaskStatus::Running, 20));
        graph.add_task(node(3, TaskStatus::Waiting, 10));
        assert_eq!(graph.running_cost(), 20);
        assert_eq!(graph.len(), 3);
    }
}
