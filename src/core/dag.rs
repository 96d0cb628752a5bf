//! Directed acyclic graph of task dependencies.
//!
//! Edges point from a predecessor to the task that waits on it. The graph is
//! kept acyclic at all times: [`TaskGraph::declare_dependency`] refuses any
//! edge that would close a cycle, so a graph that exists is always
//! submittable.

use std::collections::{BTreeSet, HashMap, HashSet};

use thiserror::Error;

use super::types::TaskId;

/// Errors that can occur when working with the dependency graph.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DagError {
    /// Declaring the dependency would close a cycle.
    #[error("cyclic dependency: '{task}' cannot wait on '{predecessor}', which already depends on it")]
    CyclicDependency { task: TaskId, predecessor: TaskId },

    /// A dependency references a task that doesn't exist.
    #[error("missing dependency: task '{from}' depends on non-existent task '{to}'")]
    MissingDependency { from: TaskId, to: TaskId },

    /// Attempted to add a duplicate task.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// Task not found in the graph.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
}

/// Dependency graph over the tasks of one job.
#[derive(Debug, Clone, Default)]
pub struct TaskGraph {
    /// Tasks in insertion order.
    order: Vec<TaskId>,

    /// Edges: task_id -> tasks it waits on, in declaration order.
    dependencies: HashMap<TaskId, Vec<TaskId>>,

    /// Reverse edges: task_id -> tasks waiting on it.
    downstream: HashMap<TaskId, Vec<TaskId>>,
}

impl TaskGraph {
    /// Create an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn contains(&self, id: &TaskId) -> bool {
        self.dependencies.contains_key(id)
    }

    /// Add a task with no dependencies.
    pub fn add_task(&mut self, id: TaskId) -> Result<(), DagError> {
        if self.contains(&id) {
            return Err(DagError::DuplicateTask(id));
        }
        self.order.push(id.clone());
        self.dependencies.insert(id.clone(), Vec::new());
        self.downstream.insert(id, Vec::new());
        Ok(())
    }

    /// Declare that `task` waits on every task in `predecessors`.
    ///
    /// The call is atomic: if any predecessor is unknown or would close a
    /// cycle, no edge is recorded. Re-declaring an existing edge is a no-op.
    pub fn declare_dependency(
        &mut self,
        task: &TaskId,
        predecessors: &[TaskId],
    ) -> Result<(), DagError> {
        if !self.contains(task) {
            return Err(DagError::TaskNotFound(task.clone()));
        }

        for predecessor in predecessors {
            if !self.contains(predecessor) {
                return Err(DagError::MissingDependency {
                    from: task.clone(),
                    to: predecessor.clone(),
                });
            }
            // Adding predecessor -> task closes a cycle iff task already
            // reaches predecessor.
            if self.reaches(task, predecessor) {
                return Err(DagError::CyclicDependency {
                    task: task.clone(),
                    predecessor: predecessor.clone(),
                });
            }
        }

        for predecessor in predecessors {
            let deps = self.dependencies.entry(task.clone()).or_default();
            if deps.contains(predecessor) {
                continue;
            }
            deps.push(predecessor.clone());
            self.downstream
                .entry(predecessor.clone())
                .or_default()
                .push(task.clone());
        }

        Ok(())
    }

    /// Whether `to` can be reached from `from` by following edges downstream.
    ///
    /// A task always reaches itself.
    pub fn reaches(&self, from: &TaskId, to: &TaskId) -> bool {
        let mut stack = vec![from];
        let mut visited: HashSet<&TaskId> = HashSet::new();

        while let Some(current) = stack.pop() {
            if current == to {
                return true;
            }
            if !visited.insert(current) {
                continue;
            }
            if let Some(next) = self.downstream.get(current) {
                stack.extend(next.iter());
            }
        }

        false
    }

    /// Get the tasks `id` waits on.
    pub fn get_dependencies(&self, id: &TaskId) -> Option<&[TaskId]> {
        self.dependencies.get(id).map(|v| v.as_slice())
    }

    /// Get tasks that wait on the given task.
    pub fn get_downstream(&self, id: &TaskId) -> &[TaskId] {
        self.downstream
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Whether any edge has been declared.
    pub fn has_edges(&self) -> bool {
        self.dependencies.values().any(|deps| !deps.is_empty())
    }

    /// Task ids in insertion order.
    pub fn task_ids(&self) -> &[TaskId] {
        &self.order
    }

    /// Tasks in an order that respects every edge.
    ///
    /// Among tasks that are ready at the same time, the one inserted first
    /// comes first, so the result is deterministic.
    pub fn topological_order(&self) -> Vec<TaskId> {
        let index: HashMap<&TaskId, usize> =
            self.order.iter().enumerate().map(|(i, id)| (id, i)).collect();

        let mut in_degree: Vec<usize> = self
            .order
            .iter()
            .map(|id| self.dependencies.get(id).map_or(0, |deps| deps.len()))
            .collect();

        let mut ready: BTreeSet<usize> = in_degree
            .iter()
            .enumerate()
            .filter(|(_, degree)| **degree == 0)
            .map(|(i, _)| i)
            .collect();

        let mut result = Vec::with_capacity(self.order.len());

        while let Some(i) = ready.pop_first() {
            let id = &self.order[i];
            result.push(id.clone());

            for next in self.get_downstream(id) {
                let j = index[next];
                in_degree[j] -= 1;
                if in_degree[j] == 0 {
                    ready.insert(j);
                }
            }
        }

        result
    }
}
