//! Dependency graph for pending tasks.
//!
//! Only unresolved edges are stored: an edge B -> A exists while B waits for A
//! and A has not completed yet. A task with no outgoing edges has all of its
//! dependencies satisfied.
//!
//! Invariant: `edges` and `reverse_edges` always describe the same edge set.
//!
//! Cycles cannot form: a dependency must name a task that already exists, and
//! task ids are only minted at submission.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::domain::TaskId;

#[derive(Debug, Default)]
pub(crate) struct DependencyGraph {
    /// task -> tasks it still waits for
    edges: HashMap<TaskId, HashSet<TaskId>>,

    /// task -> tasks still waiting for it
    reverse_edges: HashMap<TaskId, HashSet<TaskId>>,
}

impl DependencyGraph {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// `task` waits for `depends_on`.
    pub(crate) fn add_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        self.edges.entry(task).or_default().insert(depends_on);
        self.reverse_edges
            .entry(depends_on)
            .or_default()
            .insert(task);
    }

    /// `task` no longer waits for `depends_on` (it completed).
    pub(crate) fn remove_dependency(&mut self, task: TaskId, depends_on: TaskId) {
        if let Entry::Occupied(mut e) = self.edges.entry(task) {
            e.get_mut().remove(&depends_on);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
        if let Entry::Occupied(mut e) = self.reverse_edges.entry(depends_on) {
            e.get_mut().remove(&task);
            if e.get().is_empty() {
                e.remove_entry();
            }
        }
    }

    /// Drop every edge where `task` is the waiting side.
    pub(crate) fn remove_task(&mut self, task: TaskId) {
        let Some(deps) = self.edges.remove(&task) else {
            return;
        };
        for dep in deps {
            if let Entry::Occupied(mut e) = self.reverse_edges.entry(dep) {
                e.get_mut().remove(&task);
                if e.get().is_empty() {
                    e.remove_entry();
                }
            }
        }
    }

    /// Tasks waiting for `task`, in no particular order.
    ///
    /// A returned task may still wait for others as well.
    pub(crate) fn get_waiting_tasks(&self, task: TaskId) -> Vec<TaskId> {
        self.reverse_edges
            .get(&task)
            .map(|waiting| waiting.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn has_dependencies(&self, task: TaskId) -> bool {
        self.edges
            .get(&task)
            .map(|deps| !deps.is_empty())
            .unwrap_or(false)
    }

    pub(crate) fn get_dependencies(&self, task: TaskId) -> Vec<TaskId> {
        self.edges
            .get(&task)
            .map(|deps| deps.iter().copied().collect())
            .unwrap_or_default()
    }
}
