//! Submission specs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::{TaskId, TaskType, WorkerId};

/// Everything a caller supplies when submitting a task.
///
/// ```ignore
/// let spec = TaskSpec::new("w1", "research", json!({"topic": "tides"}))
///     .with_priority(2)
///     .depends_on(outline_id);
/// let task_id = scheduler.submit(spec).await?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub worker_id: WorkerId,
    pub task_type: TaskType,

    /// Opaque to the scheduler; handed to the worker untouched.
    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default)]
    pub priority: i32,

    #[serde(default)]
    pub dependencies: BTreeSet<TaskId>,
}

impl TaskSpec {
    pub fn new(
        worker_id: impl Into<WorkerId>,
        task_type: impl Into<TaskType>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_type: task_type.into(),
            payload,
            priority: 0,
            dependencies: BTreeSet::new(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn depends_on(mut self, task_id: TaskId) -> Self {
        self.dependencies.insert(task_id);
        self
    }

    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(deps);
        self
    }
}
