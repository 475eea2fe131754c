//! Task and worker status.

use serde::{Deserialize, Serialize};

/// Status of a scheduled task.
///
/// Legal transitions:
/// - Pending -> InProgress -> Completed
/// - Pending -> InProgress -> Failed
/// - Pending -> Cancelled
/// - InProgress -> Cancelled
///
/// Completed, Failed and Cancelled are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued, waiting for dependencies or capacity.
    Pending,

    /// Body is running on its worker.
    InProgress,

    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Whether moving from `self` to `next` is a legal edge of the status machine.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        matches!(
            (self, next),
            (Pending, InProgress)
                | (Pending, Cancelled)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Cancelled)
        )
    }
}

/// Live status of a registered worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,

    /// The worker's executor panicked on its last task.
    Error,

    /// The scheduler was stopped while the worker was idle.
    Completed,
}
