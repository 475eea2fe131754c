use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::{TaskId, WorkerStatus};

/// Caller-chosen worker identifier (e.g. `"research-1"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for WorkerId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for WorkerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Snapshot of a registered worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Worker {
    pub worker_id: WorkerId,

    /// Free-form tag, e.g. `"research"` or `"writer"`.
    pub kind: String,
    pub capabilities: BTreeSet<String>,
    pub status: WorkerStatus,

    /// Newest (by id) of the tasks this worker is running.
    pub current_task_id: Option<TaskId>,

    /// Number of tasks currently InProgress on this worker. The worker is Busy
    /// while this is non-zero.
    #[serde(default)]
    pub active_tasks: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl Worker {
    pub fn new(
        worker_id: WorkerId,
        kind: impl Into<String>,
        capabilities: BTreeSet<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            worker_id,
            kind: kind.into(),
            capabilities,
            status: WorkerStatus::Idle,
            current_task_id: None,
            active_tasks: 0,
            created_at: now,
            last_activity_at: now,
        }
    }

    pub fn has_capability(&self, capability: &str) -> bool {
        self.capabilities.contains(capability)
    }
}
