//! Serializable stats views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::{TaskStatus, WorkerStatus};
use crate::sandbox::SandboxPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl TaskCounts {
    pub fn add(&mut self, status: TaskStatus) {
        match status {
            TaskStatus::Pending => self.pending += 1,
            TaskStatus::InProgress => self.in_progress += 1,
            TaskStatus::Completed => self.completed += 1,
            TaskStatus::Failed => self.failed += 1,
            TaskStatus::Cancelled => self.cancelled += 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCounts {
    pub idle: usize,
    pub busy: usize,
    pub error: usize,
    pub completed: usize,
}

impl WorkerCounts {
    pub fn add(&mut self, status: WorkerStatus) {
        match status {
            WorkerStatus::Idle => self.idle += 1,
            WorkerStatus::Busy => self.busy += 1,
            WorkerStatus::Error => self.error += 1,
            WorkerStatus::Completed => self.completed += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub total_workers: usize,
    pub total_tasks: usize,
    pub running_count: usize,

    /// Tasks still Pending (waiting on dependencies or capacity).
    pub queue_depth: usize,
    pub max_concurrency: usize,
    pub workers_by_status: WorkerCounts,
    pub tasks_by_status: TaskCounts,
}

/// Per-operation usage counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStats {
    pub usage_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub timeout_count: u64,
    pub denied_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxStats {
    pub total_operations: usize,
    pub available_operations: usize,
    pub usage_by_operation: BTreeMap<String, UsageStats>,
    pub policy: SandboxPolicy,
}
