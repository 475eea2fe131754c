//! Live task record owned by the scheduler.

use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use tokio::task::AbortHandle;

use crate::domain::{Task, TaskStatus};

/// Position in the pending queue: higher priority first, then arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct QueueKey {
    priority: Reverse<i32>,
    seq: u64,
}

/// The single source of truth for one task.
///
/// Every status change goes through a method here, and every method refuses
/// edges the status machine does not allow, so a terminal task stays terminal.
#[derive(Debug)]
pub(crate) struct TaskRecord {
    pub(crate) task: Task,
    pub(crate) seq: u64,

    /// Handle to the running body; present only while InProgress.
    pub(crate) abort: Option<AbortHandle>,
}

impl TaskRecord {
    pub(crate) fn new(task: Task, seq: u64) -> Self {
        Self {
            task,
            seq,
            abort: None,
        }
    }

    pub(crate) fn queue_key(&self) -> QueueKey {
        QueueKey {
            priority: Reverse(self.task.priority),
            seq: self.seq,
        }
    }

    pub(crate) fn status(&self) -> TaskStatus {
        self.task.status
    }

    fn transition(&mut self, next: TaskStatus) -> bool {
        if !self.task.status.can_transition_to(next) {
            return false;
        }
        self.task.status = next;
        true
    }

    pub(crate) fn start(&mut self, now: DateTime<Utc>) -> bool {
        if !self.transition(TaskStatus::InProgress) {
            return false;
        }
        self.task.started_at = Some(now);
        true
    }

    pub(crate) fn complete(&mut self, now: DateTime<Utc>, result: serde_json::Value) -> bool {
        if !self.transition(TaskStatus::Completed) {
            return false;
        }
        self.task.result = Some(result);
        self.task.completed_at = Some(now);
        self.abort = None;
        true
    }

    pub(crate) fn fail(&mut self, now: DateTime<Utc>, error: String) -> bool {
        if !self.transition(TaskStatus::Failed) {
            return false;
        }
        self.task.error_message = Some(error);
        self.task.completed_at = Some(now);
        self.abort = None;
        true
    }

    /// Cancel and stop the body if it is running.
    pub(crate) fn cancel(&mut self, now: DateTime<Utc>, reason: Option<String>) -> bool {
        if !self.transition(TaskStatus::Cancelled) {
            return false;
        }
        if let Some(handle) = self.abort.take() {
            handle.abort();
        }
        self.task.error_message = reason;
        self.task.completed_at = Some(now);
        true
    }
}
