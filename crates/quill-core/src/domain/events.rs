//! Audit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of state change recorded in the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AuditEvent {
    WorkerRegistered,
    WorkerUnregistered,
    TaskSubmitted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskCancelled,
    OperationExecuted,
    OperationDenied,
}

impl AuditEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditEvent::WorkerRegistered => "workerRegistered",
            AuditEvent::WorkerUnregistered => "workerUnregistered",
            AuditEvent::TaskSubmitted => "taskSubmitted",
            AuditEvent::TaskStarted => "taskStarted",
            AuditEvent::TaskCompleted => "taskCompleted",
            AuditEvent::TaskFailed => "taskFailed",
            AuditEvent::TaskCancelled => "taskCancelled",
            AuditEvent::OperationExecuted => "operationExecuted",
            AuditEvent::OperationDenied => "operationDenied",
        }
    }
}

impl fmt::Display for AuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable, timestamped record of one state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEvent,
    pub data: serde_json::Value,
}
