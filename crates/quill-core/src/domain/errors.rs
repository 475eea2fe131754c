//! Error types.
//!
//! `QuillError` is what the public API returns. `ExecutionError` and
//! `OperationError` are produced by user code (task bodies and operation bodies)
//! and never escape the scheduler or sandbox: they are folded into task and
//! result status.

use thiserror::Error;

use super::{TaskId, TaskType, WorkerId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuillError {
    #[error("unknown worker: {0}")]
    UnknownWorker(WorkerId),

    #[error("unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("unknown operation: {0}")]
    UnknownOperation(String),

    #[error("scheduler is already running")]
    AlreadyRunning,

    #[error("invalid config value for {key}: {value:?}")]
    InvalidConfig { key: String, value: String },
}

/// Failure reported by a task body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("{0}")]
    Failed(String),

    #[error("task type '{0}' is not implemented by this worker")]
    NotImplemented(TaskType),
}

impl ExecutionError {
    pub fn failed(message: impl Into<String>) -> Self {
        ExecutionError::Failed(message.into())
    }
}

/// Failure reported by a sandboxed operation body.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OperationError {
    #[error("{0}")]
    Failed(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl OperationError {
    pub fn failed(message: impl Into<String>) -> Self {
        OperationError::Failed(message.into())
    }
}

/// Best-effort text of a caught panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_human_readable() {
        assert_eq!(
            QuillError::UnknownWorker(WorkerId::new("w9")).to_string(),
            "unknown worker: w9"
        );
        assert_eq!(ExecutionError::failed("disk full").to_string(), "disk full");
        assert_eq!(
            ExecutionError::NotImplemented(TaskType::new("export")).to_string(),
            "task type 'export' is not implemented by this worker"
        );
        assert_eq!(
            OperationError::InvalidArgument("path".into()).to_string(),
            "invalid argument: path"
        );
    }
}
