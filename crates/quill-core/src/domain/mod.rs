//! Domain model: ids, tasks, workers, operations, audit events, errors.

pub mod errors;
pub mod events;
pub mod ids;
pub mod operation;
pub mod spec;
pub mod state;
pub mod task;
pub mod worker;

pub use errors::{ExecutionError, OperationError, QuillError};
pub use events::{AuditEntry, AuditEvent};
pub use ids::{RequestId, TaskId};
pub use operation::{
    Args, OperationDefinition, OperationRequest, OperationResult, OperationStatus, ParamSpec,
    ParamType, SafetyCategory,
};
pub use spec::TaskSpec;
pub use state::{TaskStatus, WorkerStatus};
pub use task::{Task, TaskType};
pub use worker::{Worker, WorkerId};
