//! Port implementations.
//!
//! - **SandboxTaskExecutor**: a TaskExecutor that runs each task as a sandboxed operation call

pub mod sandbox_executor;

pub use self::sandbox_executor::{OPERATION_TASK_TYPE, OperationCall, SandboxTaskExecutor};
