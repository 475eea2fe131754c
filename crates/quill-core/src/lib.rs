//! quill-core
//!
//! Task scheduling and sandboxed operation execution for multi-agent pipelines.
//!
//! # Modules
//! - **domain**: plain data (ids, task, worker, operation, state, errors, events)
//! - **ports**: trait seams (Clock, IdGenerator, TaskExecutor, Operation)
//! - **registry**: worker registry
//! - **scheduler**: concurrency-bounded task scheduler
//! - **sandbox**: operation registry and execution sandbox
//! - **audit**: append-only audit log
//! - **impls**: port implementations (SandboxTaskExecutor)
//! - **observability**: stats views
//! - **config**: configuration from environment variables

pub mod audit;
pub mod config;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod registry;
pub mod sandbox;
pub mod scheduler;

pub use audit::AuditLog;
pub use config::QuillConfig;
pub use domain::{
    AuditEntry, AuditEvent, ExecutionError, OperationDefinition, OperationError,
    OperationRequest, OperationResult, OperationStatus, QuillError, SafetyCategory, Task,
    TaskId, TaskSpec, TaskStatus, Worker, WorkerId, WorkerStatus,
};
pub use impls::SandboxTaskExecutor;
pub use registry::WorkerRegistry;
pub use sandbox::{ExecutionSandbox, OperationRegistry, SandboxPolicy};
pub use scheduler::{SchedulerBuilder, SchedulerConfig, TaskScheduler};
