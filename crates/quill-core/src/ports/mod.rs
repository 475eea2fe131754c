//! Ports: the trait seams between quill and the code it hosts.
//!
//! - `Clock` / `IdGenerator`: injected time and identity, swappable in tests.
//! - `TaskExecutor`: what a worker does with a task.
//! - `Operation`: what the sandbox runs for a named operation.

pub mod clock;
pub mod executor;
pub mod id_generator;
pub mod operation;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::executor::{FnExecutor, TaskExecutor, executor_fn};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::operation::{FnOperation, Operation, OperationContext, operation_fn};
