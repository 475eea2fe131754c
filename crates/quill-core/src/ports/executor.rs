//! TaskExecutor port: the single capability every worker exposes.

use async_trait::async_trait;
use std::future::Future;

use crate::domain::{ExecutionError, TaskType};

/// Runs the body of a task.
///
/// Invoked exactly once per dispatched task. The returned value becomes the
/// task's `result`; an error's `Display` text becomes its `error_message`.
/// A worker that does not handle `task_type` should return
/// `ExecutionError::NotImplemented`.
///
/// ```ignore
/// struct Researcher;
///
/// #[async_trait]
/// impl TaskExecutor for Researcher {
///     async fn execute(&self, task_type: &TaskType, payload: &Value) -> Result<Value, ExecutionError> {
///         match task_type.as_str() {
///             "research" => Ok(json!({"notes": lookup(payload).await?})),
///             _ => Err(ExecutionError::NotImplemented(task_type.clone())),
///         }
///     }
/// }
/// ```
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(
        &self,
        task_type: &TaskType,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecutionError>;
}

/// Adapter turning an async closure into a `TaskExecutor`.
pub struct FnExecutor<F> {
    f: F,
}

pub fn executor_fn<F, Fut>(f: F) -> FnExecutor<F>
where
    F: Fn(TaskType, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ExecutionError>> + Send + 'static,
{
    FnExecutor { f }
}

#[async_trait]
impl<F, Fut> TaskExecutor for FnExecutor<F>
where
    F: Fn(TaskType, serde_json::Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, ExecutionError>> + Send + 'static,
{
    async fn execute(
        &self,
        task_type: &TaskType,
        payload: &serde_json::Value,
    ) -> Result<serde_json::Value, ExecutionError> {
        (self.f)(task_type.clone(), payload.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn closure_executor_sees_type_and_payload() {
        let exec = executor_fn(|task_type: TaskType, payload| async move {
            Ok(json!({"type": task_type.as_str(), "echo": payload}))
        });

        let out = exec
            .execute(&TaskType::new("outline"), &json!({"chapter": 1}))
            .await
            .unwrap();
        assert_eq!(out, json!({"type": "outline", "echo": {"chapter": 1}}));
    }

    #[tokio::test]
    async fn closure_executor_propagates_errors() {
        let exec = executor_fn(|task_type: TaskType, _payload| async move {
            Err(ExecutionError::NotImplemented(task_type))
        });

        let err = exec
            .execute(&TaskType::new("export"), &json!(null))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::NotImplemented(TaskType::new("export")));
    }
}
