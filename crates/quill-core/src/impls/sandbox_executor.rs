//! Runs scheduler tasks as sandboxed operation calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{Args, ExecutionError, OperationRequest, OperationStatus, TaskType};
use crate::ports::TaskExecutor;
use crate::sandbox::ExecutionSandbox;

/// Task type handled by `SandboxTaskExecutor`.
pub const OPERATION_TASK_TYPE: &str = "operation";

/// Payload of an `operation` task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationCall {
    pub operation: String,

    #[serde(default)]
    pub args: Args,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl OperationCall {
    pub fn new(operation: impl Into<String>, args: Args) -> Self {
        Self {
            operation: operation.into(),
            args,
            timeout_ms: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Worker executor that forwards `operation` tasks to an `ExecutionSandbox`.
///
/// Anything but a `Success` result fails the task with the sandbox's message,
/// so a denial or timeout shows up as a Failed task.
pub struct SandboxTaskExecutor {
    sandbox: Arc<ExecutionSandbox>,
    caller_id: String,
}

impl SandboxTaskExecutor {
    pub fn new(sandbox: Arc<ExecutionSandbox>, caller_id: impl Into<String>) -> Self {
        Self {
            sandbox,
            caller_id: caller_id.into(),
        }
    }
}

#[async_trait]
impl TaskExecutor for SandboxTaskExecutor {
    async fn execute(&self, task_type: &TaskType, payload: &Value) -> Result<Value, ExecutionError> {
        if task_type.as_str() != OPERATION_TASK_TYPE {
            return Err(ExecutionError::NotImplemented(task_type.clone()));
        }
        let call: OperationCall = serde_json::from_value(payload.clone())
            .map_err(|e| ExecutionError::failed(format!("invalid operation payload: {e}")))?;

        let mut request =
            OperationRequest::new(call.operation, call.args).with_caller(self.caller_id.clone());
        if let Some(ms) = call.timeout_ms {
            request = request.with_timeout(Duration::from_millis(ms));
        }

        let result = self.sandbox.execute(request).await;
        match result.status {
            OperationStatus::Success => Ok(result.output.unwrap_or(Value::Null)),
            status => {
                let message = result
                    .error_message
                    .unwrap_or_else(|| format!("operation ended with {status:?}"));
                Err(ExecutionError::Failed(message))
            }
        }
    }
}
