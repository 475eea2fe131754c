//! Permission-gated execution sandbox.
//!
//! `execute` never fails: every outcome, including "no such operation", is an
//! `OperationResult`. Each call goes through, in order:
//!
//! 1. lookup in the `OperationRegistry`
//! 2. the `SandboxPolicy` check (denials never reach the body)
//! 3. parameter schema validation
//! 4. the body itself, spawned and raced against the effective deadline
//!
//! and ends with exactly one audit entry plus a usage counter update.

mod policy;
mod registry;

pub use policy::SandboxPolicy;
pub use registry::OperationRegistry;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::audit::AuditLog;
use crate::domain::errors::panic_message;
use crate::domain::{
    AuditEvent, OperationDefinition, OperationRequest, OperationResult, OperationStatus,
};
use crate::observability::{SandboxStats, UsageStats};
use crate::ports::{Clock, OperationContext, SystemClock};

/// Aborts the spawned body if `execute` itself is dropped mid-flight.
struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

enum Usage {
    Finished(OperationStatus),
    Denied,
}

pub struct ExecutionSandbox {
    operations: Arc<OperationRegistry>,
    policy: SandboxPolicy,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    usage: Mutex<HashMap<String, UsageStats>>,
}

impl ExecutionSandbox {
    pub fn new(
        operations: Arc<OperationRegistry>,
        policy: SandboxPolicy,
        audit: Arc<AuditLog>,
    ) -> Self {
        Self::with_clock(operations, policy, audit, Arc::new(SystemClock))
    }

    pub fn with_clock(
        operations: Arc<OperationRegistry>,
        policy: SandboxPolicy,
        audit: Arc<AuditLog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            operations,
            policy,
            audit,
            clock,
            usage: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    pub fn operations(&self) -> &Arc<OperationRegistry> {
        &self.operations
    }

    /// Run one request to completion, denial or timeout.
    pub async fn execute(&self, request: OperationRequest) -> OperationResult {
        let started = Instant::now();

        let Some((definition, body)) = self.operations.lookup(&request.operation) else {
            tracing::warn!(operation = %request.operation, "operation not found");
            let result = error_result(&request, "not found".to_string(), started);
            self.audit_executed(&request, &result);
            return result;
        };

        if !self.policy.permits(definition.category) {
            return self.deny(&request, &definition, started);
        }

        if let Err(reason) = definition.validate_args(&request.args) {
            let result = error_result(&request, reason, started);
            return self.finish(&request, result);
        }

        let deadline = self.deadline_for(&request, &definition);
        let (ctx, cancel_tx) = OperationContext::new(
            request.request_id,
            request.caller_id.clone(),
            deadline,
        );
        let args = request.args.clone();
        let mut handle = tokio::spawn(async move { body.invoke(args, ctx).await });
        let _guard = AbortOnDrop(handle.abort_handle());

        tracing::debug!(
            operation = %request.operation,
            request_id = %request.request_id,
            deadline_ms = deadline.as_millis() as u64,
            "operation started"
        );

        let outcome = tokio::time::timeout(deadline, &mut handle).await;
        let (status, output, error_message) = match outcome {
            Ok(Ok(Ok(output))) => (OperationStatus::Success, Some(output), None),
            Ok(Ok(Err(err))) => (OperationStatus::Error, None, Some(err.to_string())),
            Ok(Err(join_err)) if join_err.is_panic() => {
                let msg = panic_message(join_err.into_panic().as_ref());
                (OperationStatus::Error, None, Some(format!("operation panicked: {msg}")))
            }
            Ok(Err(join_err)) => (OperationStatus::Error, None, Some(join_err.to_string())),
            Err(_) => {
                // Ask nicely first, then stop it at its next await point.
                cancel_tx.send_replace(true);
                handle.abort();
                let msg = format!(
                    "operation '{}' timed out after {:.3}s",
                    request.operation,
                    deadline.as_secs_f64()
                );
                (OperationStatus::Timeout, None, Some(msg))
            }
        };

        let result = OperationResult {
            status,
            output,
            error_message,
            execution_time_seconds: started.elapsed().as_secs_f64(),
            request_id: request.request_id,
            caller_id: request.caller_id.clone(),
        };
        self.finish(&request, result)
    }

    /// Operations the current policy would let through, ordered by name.
    pub fn get_available(&self) -> Vec<OperationDefinition> {
        let mut defs = self.operations.list(None);
        defs.retain(|d| self.policy.permits(d.category));
        defs
    }

    pub fn usage_of(&self, operation: &str) -> Option<UsageStats> {
        self.usage.lock().get(operation).cloned()
    }

    pub fn stats(&self) -> SandboxStats {
        SandboxStats {
            total_operations: self.operations.len(),
            available_operations: self.get_available().len(),
            usage_by_operation: self
                .usage
                .lock()
                .iter()
                .map(|(name, usage)| (name.clone(), usage.clone()))
                .collect(),
            policy: self.policy.clone(),
        }
    }

    fn deadline_for(
        &self,
        request: &OperationRequest,
        definition: &OperationDefinition,
    ) -> Duration {
        request
            .timeout
            .or(self.policy.default_timeout)
            .map_or(definition.max_duration, |t| t.min(definition.max_duration))
    }

    fn deny(
        &self,
        request: &OperationRequest,
        definition: &OperationDefinition,
        started: Instant,
    ) -> OperationResult {
        let required = SandboxPolicy::required_permission(definition.category).unwrap_or_default();
        let message = format!(
            "permission denied: {} operation '{}' requires {required}",
            definition.category, definition.name
        );
        tracing::warn!(
            operation = %request.operation,
            caller_id = %request.caller_id,
            category = %definition.category,
            "operation denied"
        );
        let result = error_result(request, message, started);
        self.audit.record(
            AuditEvent::OperationDenied,
            json!({
                "operation": request.operation,
                "request_id": request.request_id,
                "caller_id": request.caller_id,
                "category": definition.category,
                "required": required,
            }),
        );
        self.record_usage(&request.operation, Usage::Denied, self.clock.now());
        result
    }

    fn finish(&self, request: &OperationRequest, result: OperationResult) -> OperationResult {
        let elapsed_ms = (result.execution_time_seconds * 1000.0) as u64;
        match result.status {
            OperationStatus::Success => tracing::info!(
                operation = %request.operation,
                request_id = %request.request_id,
                elapsed_ms,
                "operation succeeded"
            ),
            status => tracing::warn!(
                operation = %request.operation,
                request_id = %request.request_id,
                elapsed_ms,
                status = ?status,
                error = result.error_message.as_deref().unwrap_or_default(),
                "operation did not succeed"
            ),
        }
        self.audit_executed(request, &result);
        self.record_usage(&request.operation, Usage::Finished(result.status), self.clock.now());
        result
    }

    fn audit_executed(&self, request: &OperationRequest, result: &OperationResult) {
        self.audit.record(
            AuditEvent::OperationExecuted,
            json!({
                "operation": request.operation,
                "request_id": request.request_id,
                "caller_id": request.caller_id,
                "status": result.status,
                "execution_time_seconds": result.execution_time_seconds,
                "error": result.error_message,
            }),
        );
    }

    fn record_usage(&self, operation: &str, usage: Usage, now: DateTime<Utc>) {
        let mut all = self.usage.lock();
        let stats = all.entry(operation.to_string()).or_default();
        stats.usage_count += 1;
        stats.last_used_at = Some(now);
        match usage {
            Usage::Finished(OperationStatus::Success) => stats.success_count += 1,
            Usage::Finished(OperationStatus::Error) => stats.error_count += 1,
            Usage::Finished(OperationStatus::Timeout) => stats.timeout_count += 1,
            Usage::Denied => stats.denied_count += 1,
        }
    }
}

fn error_result(request: &OperationRequest, message: String, started: Instant) -> OperationResult {
    OperationResult {
        status: OperationStatus::Error,
        output: None,
        error_message: Some(message),
        execution_time_seconds: started.elapsed().as_secs_f64(),
        request_id: request.request_id,
        caller_id: request.caller_id.clone(),
    }
}
