//! Operation port: bodies run by the execution sandbox.

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;

use crate::domain::{Args, OperationError, RequestId};

/// Per-call context handed to an operation body.
///
/// Bodies that do long or repeated work should poll `is_cancelled()` or race
/// against `cancelled()`. The sandbox fires it when the deadline elapses and then
/// aborts the body at its next await point; blocking code that never yields cannot
/// be stopped.
#[derive(Debug, Clone)]
pub struct OperationContext {
    pub request_id: RequestId,
    pub caller_id: String,

    /// Effective deadline for this call.
    pub deadline: Duration,
    cancel_rx: watch::Receiver<bool>,
}

impl OperationContext {
    pub(crate) fn new(
        request_id: RequestId,
        caller_id: String,
        deadline: Duration,
    ) -> (Self, watch::Sender<bool>) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let ctx = Self {
            request_id,
            caller_id,
            deadline,
            cancel_rx,
        };
        (ctx, cancel_tx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves once the sandbox gives up on this call.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        // A dropped sender means nobody is waiting for the result any more.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

#[async_trait]
pub trait Operation: Send + Sync {
    async fn invoke(
        &self,
        args: Args,
        ctx: OperationContext,
    ) -> Result<serde_json::Value, OperationError>;
}

/// Adapter turning an async closure into an `Operation`.
pub struct FnOperation<F> {
    f: F,
}

pub fn operation_fn<F, Fut>(f: F) -> FnOperation<F>
where
    F: Fn(Args, OperationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, OperationError>> + Send + 'static,
{
    FnOperation { f }
}

#[async_trait]
impl<F, Fut> Operation for FnOperation<F>
where
    F: Fn(Args, OperationContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<serde_json::Value, OperationError>> + Send + 'static,
{
    async fn invoke(
        &self,
        args: Args,
        ctx: OperationContext,
    ) -> Result<serde_json::Value, OperationError> {
        (self.f)(args, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_signal_reaches_context() {
        let (ctx, cancel_tx) =
            OperationContext::new(RequestId::random(), "tester".into(), Duration::from_secs(1));
        assert!(!ctx.is_cancelled());

        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.cancelled().await })
        };
        cancel_tx.send(true).unwrap();

        waiter.await.unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn closure_operation_receives_args() {
        let op = operation_fn(|args: Args, _ctx| async move {
            Ok(args.get("text").cloned().unwrap_or_default())
        });
        let (ctx, _tx) =
            OperationContext::new(RequestId::random(), String::new(), Duration::from_secs(1));

        let mut args = Args::new();
        args.insert("text".into(), serde_json::json!("hello"));
        assert_eq!(op.invoke(args, ctx).await.unwrap(), serde_json::json!("hello"));
    }
}
