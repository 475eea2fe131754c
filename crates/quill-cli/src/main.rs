use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use quill_core::domain::{Args, ParamSpec, ParamType, TaskType};
use quill_core::impls::{OPERATION_TASK_TYPE, OperationCall};
use quill_core::ports::{OperationContext, TaskExecutor, operation_fn};
use quill_core::{
    AuditLog, ExecutionError, ExecutionSandbox, OperationDefinition, OperationError,
    OperationRegistry, OperationRequest, QuillConfig, SafetyCategory, SandboxTaskExecutor,
    TaskScheduler, TaskSpec, WorkerRegistry,
};

#[derive(Debug, Deserialize)]
struct TopicPayload {
    topic: String,
}

/// Demo worker handling `research` and `outline` tasks.
struct ResearchWorker;

#[async_trait]
impl TaskExecutor for ResearchWorker {
    async fn execute(&self, task_type: &TaskType, payload: &Value) -> Result<Value, ExecutionError> {
        let p: TopicPayload = serde_json::from_value(payload.clone())
            .map_err(|e| ExecutionError::failed(format!("json decode: {e}")))?;

        match task_type.as_str() {
            "research" => {
                sleep(Duration::from_millis(150)).await;
                Ok(json!({ "notes": format!("three sources on {}", p.topic) }))
            }
            "outline" => {
                sleep(Duration::from_millis(100)).await;
                Ok(json!({ "sections": ["intro", p.topic, "summary"] }))
            }
            _ => Err(ExecutionError::NotImplemented(task_type.clone())),
        }
    }
}

/// Operations available to the sandbox.
fn register_operations(ops: &OperationRegistry) {
    ops.register(
        OperationDefinition::new("word_count", SafetyCategory::Safe, Duration::from_secs(1))
            .with_description("count whitespace-separated words")
            .with_param("text", ParamSpec::required(ParamType::String)),
        Arc::new(operation_fn(|args: Args, _ctx| async move {
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(json!(text.split_whitespace().count()))
        })),
    );

    ops.register(
        OperationDefinition::new("slow_fetch", SafetyCategory::Safe, Duration::from_millis(300))
            .with_description("pretends to fetch a slow URL"),
        Arc::new(operation_fn(|_args, ctx: OperationContext| async move {
            tokio::select! {
                _ = sleep(Duration::from_secs(10)) => Ok(json!("fetched")),
                _ = ctx.cancelled() => Err(OperationError::Cancelled),
            }
        })),
    );

    ops.register(
        OperationDefinition::new("shell_echo", SafetyCategory::Unsafe, Duration::from_secs(5))
            .with_description("runs a shell command")
            .with_param("cmd", ParamSpec::required(ParamType::String)),
        Arc::new(operation_fn(|args: Args, _ctx| async move {
            Ok(args.get("cmd").cloned().unwrap_or_default())
        })),
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = QuillConfig::from_env()?;
    tracing::info!(?config, "configuration loaded");
    let audit = Arc::new(AuditLog::new());

    // sandbox
    let ops = Arc::new(OperationRegistry::new());
    register_operations(&ops);
    let sandbox = Arc::new(ExecutionSandbox::new(
        ops,
        config.sandbox.clone(),
        Arc::clone(&audit),
    ));

    // workers
    let workers = Arc::new(WorkerRegistry::new(Arc::clone(&audit)));
    workers
        .register("researcher", "research", ["research", "outline"], Arc::new(ResearchWorker))
        .await;
    workers
        .register(
            "tools",
            "tools",
            [OPERATION_TASK_TYPE],
            Arc::new(SandboxTaskExecutor::new(Arc::clone(&sandbox), "tools")),
        )
        .await;

    let scheduler = TaskScheduler::new(config.scheduler.clone(), workers, Arc::clone(&audit))?;
    scheduler.start()?;

    // research -> outline -> word_count dependency chain
    let research = scheduler
        .submit(TaskSpec::new("researcher", "research", json!({ "topic": "tides" })))
        .await?;
    let outline = scheduler
        .submit(
            TaskSpec::new("researcher", "outline", json!({ "topic": "tides" })).depends_on(research),
        )
        .await?;

    let mut args = Args::new();
    args.insert("text".into(), json!("intro tides summary"));
    let word_count = OperationCall::new("word_count", args).to_payload();
    let count = scheduler
        .submit(TaskSpec::new("tools", OPERATION_TASK_TYPE, word_count).depends_on(outline))
        .await?;
    let slow = scheduler
        .submit(TaskSpec::new(
            "tools",
            OPERATION_TASK_TYPE,
            OperationCall::new("slow_fetch", Args::new()).to_payload(),
        ))
        .await?;

    for id in [research, outline, count, slow] {
        let task = scheduler.wait_for(id, Duration::from_secs(10)).await?;
        println!(
            "{id}: {:?} result={:?} error={:?}",
            task.status, task.result, task.error_message
        );
    }

    // Direct call; denied unless QUILL_ALLOW_UNSAFE is set
    let mut shell_args = Args::new();
    shell_args.insert("cmd".into(), json!("echo hi"));
    let denied = sandbox
        .execute(OperationRequest::new("shell_echo", shell_args).with_caller("cli"))
        .await;
    println!("shell_echo: {}", serde_json::to_string(&denied)?);

    scheduler.stop().await;

    println!("scheduler stats:\n{}", serde_json::to_string_pretty(&scheduler.stats().await)?);
    println!("sandbox stats:\n{}", serde_json::to_string_pretty(&sandbox.stats())?);
    println!("audit tail:\n{}", serde_json::to_string_pretty(&scheduler.audit_log(10))?);
    Ok(())
}
