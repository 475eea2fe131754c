//! End-to-end scheduler scenarios: dependencies, capacity, ordering,
//! cancellation and audit completeness.

use parking_lot::Mutex;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use quill_core::ports::{TaskExecutor, executor_fn};
use quill_core::{
    AuditEvent, AuditLog, ExecutionError, SchedulerConfig, TaskId, TaskScheduler, TaskSpec,
    TaskStatus, WorkerRegistry, WorkerStatus,
};

const WAIT: Duration = Duration::from_secs(10);

/// Records the `label` of each payload as the body starts.
fn recording(log: Arc<Mutex<Vec<String>>>, work: Duration) -> Arc<dyn TaskExecutor> {
    Arc::new(executor_fn(move |_task_type, payload: Value| {
        let log = Arc::clone(&log);
        async move {
            let label = payload["label"].as_str().unwrap_or_default().to_string();
            log.lock().push(format!("start {label}"));
            tokio::time::sleep(work).await;
            log.lock().push(format!("end {label}"));
            Ok(json!({ "label": label }))
        }
    }))
}

async fn scheduler_with(
    max_concurrency: usize,
    executor: Arc<dyn TaskExecutor>,
) -> (TaskScheduler, Arc<AuditLog>) {
    scheduler_with_backoff(max_concurrency, Duration::from_millis(10), executor).await
}

async fn scheduler_with_backoff(
    max_concurrency: usize,
    backoff: Duration,
    executor: Arc<dyn TaskExecutor>,
) -> (TaskScheduler, Arc<AuditLog>) {
    let audit = Arc::new(AuditLog::new());
    let workers = Arc::new(WorkerRegistry::new(Arc::clone(&audit)));
    workers.register("w1", "general", ["any"], executor).await;
    let config = SchedulerConfig::default()
        .with_max_concurrency(max_concurrency)
        .with_backoff(backoff);
    let scheduler = TaskScheduler::new(config, workers, Arc::clone(&audit)).unwrap();
    (scheduler, audit)
}

fn labelled(label: &str) -> TaskSpec {
    TaskSpec::new("w1", "step", json!({ "label": label }))
}

async fn wait_until_running(scheduler: &TaskScheduler, id: TaskId) {
    for _ in 0..500 {
        if scheduler.get_task(id).await.unwrap().status == TaskStatus::InProgress {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("task {id} never started");
}

#[tokio::test]
async fn dependent_task_starts_after_its_dependency_completes() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (scheduler, _audit) =
        scheduler_with(3, recording(Arc::clone(&log), Duration::from_millis(50))).await;
    scheduler.start().unwrap();

    let a = scheduler.submit(labelled("A")).await.unwrap();
    let b = scheduler.submit(labelled("B").depends_on(a)).await.unwrap();

    let b_task = scheduler.wait_for(b, WAIT).await.unwrap();
    let a_task = scheduler.get_task(a).await.unwrap();
    assert_eq!(a_task.status, TaskStatus::Completed);
    assert_eq!(b_task.status, TaskStatus::Completed);
    assert!(b_task.started_at.unwrap() >= a_task.completed_at.unwrap());
    assert_eq!(*log.lock(), ["start A", "end A", "start B", "end B"]);

    scheduler.stop().await;
}

#[tokio::test]
async fn concurrency_limit_of_one_serialises_tasks() {
    let current = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));
    let executor: Arc<dyn TaskExecutor> = {
        let current = Arc::clone(&current);
        let peak = Arc::clone(&peak);
        Arc::new(executor_fn(move |_t, _p| {
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            async move {
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(30)).await;
                current.fetch_sub(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        }))
    };
    // Long backoff: the second start must come from the completion wake-up, not the tick.
    let (scheduler, _audit) =
        scheduler_with_backoff(1, Duration::from_millis(500), Arc::clone(&executor)).await;
    scheduler
        .workers()
        .register("w2", "general", ["any"], executor)
        .await;
    scheduler.start().unwrap();

    // Two idle workers, yet the global limit admits one task at a time.
    let first = scheduler.submit(labelled("one")).await.unwrap();
    let second = scheduler
        .submit(TaskSpec::new("w2", "step", json!({ "label": "two" })))
        .await
        .unwrap();

    // While the first runs, the second must still be waiting.
    wait_until_running(&scheduler, first).await;
    let stats = scheduler.stats().await;
    assert_eq!(stats.running_count, 1);
    assert_eq!(
        scheduler.get_task(second).await.unwrap().status,
        TaskStatus::Pending
    );

    let second_task = scheduler.wait_for(second, WAIT).await.unwrap();
    let first_task = scheduler.get_task(first).await.unwrap();
    assert_eq!(first_task.status, TaskStatus::Completed);
    assert_eq!(second_task.status, TaskStatus::Completed);
    assert_eq!(peak.load(Ordering::SeqCst), 1);

    let gap = second_task.started_at.unwrap() - first_task.completed_at.unwrap();
    assert!(gap >= chrono::TimeDelta::zero());
    assert!(
        gap < chrono::TimeDelta::milliseconds(100),
        "second task waited {gap} after the first completed"
    );

    scheduler.stop().await;
}

#[tokio::test]
async fn higher_priority_first_then_submission_order() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (scheduler, _audit) =
        scheduler_with(1, recording(Arc::clone(&log), Duration::from_millis(5))).await;

    // Queue everything before the loop runs so ordering is decided by the queue alone.
    let ids = [
        scheduler.submit(labelled("first")).await.unwrap(),
        scheduler.submit(labelled("second")).await.unwrap(),
        scheduler.submit(labelled("urgent").with_priority(5)).await.unwrap(),
        scheduler.submit(labelled("third")).await.unwrap(),
    ];
    scheduler.start().unwrap();
    for id in ids {
        scheduler.wait_for(id, WAIT).await.unwrap();
    }

    let starts: Vec<String> = log
        .lock()
        .iter()
        .filter_map(|e| e.strip_prefix("start ").map(str::to_string))
        .collect();
    assert_eq!(starts, ["urgent", "first", "second", "third"]);

    scheduler.stop().await;
}

#[tokio::test]
async fn cancelling_a_running_task_discards_its_side_effects() {
    let side_effects = Arc::new(AtomicUsize::new(0));
    let executor = {
        let side_effects = Arc::clone(&side_effects);
        Arc::new(executor_fn(move |_t, _p| {
            let side_effects = Arc::clone(&side_effects);
            async move {
                tokio::time::sleep(Duration::from_secs(30)).await;
                side_effects.fetch_add(1, Ordering::SeqCst);
                Ok(json!("too late"))
            }
        }))
    };
    let (scheduler, audit) = scheduler_with(1, executor).await;
    scheduler.start().unwrap();

    let id = scheduler.submit(labelled("long")).await.unwrap();
    wait_until_running(&scheduler, id).await;

    assert!(scheduler.cancel(id).await);
    assert!(!scheduler.cancel(id).await);

    let task = scheduler.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.result, None);

    let worker = scheduler.workers().get_status(&"w1".into()).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert_eq!(scheduler.stats().await.running_count, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(side_effects.load(Ordering::SeqCst), 0);
    assert_eq!(audit.count_of(AuditEvent::TaskCancelled), 1);
    assert_eq!(audit.count_of(AuditEvent::TaskCompleted), 0);

    scheduler.stop().await;
}

#[tokio::test]
async fn cancel_after_completion_is_a_noop() {
    let (scheduler, audit) = scheduler_with(
        1,
        Arc::new(executor_fn(|_t, _p| async { Ok(json!("ok")) })),
    )
    .await;
    scheduler.start().unwrap();

    let id = scheduler.submit(labelled("quick")).await.unwrap();
    let task = scheduler.wait_for(id, WAIT).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);

    assert!(!scheduler.cancel(id).await);
    let task = scheduler.get_task(id).await.unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.result, Some(json!("ok")));
    assert_eq!(audit.count_of(AuditEvent::TaskCancelled), 0);

    scheduler.stop().await;
}

#[tokio::test]
async fn failed_dependency_cancels_the_chain() {
    let executor = Arc::new(executor_fn(|_t, payload: Value| async move {
        if payload["label"] == "bad" {
            Err(ExecutionError::failed("source unavailable"))
        } else {
            Ok(Value::Null)
        }
    }));
    let (scheduler, _audit) = scheduler_with(2, executor).await;
    scheduler.start().unwrap();

    let bad = scheduler.submit(labelled("bad")).await.unwrap();
    let next = scheduler.submit(labelled("next").depends_on(bad)).await.unwrap();
    let last = scheduler.submit(labelled("last").depends_on(next)).await.unwrap();

    assert_eq!(
        scheduler.wait_for(bad, WAIT).await.unwrap().status,
        TaskStatus::Failed
    );
    for id in [next, last] {
        let task = scheduler.wait_for(id, WAIT).await.unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert!(task.started_at.is_none());
    }

    // A late dependent of a failed task is cancelled at submission.
    let late = scheduler.submit(labelled("late").depends_on(bad)).await.unwrap();
    assert_eq!(
        scheduler.get_task(late).await.unwrap().status,
        TaskStatus::Cancelled
    );

    scheduler.stop().await;
}

#[tokio::test]
async fn every_state_change_is_audited_exactly_once() {
    let executor = Arc::new(executor_fn(|_t, payload: Value| async move {
        match payload["label"].as_str() {
            Some("fail") => Err(ExecutionError::failed("nope")),
            Some("hold") => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(Value::Null)
            }
            _ => Ok(Value::Null),
        }
    }));
    let (scheduler, audit) = scheduler_with(3, executor).await;
    scheduler.start().unwrap();

    let ok = scheduler.submit(labelled("ok")).await.unwrap();
    let fail = scheduler.submit(labelled("fail")).await.unwrap();
    let hold = scheduler.submit(labelled("hold")).await.unwrap();

    scheduler.wait_for(ok, WAIT).await.unwrap();
    scheduler.wait_for(fail, WAIT).await.unwrap();
    wait_until_running(&scheduler, hold).await;
    assert!(scheduler.cancel(hold).await);

    assert_eq!(audit.count_of(AuditEvent::WorkerRegistered), 1);
    assert_eq!(audit.count_of(AuditEvent::TaskSubmitted), 3);
    assert_eq!(audit.count_of(AuditEvent::TaskStarted), 3);
    assert_eq!(audit.count_of(AuditEvent::TaskCompleted), 1);
    assert_eq!(audit.count_of(AuditEvent::TaskFailed), 1);
    assert_eq!(audit.count_of(AuditEvent::TaskCancelled), 1);

    let failed = audit.entries_of(AuditEvent::TaskFailed);
    assert_eq!(failed[0].data["error"], "nope");
    assert!(failed[0].data["duration_ms"].is_u64());

    let tail = scheduler.audit_log(2);
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[1].event_type, AuditEvent::TaskCancelled);

    scheduler.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_cancels_race_completions_without_leaking_state() {
    const TASKS: usize = 200;

    let executor = Arc::new(executor_fn(|_t, payload: Value| async move {
        tokio::task::yield_now().await;
        Ok(payload["label"].clone())
    }));
    let (scheduler, audit) = scheduler_with(8, executor).await;
    let scheduler = Arc::new(scheduler);
    scheduler.start().unwrap();

    let mut ids = Vec::with_capacity(TASKS);
    let mut cancels = Vec::with_capacity(TASKS);
    for i in 0..TASKS {
        let id = scheduler.submit(labelled(&format!("t{i}"))).await.unwrap();
        ids.push(id);
        let scheduler = Arc::clone(&scheduler);
        cancels.push(tokio::spawn(async move {
            for _ in 0..i % 3 {
                tokio::task::yield_now().await;
            }
            scheduler.cancel(id).await
        }));
    }

    let mut accepted_cancels = 0;
    for handle in cancels {
        if handle.await.unwrap() {
            accepted_cancels += 1;
        }
    }

    let mut completed = 0;
    let mut cancelled = 0;
    for id in &ids {
        let task = scheduler.wait_for(*id, WAIT).await.unwrap();
        match task.status {
            TaskStatus::Completed => {
                assert!(task.result.is_some(), "{id} completed without a result");
                completed += 1;
            }
            TaskStatus::Cancelled => {
                assert_eq!(task.result, None, "{id} was cancelled but kept a result");
                cancelled += 1;
            }
            other => panic!("{id} ended in {other:?}"),
        }
    }
    assert_eq!(completed + cancelled, TASKS);
    assert_eq!(cancelled, accepted_cancels);

    let stats = scheduler.stats().await;
    assert_eq!(stats.running_count, 0);
    assert_eq!(stats.tasks_by_status.pending, 0);
    assert_eq!(stats.tasks_by_status.in_progress, 0);
    assert_eq!(stats.tasks_by_status.completed, completed);
    assert_eq!(stats.tasks_by_status.cancelled, cancelled);
    assert_eq!(stats.workers_by_status.busy, 0);

    assert_eq!(audit.count_of(AuditEvent::TaskSubmitted), TASKS);
    assert_eq!(audit.count_of(AuditEvent::TaskCompleted), completed);
    assert_eq!(audit.count_of(AuditEvent::TaskCancelled), cancelled);
    assert_eq!(audit.count_of(AuditEvent::TaskFailed), 0);

    let worker = scheduler.workers().get_status(&"w1".into()).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert_eq!(worker.active_tasks, 0);
    assert_eq!(worker.current_task_id, None);

    scheduler.stop().await;
}

#[tokio::test]
async fn worker_running_two_tasks_stays_busy_until_both_end() {
    let executor = Arc::new(executor_fn(|_t, payload: Value| async move {
        if payload["label"] == "long" {
            tokio::time::sleep(Duration::from_secs(30)).await;
        } else {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        Ok(Value::Null)
    }));
    let (scheduler, _audit) = scheduler_with(2, executor).await;
    scheduler.start().unwrap();

    let long = scheduler.submit(labelled("long")).await.unwrap();
    let short = scheduler.submit(labelled("short")).await.unwrap();
    wait_until_running(&scheduler, long).await;

    scheduler.wait_for(short, WAIT).await.unwrap();
    let stats = scheduler.stats().await;
    assert_eq!(stats.running_count, 1);
    assert_eq!(stats.workers_by_status.busy, 1);
    let worker = scheduler.workers().get_status(&"w1".into()).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Busy);
    assert_eq!(worker.active_tasks, 1);
    assert_eq!(worker.current_task_id, Some(long));

    assert!(scheduler.cancel(long).await);
    let worker = scheduler.workers().get_status(&"w1".into()).await.unwrap();
    assert_eq!(worker.status, WorkerStatus::Idle);
    assert_eq!(worker.active_tasks, 0);

    scheduler.stop().await;
}
