//! Concurrency-bounded task scheduler.
//!
//! One coordinating loop per scheduler decides what runs; every dispatched body
//! runs in its own tokio task so a slow body never holds up dispatch.
//!
//! All task state lives in a single `SchedulerState` behind a mutex. Dispatch,
//! completion and cancellation each make their terminal-state decision while
//! holding that lock, so whichever of "body finished" and "cancel requested"
//! gets there first wins and the other is a no-op.

mod config;
mod dependency;
mod record;

pub use config::SchedulerConfig;

use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde_json::json;
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::audit::AuditLog;
use crate::domain::errors::panic_message;
use crate::domain::{
    AuditEntry, AuditEvent, ExecutionError, QuillError, Task, TaskId, TaskSpec, TaskStatus,
};
use crate::observability::{SchedulerStats, TaskCounts};
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::registry::WorkerRegistry;

use dependency::DependencyGraph;
use record::{QueueKey, TaskRecord};

struct SchedulerState {
    records: HashMap<TaskId, TaskRecord>,

    /// Pending tasks in dispatch order.
    pending: BTreeMap<QueueKey, TaskId>,
    graph: DependencyGraph,

    /// Number of InProgress tasks.
    running: usize,
    next_seq: u64,
}

impl SchedulerState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            pending: BTreeMap::new(),
            graph: DependencyGraph::new(),
            running: 0,
            next_seq: 1,
        }
    }
}

/// How a task body ended.
enum BodyOutcome {
    Returned(Result<serde_json::Value, ExecutionError>),
    Panicked(String),
}

struct Inner {
    config: SchedulerConfig,
    workers: Arc<WorkerRegistry>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    state: Mutex<SchedulerState>,

    /// Wakes the coordinating loop (submit, completion, cancellation).
    wake: Notify,

    /// Bumped on every terminal transition; `wait_for` watches it.
    settled: watch::Sender<u64>,
}

/// Builder for `TaskScheduler`, mainly to inject a clock or id generator.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    workers: Arc<WorkerRegistry>,
    audit: Arc<AuditLog>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
}

impl SchedulerBuilder {
    pub fn config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn build(self) -> Result<TaskScheduler, QuillError> {
        self.config.validate()?;
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let (settled, _) = watch::channel(0);
        let (shutdown_tx, _) = watch::channel(false);

        let inner = Inner {
            config: self.config,
            workers: self.workers,
            audit: self.audit,
            clock,
            ids,
            state: Mutex::new(SchedulerState::new()),
            wake: Notify::new(),
            settled,
        };
        Ok(TaskScheduler {
            inner: Arc::new(inner),
            shutdown_tx,
            loop_handle: parking_lot::Mutex::new(None),
        })
    }
}

/// Task scheduler handle.
///
/// ```ignore
/// let scheduler = TaskScheduler::new(SchedulerConfig::default(), workers, audit)?;
/// scheduler.start()?;
/// let a = scheduler.submit(TaskSpec::new("w1", "research", json!({}))).await?;
/// let b = scheduler.submit(TaskSpec::new("w1", "draft", json!({})).depends_on(a)).await?;
/// let done = scheduler.wait_for(b, Duration::from_secs(30)).await?;
/// scheduler.stop().await;
/// ```
pub struct TaskScheduler {
    inner: Arc<Inner>,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    pub fn new(
        config: SchedulerConfig,
        workers: Arc<WorkerRegistry>,
        audit: Arc<AuditLog>,
    ) -> Result<Self, QuillError> {
        Self::builder(workers, audit).config(config).build()
    }

    pub fn builder(workers: Arc<WorkerRegistry>, audit: Arc<AuditLog>) -> SchedulerBuilder {
        SchedulerBuilder {
            config: SchedulerConfig::default(),
            workers,
            audit,
            clock: None,
            ids: None,
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    pub fn workers(&self) -> &Arc<WorkerRegistry> {
        &self.inner.workers
    }

    /// Spawn the coordinating loop. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<(), QuillError> {
        let mut slot = self.loop_handle.lock();
        if slot.is_some() {
            return Err(QuillError::AlreadyRunning);
        }
        self.shutdown_tx.send_replace(false);
        let shutdown_rx = self.shutdown_tx.subscribe();
        let inner = Arc::clone(&self.inner);
        *slot = Some(tokio::spawn(inner.run(shutdown_rx)));
        tracing::info!(
            max_concurrency = self.inner.config.max_concurrency,
            "scheduler started"
        );
        Ok(())
    }

    /// Stop the coordinating loop and wait for it to exit.
    ///
    /// Bodies already running are left to finish and report normally; nothing
    /// new is dispatched until `start` is called again.
    pub async fn stop(&self) {
        let handle = self.loop_handle.lock().take();
        let Some(handle) = handle else {
            return;
        };
        self.shutdown_tx.send_replace(true);
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "scheduler loop ended abnormally");
        }
        self.inner.workers.complete_idle_workers().await;
        tracing::info!("scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.loop_handle.lock().is_some()
    }

    /// Queue a new task. Fails only if the target worker is not registered.
    pub async fn submit(&self, spec: TaskSpec) -> Result<TaskId, QuillError> {
        let inner = &self.inner;
        if !inner.workers.contains(&spec.worker_id).await {
            return Err(QuillError::UnknownWorker(spec.worker_id));
        }

        let task_id = inner.ids.generate_task_id();
        let now = inner.clock.now();

        let mut guard = inner.state.lock().await;
        let state = &mut *guard;

        let seq = state.next_seq;
        state.next_seq += 1;

        // A dependency that is unknown, failed or cancelled can never complete.
        let mut unsatisfiable = None;
        for dep in &spec.dependencies {
            match state.records.get(dep).map(TaskRecord::status) {
                Some(TaskStatus::Completed) => {}
                Some(status) if !status.is_terminal() => state.graph.add_dependency(task_id, *dep),
                Some(status) => {
                    unsatisfiable = Some(format!("dependency {dep} ended as {status:?}"));
                }
                None => unsatisfiable = Some(format!("dependency {dep} does not exist")),
            }
        }

        let task = Task {
            task_id,
            worker_id: spec.worker_id,
            task_type: spec.task_type,
            payload: spec.payload,
            priority: spec.priority,
            dependencies: spec.dependencies,
            status: TaskStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            result: None,
            error_message: None,
        };
        let record = TaskRecord::new(task, seq);
        state.pending.insert(record.queue_key(), task_id);

        tracing::info!(
            task_id = %task_id,
            worker_id = %record.task.worker_id,
            task_type = %record.task.task_type,
            priority = record.task.priority,
            "task submitted"
        );
        inner.audit.record(
            AuditEvent::TaskSubmitted,
            json!({
                "task_id": task_id,
                "worker_id": record.task.worker_id,
                "task_type": record.task.task_type,
                "priority": record.task.priority,
                "dependencies": record.task.dependencies,
            }),
        );
        state.records.insert(task_id, record);

        if let Some(reason) = unsatisfiable {
            inner.cancel_unsatisfiable(state, task_id, reason, now);
            drop(guard);
            inner.settled.send_modify(|n| *n += 1);
            return Ok(task_id);
        }

        drop(guard);
        inner.wake.notify_one();
        Ok(task_id)
    }

    /// Cancel a Pending or InProgress task.
    ///
    /// Returns false for unknown or already terminal tasks. A running body is
    /// aborted at its next await point and its outcome is discarded.
    pub async fn cancel(&self, task_id: TaskId) -> bool {
        let inner = &self.inner;
        let now = inner.clock.now();

        let mut guard = inner.state.lock().await;
        let state = &mut *guard;

        let Some(record) = state.records.get_mut(&task_id) else {
            return false;
        };
        let previous = record.status();
        let key = record.queue_key();
        let worker_id = record.task.worker_id.clone();
        if !record.cancel(now, Some("cancelled by request".into())) {
            return false;
        }

        match previous {
            TaskStatus::Pending => {
                state.pending.remove(&key);
                state.graph.remove_task(task_id);
            }
            TaskStatus::InProgress => {
                state.running -= 1;
                inner.workers.mark_idle(&worker_id, task_id).await;
            }
            _ => {}
        }

        tracing::info!(task_id = %task_id, previous = ?previous, "task cancelled");
        inner.audit.record(
            AuditEvent::TaskCancelled,
            json!({
                "task_id": task_id,
                "worker_id": worker_id,
                "previous_status": previous,
                "reason": "requested",
            }),
        );
        inner.cancel_dependents(state, task_id, now);

        drop(guard);
        inner.settled.send_modify(|n| *n += 1);
        inner.wake.notify_one();
        true
    }

    pub async fn get_task(&self, task_id: TaskId) -> Result<Task, QuillError> {
        self.inner
            .state
            .lock()
            .await
            .records
            .get(&task_id)
            .map(|r| r.task.clone())
            .ok_or(QuillError::UnknownTask(task_id))
    }

    /// Snapshots in submission order, optionally filtered by status.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<Task> {
        let state = self.inner.state.lock().await;
        let mut records: Vec<&TaskRecord> = state
            .records
            .values()
            .filter(|r| status.is_none_or(|s| r.status() == s))
            .collect();
        records.sort_by_key(|r| r.seq);
        records.into_iter().map(|r| r.task.clone()).collect()
    }

    /// Wait until the task is terminal, or `timeout` elapses.
    ///
    /// On timeout the current (non-terminal) snapshot is returned.
    pub async fn wait_for(&self, task_id: TaskId, timeout: Duration) -> Result<Task, QuillError> {
        let mut settled = self.inner.settled.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let task = self.get_task(task_id).await?;
            if task.is_terminal() {
                return Ok(task);
            }
            match tokio::time::timeout_at(deadline, settled.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) | Err(_) => return self.get_task(task_id).await,
            }
        }
    }

    pub async fn stats(&self) -> SchedulerStats {
        let (total_tasks, running_count, queue_depth, tasks_by_status) = {
            let state = self.inner.state.lock().await;
            let mut counts = TaskCounts::default();
            for record in state.records.values() {
                counts.add(record.status());
            }
            (state.records.len(), state.running, state.pending.len(), counts)
        };

        SchedulerStats {
            total_workers: self.inner.workers.len().await,
            total_tasks,
            running_count,
            queue_depth,
            max_concurrency: self.inner.config.max_concurrency,
            workers_by_status: self.inner.workers.counts().await,
            tasks_by_status,
        }
    }

    /// The most recent `limit` audit entries, oldest first.
    pub fn audit_log(&self, limit: usize) -> Vec<AuditEntry> {
        self.inner.audit.recent(limit)
    }
}

impl Inner {
    async fn run(self: Arc<Self>, mut shutdown_rx: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.backoff);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }

            self.dispatch_ready().await;

            tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        // Scheduler handle dropped.
                        break;
                    }
                }
                _ = self.wake.notified() => {}
                _ = ticker.tick() => {}
            }
        }
        tracing::debug!("scheduler loop exited");
    }

    /// Dispatch every dispatchable task that fits in the free capacity.
    async fn dispatch_ready(self: &Arc<Self>) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let free = self.config.max_concurrency.saturating_sub(state.running);
        if free == 0 || state.pending.is_empty() {
            return;
        }

        let mut ready = Vec::with_capacity(free);
        for &task_id in state.pending.values() {
            if ready.len() == free {
                break;
            }
            if state.graph.has_dependencies(task_id) {
                tracing::trace!(
                    task_id = %task_id,
                    waiting_on = state.graph.get_dependencies(task_id).len(),
                    "task blocked on dependencies"
                );
                continue;
            }
            ready.push(task_id);
        }

        for task_id in ready {
            self.dispatch(state, task_id).await;
        }
    }

    async fn dispatch(self: &Arc<Self>, state: &mut SchedulerState, task_id: TaskId) {
        let now = self.clock.now();
        let Some(record) = state.records.get_mut(&task_id) else {
            return;
        };
        let key = record.queue_key();
        if !record.start(now) {
            return;
        }
        let worker_id = record.task.worker_id.clone();
        let task_type = record.task.task_type.clone();
        let payload = record.task.payload.clone();
        state.pending.remove(&key);
        state.running += 1;

        let executor = self.workers.executor(&worker_id).await;
        self.workers.mark_busy(&worker_id, task_id).await;

        tracing::info!(task_id = %task_id, worker_id = %worker_id, "task started");
        self.audit.record(
            AuditEvent::TaskStarted,
            json!({ "task_id": task_id, "worker_id": worker_id }),
        );

        let inner = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = match executor {
                Some(executor) => {
                    match AssertUnwindSafe(executor.execute(&task_type, &payload))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => BodyOutcome::Returned(result),
                        Err(panic) => BodyOutcome::Panicked(panic_message(panic.as_ref())),
                    }
                }
                None => BodyOutcome::Returned(Err(ExecutionError::failed(format!(
                    "worker {worker_id} is not registered"
                )))),
            };
            inner.finish(task_id, outcome, started.elapsed()).await;
        });

        // The body cannot report before we release the lock, so the handle is
        // always in place by the time `finish` or `cancel` look for it.
        if let Some(record) = state.records.get_mut(&task_id) {
            record.abort = Some(handle.abort_handle());
        }
    }

    /// Record the end of a body. A no-op if the task was cancelled meanwhile.
    async fn finish(&self, task_id: TaskId, outcome: BodyOutcome, elapsed: Duration) {
        let now = self.clock.now();
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(record) = state.records.get_mut(&task_id) else {
            return;
        };
        if record.status() != TaskStatus::InProgress {
            tracing::debug!(task_id = %task_id, status = ?record.status(), "late result discarded");
            return;
        }
        let worker_id = record.task.worker_id.clone();
        let elapsed_ms = elapsed.as_millis() as u64;

        let (succeeded, panicked) = match outcome {
            BodyOutcome::Returned(Ok(value)) => {
                record.complete(now, value);
                (true, false)
            }
            BodyOutcome::Returned(Err(err)) => {
                record.fail(now, err.to_string());
                (false, false)
            }
            BodyOutcome::Panicked(msg) => {
                record.fail(now, format!("task panicked: {msg}"));
                (false, true)
            }
        };
        let error = record.task.error_message.clone();
        state.running -= 1;

        if succeeded {
            tracing::info!(task_id = %task_id, worker_id = %worker_id, elapsed_ms, "task completed");
            self.audit.record(
                AuditEvent::TaskCompleted,
                json!({
                    "task_id": task_id,
                    "worker_id": worker_id,
                    "duration_ms": elapsed_ms,
                }),
            );
            for waiting in state.graph.get_waiting_tasks(task_id) {
                state.graph.remove_dependency(waiting, task_id);
            }
            self.workers.mark_idle(&worker_id, task_id).await;
        } else {
            tracing::warn!(
                task_id = %task_id,
                worker_id = %worker_id,
                elapsed_ms,
                error = error.as_deref().unwrap_or_default(),
                "task failed"
            );
            self.audit.record(
                AuditEvent::TaskFailed,
                json!({
                    "task_id": task_id,
                    "worker_id": worker_id,
                    "duration_ms": elapsed_ms,
                    "error": error,
                }),
            );
            self.cancel_dependents(state, task_id, now);
            if panicked {
                self.workers.mark_error(&worker_id, task_id).await;
            } else {
                self.workers.mark_idle(&worker_id, task_id).await;
            }
        }

        drop(guard);
        self.settled.send_modify(|n| *n += 1);
        self.wake.notify_one();
    }

    /// Cancel a freshly submitted task whose dependencies can never complete.
    fn cancel_unsatisfiable(
        &self,
        state: &mut SchedulerState,
        task_id: TaskId,
        reason: String,
        now: DateTime<Utc>,
    ) {
        if let Some(record) = state.records.get_mut(&task_id) {
            let key = record.queue_key();
            if record.cancel(now, Some(reason.clone())) {
                state.pending.remove(&key);
                state.graph.remove_task(task_id);
                tracing::warn!(task_id = %task_id, reason = %reason, "task cancelled");
                self.audit.record(
                    AuditEvent::TaskCancelled,
                    json!({
                        "task_id": task_id,
                        "previous_status": TaskStatus::Pending,
                        "reason": "dependency_unsatisfiable",
                        "detail": reason,
                    }),
                );
            }
        }
    }

    /// Cancel everything that (transitively) waits for `root`, which will never
    /// complete.
    fn cancel_dependents(&self, state: &mut SchedulerState, root: TaskId, now: DateTime<Utc>) {
        let mut frontier = vec![root];
        while let Some(ended) = frontier.pop() {
            for waiting in state.graph.get_waiting_tasks(ended) {
                let reason = format!("dependency {ended} did not complete");
                self.cancel_unsatisfiable(state, waiting, reason, now);
                frontier.push(waiting);
            }
            state.graph.remove_task(ended);
        }
    }
}
