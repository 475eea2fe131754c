//! Worker registry.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;

use crate::audit::AuditLog;
use crate::domain::{AuditEvent, QuillError, TaskId, Worker, WorkerId, WorkerStatus};
use crate::observability::WorkerCounts;
use crate::ports::{Clock, SystemClock, TaskExecutor};

struct WorkerEntry {
    worker: Worker,
    executor: Arc<dyn TaskExecutor>,

    /// Tasks currently running on this worker.
    running: BTreeSet<TaskId>,

    /// A task panicked since the worker last drained.
    failed: bool,
}

impl WorkerEntry {
    fn sync_running(&mut self) {
        self.worker.active_tasks = self.running.len();
        self.worker.current_task_id = self.running.iter().next_back().copied();
    }
}

/// Registered workers and their live status.
///
/// Callers register and unregister; status changes (`mark_*`) come only from
/// the scheduler.
pub struct WorkerRegistry {
    workers: RwLock<HashMap<WorkerId, WorkerEntry>>,
    audit: Arc<AuditLog>,
    clock: Arc<dyn Clock>,
}

impl WorkerRegistry {
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self::with_clock(audit, Arc::new(SystemClock))
    }

    pub fn with_clock(audit: Arc<AuditLog>, clock: Arc<dyn Clock>) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            audit,
            clock,
        }
    }

    /// Insert or replace a worker. The new entry always starts Idle.
    pub async fn register<I, S>(
        &self,
        worker_id: impl Into<WorkerId>,
        kind: impl Into<String>,
        capabilities: I,
        executor: Arc<dyn TaskExecutor>,
    ) -> Worker
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let worker_id = worker_id.into();
        let capabilities: BTreeSet<String> = capabilities.into_iter().map(Into::into).collect();
        let worker = Worker::new(worker_id.clone(), kind, capabilities, self.clock.now());

        let replaced = self
            .workers
            .write()
            .await
            .insert(
                worker_id.clone(),
                WorkerEntry {
                    worker: worker.clone(),
                    executor,
                    running: BTreeSet::new(),
                    failed: false,
                },
            )
            .is_some();

        tracing::info!(worker_id = %worker_id, kind = %worker.kind, replaced, "worker registered");
        self.audit.record(
            AuditEvent::WorkerRegistered,
            json!({
                "worker_id": worker_id,
                "kind": worker.kind,
                "capabilities": worker.capabilities,
                "replaced": replaced,
            }),
        );
        worker
    }

    /// Remove a worker. Unknown ids are a no-op.
    pub async fn unregister(&self, worker_id: &WorkerId) -> bool {
        let removed = self.workers.write().await.remove(worker_id).is_some();
        if removed {
            tracing::info!(worker_id = %worker_id, "worker unregistered");
            self.audit
                .record(AuditEvent::WorkerUnregistered, json!({ "worker_id": worker_id }));
        }
        removed
    }

    pub async fn get_status(&self, worker_id: &WorkerId) -> Result<Worker, QuillError> {
        self.workers
            .read()
            .await
            .get(worker_id)
            .map(|e| e.worker.clone())
            .ok_or_else(|| QuillError::UnknownWorker(worker_id.clone()))
    }

    pub async fn contains(&self, worker_id: &WorkerId) -> bool {
        self.workers.read().await.contains_key(worker_id)
    }

    /// All workers, ordered by id.
    pub async fn list(&self) -> Vec<Worker> {
        let mut workers: Vec<Worker> = self
            .workers
            .read()
            .await
            .values()
            .map(|e| e.worker.clone())
            .collect();
        workers.sort_by(|a, b| a.worker_id.cmp(&b.worker_id));
        workers
    }

    /// Workers advertising `capability`, ordered by id.
    pub async fn with_capability(&self, capability: &str) -> Vec<Worker> {
        let mut workers = self.list().await;
        workers.retain(|w| w.has_capability(capability));
        workers
    }

    pub async fn len(&self) -> usize {
        self.workers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.workers.read().await.is_empty()
    }

    pub async fn counts(&self) -> WorkerCounts {
        let mut counts = WorkerCounts::default();
        for entry in self.workers.read().await.values() {
            counts.add(entry.worker.status);
        }
        counts
    }

    pub(crate) async fn executor(&self, worker_id: &WorkerId) -> Option<Arc<dyn TaskExecutor>> {
        self.workers
            .read()
            .await
            .get(worker_id)
            .map(|e| Arc::clone(&e.executor))
    }

    pub(crate) async fn mark_busy(&self, worker_id: &WorkerId, task_id: TaskId) {
        let now = self.clock.now();
        if let Some(entry) = self.workers.write().await.get_mut(worker_id) {
            entry.running.insert(task_id);
            entry.sync_running();
            entry.worker.status = WorkerStatus::Busy;
            entry.worker.last_activity_at = now;
        }
    }

    /// Release the worker from `task_id`.
    ///
    /// The worker stays Busy while any other task is still running on it.
    pub(crate) async fn mark_idle(&self, worker_id: &WorkerId, task_id: TaskId) {
        self.release(worker_id, task_id, WorkerStatus::Idle).await;
    }

    /// Like `mark_idle`, but the worker ends up in Error once its last
    /// running task is released.
    pub(crate) async fn mark_error(&self, worker_id: &WorkerId, task_id: TaskId) {
        self.release(worker_id, task_id, WorkerStatus::Error).await;
    }

    async fn release(&self, worker_id: &WorkerId, task_id: TaskId, status: WorkerStatus) {
        let now = self.clock.now();
        let mut workers = self.workers.write().await;
        let Some(entry) = workers.get_mut(worker_id) else {
            return;
        };
        if !entry.running.remove(&task_id) {
            return;
        }
        entry.sync_running();
        entry.worker.last_activity_at = now;
        if status == WorkerStatus::Error {
            entry.failed = true;
        }
        if entry.running.is_empty() {
            entry.worker.status = if entry.failed {
                WorkerStatus::Error
            } else {
                WorkerStatus::Idle
            };
            entry.failed = false;
        }
    }

    /// Called on scheduler shutdown.
    pub(crate) async fn complete_idle_workers(&self) {
        let now = self.clock.now();
        for entry in self.workers.write().await.values_mut() {
            if entry.worker.status == WorkerStatus::Idle {
                entry.worker.status = WorkerStatus::Completed;
                entry.worker.last_activity_at = now;
            }
        }
    }
}
