//! Append-only audit log shared by the scheduler, the worker registry and the sandbox.

use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::domain::{AuditEntry, AuditEvent};
use crate::ports::{Clock, SystemClock};

const LIVE_FEED_CAPACITY: usize = 256;

/// In-memory audit log.
///
/// Entries are never mutated or removed except by `clear()`. Appends are
/// synchronous and cheap so they can happen while a component holds its own lock.
pub struct AuditLog {
    entries: Mutex<Vec<AuditEntry>>,
    clock: Arc<dyn Clock>,
    live: broadcast::Sender<AuditEntry>,
}

impl AuditLog {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let (live, _) = broadcast::channel(LIVE_FEED_CAPACITY);
        Self {
            entries: Mutex::new(Vec::new()),
            clock,
            live,
        }
    }

    /// Append one entry and fan it out to live subscribers.
    pub fn record(&self, event: AuditEvent, data: serde_json::Value) -> AuditEntry {
        let entry = AuditEntry {
            timestamp: self.clock.now(),
            event_type: event,
            data,
        };
        tracing::debug!(target: "quill::audit", event = %event, data = %entry.data, "audit");

        self.entries.lock().push(entry.clone());
        // No subscribers is fine.
        let _ = self.live.send(entry.clone());
        entry
    }

    /// The most recent `limit` entries, oldest first.
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let entries = self.entries.lock();
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }

    pub fn entries_of(&self, event: AuditEvent) -> Vec<AuditEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.event_type == event)
            .cloned()
            .collect()
    }

    pub fn count_of(&self, event: AuditEvent) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.event_type == event)
            .count()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Bulk clear. Returns how many entries were dropped.
    pub fn clear(&self) -> usize {
        let mut entries = self.entries.lock();
        let n = entries.len();
        entries.clear();
        n
    }

    /// Live feed of entries appended from now on.
    ///
    /// Slow receivers lag and lose the oldest entries (see `broadcast`); the log
    /// itself keeps everything.
    pub fn subscribe(&self) -> broadcast::Receiver<AuditEntry> {
        self.live.subscribe()
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new()
    }
}
