//! # Audit Writer
//!
//! Shared ring buffer plus the background thread that drains the audit queue
//! and persists snapshots.
//!
//! ```text
//!   Validator ──┐
//!   Validator ──┼──> [bounded channel] ──> [audit-writer thread] ──> ring ──> store
//!   Ban system ─┘       (try_send)            (single writer)        (snapshot)
//! ```
//!
//! Producers never block: a full queue drops the event and counts it. The
//! writer coalesces every message it can drain into at most one snapshot
//! write per wake-up.

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use daddeck_core::{Namespace, Severity, SharedClock, SharedStore, StoreError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use super::entry::{AuditAction, AuditEntry};
use super::AuditConfig;

/// Namespace of the persisted audit snapshot.
pub(crate) const AUDIT_NAMESPACE: Namespace = Namespace::new("audit", 1);

/// Key of the snapshot inside [`AUDIT_NAMESPACE`].
pub(crate) const SNAPSHOT_KEY: &str = "entries";

/// Messages understood by the writer thread.
pub(crate) enum WriterMessage {
    /// Append a queued entry.
    Append(AuditEntry),
    /// The ring changed; write a snapshot.
    Persist,
    /// Reply once everything queued before this message has landed.
    Flush(Sender<()>),
    /// Write a final snapshot and exit.
    Shutdown,
}

/// Counters describing the writer's health.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AuditWriterStats {
    /// Events dropped because the queue was full.
    pub dropped: u64,
    /// Entries evicted from the ring to make room.
    pub evicted: u64,
    /// Successful snapshot writes.
    pub snapshots: u64,
    /// Snapshot writes that failed even after halving.
    pub persist_failures: u64,
}

/// State shared by the logger, its sinks and the writer thread.
pub(crate) struct AuditShared {
    pub(crate) config: AuditConfig,
    pub(crate) entries: Mutex<VecDeque<AuditEntry>>,
    pub(crate) store: Option<SharedStore>,
    pub(crate) clock: SharedClock,
    sequence: AtomicU64,
    degraded: AtomicBool,
    dropped: AtomicU64,
    evicted: AtomicU64,
    snapshots: AtomicU64,
    persist_failures: AtomicU64,
}

impl AuditShared {
    pub(crate) fn new(
        config: AuditConfig,
        entries: VecDeque<AuditEntry>,
        store: Option<SharedStore>,
        clock: SharedClock,
    ) -> Self {
        // Continue past restored ids so a restart never reuses one.
        let next_sequence = entries
            .iter()
            .filter_map(|e| e.id.rsplit('-').next()?.parse::<u64>().ok())
            .max()
            .map_or(0, |seq| seq + 1);
        Self {
            config,
            entries: Mutex::new(entries),
            store,
            clock,
            sequence: AtomicU64::new(next_sequence),
            degraded: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
            evicted: AtomicU64::new(0),
            snapshots: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
        }
    }

    /// Builds an entry stamped with the current time and a fresh id.
    pub(crate) fn make_entry(
        &self,
        action: AuditAction,
        identifier: String,
        severity: Severity,
        details: serde_json::Value,
    ) -> AuditEntry {
        let timestamp = self.clock.now();
        AuditEntry {
            id: self.next_id(timestamp),
            timestamp,
            action,
            identifier,
            severity,
            details,
        }
    }

    fn next_id(&self, timestamp: DateTime<Utc>) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("audit-{:x}-{seq:06}", timestamp.timestamp_millis())
    }

    /// Appends to the ring, evicting the oldest entry when full.
    pub(crate) fn append(&self, entry: AuditEntry) {
        let capacity = self.config.capacity.max(1);
        let mut entries = self.entries.lock();
        while entries.len() >= capacity {
            entries.pop_front();
            self.evicted.fetch_add(1, Ordering::Relaxed);
        }
        entries.push_back(entry);
    }

    pub(crate) fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stats(&self) -> AuditWriterStats {
        AuditWriterStats {
            dropped: self.dropped.load(Ordering::Relaxed),
            evicted: self.evicted.load(Ordering::Relaxed),
            snapshots: self.snapshots.load(Ordering::Relaxed),
            persist_failures: self.persist_failures.load(Ordering::Relaxed),
        }
    }

    /// Writes a snapshot of the ring.
    ///
    /// When the store is out of space the ring is halved (oldest half dropped)
    /// and the write is retried once. Any other failure, or a second one, is
    /// counted and warned about once; it is never reported to whoever caused
    /// the write. Entries are kept in memory while the store is unreachable.
    pub(crate) fn persist(&self) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if !self.config.persist {
            return;
        }

        let snapshot: Vec<AuditEntry> = self.entries.lock().iter().cloned().collect();
        let first = match AUDIT_NAMESPACE.save_json(store.as_ref(), SNAPSHOT_KEY, &snapshot) {
            Ok(()) => {
                self.on_persisted();
                return;
            }
            Err(err @ StoreError::QuotaExceeded { .. }) => err,
            Err(err) => {
                self.on_failed(&err);
                return;
            }
        };

        let halved: Vec<AuditEntry> = {
            let mut entries = self.entries.lock();
            let drop_count = entries.len() - entries.len() / 2;
            entries.drain(..drop_count);
            self.evicted.fetch_add(drop_count as u64, Ordering::Relaxed);
            entries.iter().cloned().collect()
        };
        tracing::debug!(
            error = %first,
            retained = halved.len(),
            "audit snapshot rejected, retrying with half the entries"
        );

        match AUDIT_NAMESPACE.save_json(store.as_ref(), SNAPSHOT_KEY, &halved) {
            Ok(()) => self.on_persisted(),
            Err(second) => self.on_failed(&second),
        }
    }

    fn on_failed(&self, err: &StoreError) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
        if !self.degraded.swap(true, Ordering::AcqRel) {
            tracing::warn!(
                error = %err,
                "audit log persistence unavailable, keeping entries in memory only"
            );
        }
    }

    fn on_persisted(&self) {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
        if self.degraded.swap(false, Ordering::AcqRel) {
            tracing::info!("audit log persistence recovered");
        }
    }
}

/// Writer thread main loop.
pub(crate) fn writer_loop(shared: Arc<AuditShared>, rx: Receiver<WriterMessage>) {
    let mut replies: Vec<Sender<()>> = Vec::new();

    while let Ok(first) = rx.recv() {
        let mut dirty = false;
        let mut shutdown = false;

        for message in std::iter::once(first).chain(rx.try_iter()) {
            match message {
                WriterMessage::Append(entry) => {
                    shared.append(entry);
                    dirty = true;
                }
                WriterMessage::Persist => dirty = true,
                WriterMessage::Flush(reply) => replies.push(reply),
                WriterMessage::Shutdown => {
                    shutdown = true;
                    break;
                }
            }
        }

        if dirty {
            shared.persist();
        }
        for reply in replies.drain(..) {
            let _ = reply.send(());
        }
        if shutdown {
            break;
        }
    }
}

/// Cloneable, non-blocking handle for submitting audit events.
///
/// This is what the validator holds. [`AuditSink::submit`] never waits for
/// the writer and never fails the caller.
#[derive(Clone)]
pub struct AuditSink {
    shared: Arc<AuditShared>,
    tx: Sender<WriterMessage>,
}

impl AuditSink {
    pub(crate) fn new(shared: Arc<AuditShared>, tx: Sender<WriterMessage>) -> Self {
        Self { shared, tx }
    }

    /// Queues an event for the writer thread.
    ///
    /// Returns false if the queue was full and the event was dropped. If the
    /// writer is gone the entry is appended in place (without persistence).
    pub fn submit(
        &self,
        action: AuditAction,
        details: serde_json::Value,
        severity: Severity,
        identifier: &str,
    ) -> bool {
        let entry = self.shared.make_entry(
            action,
            daddeck_core::normalize_identifier(identifier),
            severity,
            details,
        );
        match self.tx.try_send(WriterMessage::Append(entry)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.shared.record_drop();
                tracing::debug!("audit queue full, dropping event");
                false
            }
            Err(TrySendError::Disconnected(WriterMessage::Append(entry))) => {
                self.shared.append(entry);
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Number of events waiting for the writer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.tx.len()
    }
}

impl std::fmt::Debug for AuditSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditSink")
            .field("pending", &self.tx.len())
            .finish()
    }
}
