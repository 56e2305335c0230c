//! # Audit Logger
//!
//! Append-only, capacity-bounded record of everything the guard decided.
//!
//! ## Guarantees
//!
//! 1. **Bounded**: a ring buffer of `capacity` entries; the oldest entry is
//!    evicted silently when a new one arrives.
//! 2. **Never fails the caller**: persistence runs on a writer thread; on a
//!    rejected write the ring is halved and the write retried once, then
//!    given up on.
//! 3. **Flat export**: a JSON array of `{id, timestamp, action, identifier,
//!    severity, details}` that imports back field-for-field.
//!
//! ## Two ways in
//!
//! - [`AuditLogger::log`] appends synchronously and returns the entry (ban
//!   transitions use this).
//! - [`AuditSink::submit`] enqueues and returns immediately (the validator
//!   uses this).

mod entry;
mod writer;

pub use entry::{AuditAction, AuditEntry};
pub use writer::{AuditSink, AuditWriterStats};

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Sender};
use daddeck_core::{normalize_identifier, system_clock, Severity, SharedClock, SharedStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::SecurityResult;
use writer::{writer_loop, AuditShared, WriterMessage, AUDIT_NAMESPACE, SNAPSHOT_KEY};

/// How long [`AuditLogger::flush`] waits for the writer.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// Configuration for the audit logger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Maximum retained entries.
    pub capacity: usize,
    /// Maximum events waiting for the writer before new ones are dropped.
    pub queue_capacity: usize,
    /// Length of the top-offender ranking in [`AuditStats`].
    pub top_offenders: usize,
    /// Whether snapshots are written to the store at all.
    pub persist: bool,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            capacity: 1000,
            queue_capacity: 4096,
            top_offenders: 10,
            persist: true,
        }
    }
}

/// Filter for [`AuditLogger::query`]. Unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditQuery {
    /// Exact severity.
    pub severity: Option<Severity>,
    /// Minimum severity (inclusive).
    pub min_severity: Option<Severity>,
    /// Exact action.
    pub action: Option<AuditAction>,
    /// Exact (normalized) identifier.
    pub identifier: Option<String>,
    /// Earliest timestamp (inclusive).
    pub since: Option<DateTime<Utc>>,
    /// Latest timestamp (inclusive).
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of results.
    pub limit: Option<usize>,
}

impl AuditQuery {
    /// Matches everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Only entries of exactly this severity.
    #[must_use]
    pub fn severity(mut self, severity: Severity) -> Self {
        self.severity = Some(severity);
        self
    }

    /// Only entries at least this severe.
    #[must_use]
    pub fn at_least(mut self, severity: Severity) -> Self {
        self.min_severity = Some(severity);
        self
    }

    /// Only entries with this action.
    #[must_use]
    pub fn action(mut self, action: impl Into<AuditAction>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Only entries for this identifier (normalized first).
    #[must_use]
    pub fn identifier(mut self, identifier: &str) -> Self {
        self.identifier = Some(normalize_identifier(identifier));
        self
    }

    /// Only entries inside `[since, until]`.
    #[must_use]
    pub fn between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// At most `limit` results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Returns true if `entry` passes every set filter.
    #[must_use]
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.severity.map_or(true, |s| entry.severity == s)
            && self.min_severity.map_or(true, |s| entry.severity >= s)
            && self.action.as_ref().map_or(true, |a| &entry.action == a)
            && self.identifier.as_ref().map_or(true, |i| &entry.identifier == i)
            && self.since.map_or(true, |t| entry.timestamp >= t)
            && self.until.map_or(true, |t| entry.timestamp <= t)
    }
}

/// An identifier ranked by violation count.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Offender {
    /// Normalized identifier.
    pub identifier: String,
    /// Number of violation entries.
    pub violations: usize,
    /// Most severe violation seen.
    pub worst: Severity,
    /// Timestamp of the latest violation.
    pub last_seen: DateTime<Utc>,
}

/// Aggregate view over the retained entries.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AuditStats {
    /// Retained entries.
    pub total: usize,
    /// Count per severity.
    pub by_severity: BTreeMap<Severity, usize>,
    /// Count per action name.
    pub by_action: BTreeMap<String, usize>,
    /// Count per identifier.
    pub by_identifier: BTreeMap<String, usize>,
    /// Identifiers with the most violations, worst first.
    pub top_offenders: Vec<Offender>,
    /// Oldest retained timestamp.
    pub oldest: Option<DateTime<Utc>>,
    /// Newest retained timestamp.
    pub newest: Option<DateTime<Utc>>,
}

/// The audit logger.
pub struct AuditLogger {
    shared: Arc<AuditShared>,
    tx: Sender<WriterMessage>,
    writer: Option<JoinHandle<()>>,
}

impl AuditLogger {
    /// In-memory logger on the system clock.
    #[must_use]
    pub fn new(config: AuditConfig) -> Self {
        Self::open(config, None, system_clock())
    }

    /// Logger backed by `store`, restoring any previous snapshot.
    ///
    /// A missing or unreadable snapshot starts an empty log (with a warning
    /// for the unreadable case).
    #[must_use]
    pub fn open(config: AuditConfig, store: Option<SharedStore>, clock: SharedClock) -> Self {
        let mut restored: VecDeque<AuditEntry> = VecDeque::new();
        if let Some(store) = store.as_ref() {
            match AUDIT_NAMESPACE.load_json::<Vec<AuditEntry>>(store.as_ref(), SNAPSHOT_KEY) {
                Ok(Some(entries)) => restored = entries.into(),
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "could not restore audit snapshot, starting empty");
                }
            }
        }
        let capacity = config.capacity.max(1);
        while restored.len() > capacity {
            restored.pop_front();
        }
        if !restored.is_empty() {
            tracing::info!(entries = restored.len(), "restored audit log");
        }

        let (tx, rx) = bounded(config.queue_capacity.max(1));
        let shared = Arc::new(AuditShared::new(config, restored, store, clock));

        let writer_shared = Arc::clone(&shared);
        let writer = thread::Builder::new()
            .name("audit-writer".to_string())
            .spawn(move || writer_loop(writer_shared, rx));
        let writer = match writer {
            Ok(handle) => Some(handle),
            Err(err) => {
                // The receiver went down with the closure; sinks fall back to
                // appending in place.
                tracing::warn!(error = %err, "could not start audit writer thread");
                None
            }
        };

        Self { shared, tx, writer }
    }

    /// Logs an event synchronously and returns the stored entry.
    ///
    /// The snapshot write is handed to the writer thread.
    pub fn log(
        &self,
        action: impl Into<AuditAction>,
        details: serde_json::Value,
        severity: Severity,
        identifier: &str,
    ) -> AuditEntry {
        let entry = self.shared.make_entry(
            action.into(),
            normalize_identifier(identifier),
            severity,
            details,
        );
        self.shared.append(entry.clone());
        self.request_persist();
        entry
    }

    /// A non-blocking submission handle.
    #[must_use]
    pub fn sink(&self) -> AuditSink {
        AuditSink::new(Arc::clone(&self.shared), self.tx.clone())
    }

    /// Waits until everything queued so far has been appended and persisted.
    pub fn flush(&self) {
        let (reply_tx, reply_rx) = bounded(1);
        if self.tx.send(WriterMessage::Flush(reply_tx)).is_ok() {
            let _ = reply_rx.recv_timeout(FLUSH_TIMEOUT);
        }
    }

    /// Retained entries matching `query`, newest first.
    #[must_use]
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditEntry> {
        let entries = self.shared.entries.lock();
        let matching = entries.iter().rev().filter(|e| query.matches(e)).cloned();
        match query.limit {
            Some(limit) => matching.take(limit).collect(),
            None => matching.collect(),
        }
    }

    /// Entries of exactly `severity`, newest first.
    #[must_use]
    pub fn by_severity(&self, severity: Severity) -> Vec<AuditEntry> {
        self.query(&AuditQuery::new().severity(severity))
    }

    /// Entries with `action`, newest first.
    #[must_use]
    pub fn by_action(&self, action: impl Into<AuditAction>) -> Vec<AuditEntry> {
        self.query(&AuditQuery::new().action(action))
    }

    /// Entries for `identifier`, newest first.
    #[must_use]
    pub fn by_identifier(&self, identifier: &str) -> Vec<AuditEntry> {
        self.query(&AuditQuery::new().identifier(identifier))
    }

    /// Entries inside `[since, until]`, newest first.
    #[must_use]
    pub fn in_range(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Vec<AuditEntry> {
        self.query(&AuditQuery::new().between(since, until))
    }

    /// The `count` newest entries, newest first.
    #[must_use]
    pub fn recent(&self, count: usize) -> Vec<AuditEntry> {
        self.query(&AuditQuery::new().limit(count))
    }

    /// All retained entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.shared.entries.lock().iter().cloned().collect()
    }

    /// Number of retained entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.shared.entries.lock().len()
    }

    /// Returns true if nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shared.entries.lock().is_empty()
    }

    /// Configured capacity.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.shared.config.capacity.max(1)
    }

    /// Drops every retained entry.
    pub fn clear(&self) {
        self.shared.entries.lock().clear();
        self.request_persist();
    }

    /// Writer health counters.
    #[must_use]
    pub fn writer_stats(&self) -> AuditWriterStats {
        self.shared.stats()
    }

    /// Aggregate statistics over the retained entries.
    #[must_use]
    pub fn stats(&self) -> AuditStats {
        let entries = self.shared.entries.lock();
        let mut stats = AuditStats {
            total: entries.len(),
            ..AuditStats::default()
        };
        let mut offenders: HashMap<&str, Offender> = HashMap::new();

        for entry in entries.iter() {
            *stats.by_severity.entry(entry.severity).or_insert(0) += 1;
            *stats.by_action.entry(entry.action.to_string()).or_insert(0) += 1;
            *stats.by_identifier.entry(entry.identifier.clone()).or_insert(0) += 1;
            stats.oldest = Some(stats.oldest.map_or(entry.timestamp, |t| t.min(entry.timestamp)));
            stats.newest = Some(stats.newest.map_or(entry.timestamp, |t| t.max(entry.timestamp)));

            if entry.action.is_violation() {
                let offender = offenders
                    .entry(entry.identifier.as_str())
                    .or_insert_with(|| Offender {
                        identifier: entry.identifier.clone(),
                        violations: 0,
                        worst: entry.severity,
                        last_seen: entry.timestamp,
                    });
                offender.violations += 1;
                offender.worst = offender.worst.max(entry.severity);
                offender.last_seen = offender.last_seen.max(entry.timestamp);
            }
        }

        let mut ranked: Vec<Offender> = offenders.into_values().collect();
        ranked.sort_by(|a, b| {
            b.violations
                .cmp(&a.violations)
                .then(b.worst.cmp(&a.worst))
                .then(b.last_seen.cmp(&a.last_seen))
                .then(a.identifier.cmp(&b.identifier))
        });
        ranked.truncate(self.shared.config.top_offenders);
        stats.top_offenders = ranked;
        stats
    }

    /// Exports every retained entry as a flat JSON array, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn export_json(&self) -> SecurityResult<String> {
        let entries = self.entries();
        Ok(serde_json::to_string_pretty(&entries)?)
    }

    /// Merges an exported JSON array into the log.
    ///
    /// Entries whose id is already present are skipped. The merged log is
    /// ordered by timestamp and trimmed to the newest `capacity` entries.
    /// Returns the number of imported entries still held after trimming.
    ///
    /// # Errors
    ///
    /// Returns an error if `json` is not an array of audit entries; the log is
    /// left untouched in that case.
    pub fn import_json(&self, json: &str) -> SecurityResult<usize> {
        let incoming: Vec<AuditEntry> = serde_json::from_str(json)?;
        let added = {
            let mut entries = self.shared.entries.lock();
            let known: HashSet<String> = entries.iter().map(|e| e.id.clone()).collect();
            let mut fresh: HashSet<String> = HashSet::new();
            let mut merged: Vec<AuditEntry> = entries.drain(..).collect();
            merged.extend(
                incoming
                    .into_iter()
                    .filter(|e| !known.contains(&e.id) && fresh.insert(e.id.clone())),
            );

            merged.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
            let excess = merged.len().saturating_sub(self.capacity());
            entries.extend(merged.into_iter().skip(excess));
            entries.iter().filter(|e| fresh.contains(&e.id)).count()
        };
        self.request_persist();
        Ok(added)
    }

    fn request_persist(&self) {
        // A full queue already holds work that will trigger a snapshot.
        let _ = self.tx.try_send(WriterMessage::Persist);
    }
}

impl Default for AuditLogger {
    fn default() -> Self {
        Self::new(AuditConfig::default())
    }
}

impl Drop for AuditLogger {
    fn drop(&mut self) {
        if let Some(handle) = self.writer.take() {
            let _ = self.tx.send(WriterMessage::Shutdown);
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("entries", &self.len())
            .field("capacity", &self.capacity())
            .field("pending", &self.tx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use daddeck_core::{Clock, KeyValueStore, ManualClock, MemoryStore};
    use serde_json::json;

    fn logger_with_clock(capacity: usize) -> (AuditLogger, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::starting_now());
        let config = AuditConfig { capacity, ..AuditConfig::default() };
        (AuditLogger::open(config, None, clock.clone()), clock)
    }

    #[test]
    fn test_log_returns_stored_entry() {
        let (logger, _) = logger_with_clock(10);
        let entry = logger.log(
            AuditAction::BanApplied,
            json!({"reason": "test"}),
            Severity::High,
            " Device-A ",
        );
        assert_eq!(entry.identifier, "device-a");
        assert_eq!(logger.entries(), vec![entry]);
    }

    #[test]
    fn test_ring_evicts_oldest() {
        let (logger, clock) = logger_with_clock(3);
        for i in 0..5 {
            clock.advance_ms(10);
            logger.log(AuditAction::PackFlagged, json!({ "i": i }), Severity::Low, "x");
        }
        let kept: Vec<i64> = logger
            .entries()
            .iter()
            .map(|e| e.details["i"].as_i64().unwrap())
            .collect();
        assert_eq!(kept, vec![2, 3, 4]);
        assert_eq!(logger.writer_stats().evicted, 2);
    }

    #[test]
    fn test_query_filters_combine() {
        let (logger, clock) = logger_with_clock(100);
        let start = clock.now();
        logger.log(AuditAction::PackRejected, json!({}), Severity::Critical, "a");
        clock.advance_ms(1000);
        logger.log(AuditAction::PackFlagged, json!({}), Severity::Low, "a");
        clock.advance_ms(1000);
        logger.log(AuditAction::PackRejected, json!({}), Severity::Critical, "b");

        assert_eq!(logger.by_identifier("A").len(), 2);
        assert_eq!(logger.by_severity(Severity::Critical).len(), 2);
        assert_eq!(logger.by_action("pack_flagged").len(), 1);
        assert_eq!(logger.in_range(start, start + chrono::Duration::milliseconds(1500)).len(), 2);

        let q = AuditQuery::new()
            .action(AuditAction::PackRejected)
            .identifier("b")
            .at_least(Severity::High);
        let hits = logger.query(&q);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].identifier, "b");

        let recent = logger.recent(1);
        assert_eq!(recent[0].identifier, "b");
    }

    #[test]
    fn test_stats_rank_offenders() {
        let (logger, clock) = logger_with_clock(100);
        for _ in 0..3 {
            clock.advance_ms(1);
            logger.log(AuditAction::PackRejected, json!({}), Severity::Critical, "cheater");
        }
        logger.log(AuditAction::RateLimitExceeded, json!({}), Severity::Medium, "spammer");
        logger.log(AuditAction::BanApplied, json!({}), Severity::High, "cheater");

        let stats = logger.stats();
        assert_eq!(stats.total, 5);
        assert_eq!(stats.by_severity[&Severity::Critical], 3);
        assert_eq!(stats.by_action["ban_applied"], 1);
        assert_eq!(stats.by_identifier["cheater"], 4);
        assert_eq!(stats.top_offenders.len(), 2);
        assert_eq!(stats.top_offenders[0].identifier, "cheater");
        assert_eq!(stats.top_offenders[0].violations, 3);
        assert_eq!(stats.top_offenders[0].worst, Severity::Critical);
        assert_eq!(stats.top_offenders[1].identifier, "spammer");
    }

    #[test]
    fn test_sink_is_drained_by_writer() {
        let (logger, _) = logger_with_clock(100);
        let sink = logger.sink();
        assert!(sink.submit(AuditAction::PackFlagged, json!({"n": 1}), Severity::Low, "z"));
        logger.flush();
        assert_eq!(logger.by_identifier("z").len(), 1);
    }

    #[test]
    fn test_snapshot_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        {
            let logger = AuditLogger::open(AuditConfig::default(), Some(store.clone()), clock.clone());
            logger.log(AuditAction::BanApplied, json!({"d": 7}), Severity::High, "p");
            logger.flush();
        }
        let reopened = AuditLogger::open(AuditConfig::default(), Some(store), clock);
        assert_eq!(reopened.len(), 1);
        assert_eq!(reopened.entries()[0].details["d"], 7);

        let next = reopened.log(AuditAction::BanLifted, json!({}), Severity::Medium, "p");
        assert_ne!(next.id, reopened.entries()[0].id);
    }

    #[test]
    fn test_quota_failure_halves_and_never_fails_caller() {
        // Big enough for a handful of entries, too small for twenty.
        let store = Arc::new(MemoryStore::with_quota(2_500));
        let clock = Arc::new(ManualClock::starting_now());
        let logger = AuditLogger::open(AuditConfig::default(), Some(store.clone()), clock);

        for i in 0..20 {
            logger.log(AuditAction::PackFlagged, json!({ "i": i }), Severity::Low, "q");
        }
        logger.flush();

        assert!(logger.len() < 20);
        assert!(!logger.is_empty());
        assert!(store.get("audit/v1/entries").unwrap().is_some());
    }

    #[test]
    fn test_offline_store_is_silent() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let clock = Arc::new(ManualClock::starting_now());
        let logger = AuditLogger::open(AuditConfig::default(), Some(store), clock);

        for i in 0..50 {
            logger.log(AuditAction::PackFlagged, json!({ "i": i }), Severity::Low, "q");
        }
        logger.flush();

        assert!(logger.writer_stats().persist_failures >= 1);
        assert_eq!(logger.writer_stats().evicted, 0);
        assert_eq!(logger.len(), 50);
    }

    #[test]
    fn test_import_skips_known_ids_and_trims() {
        let (source, clock) = logger_with_clock(10);
        for i in 0..4 {
            clock.advance_ms(5);
            source.log(AuditAction::PackFlagged, json!({ "i": i }), Severity::Low, "s");
        }
        let exported = source.export_json().unwrap();

        let (target, _) = logger_with_clock(3);
        assert_eq!(target.import_json(&exported).unwrap(), 3);
        assert_eq!(target.len(), 3);
        assert_eq!(target.entries()[0].details["i"], 1);

        // Entry 0 was trimmed away and is older than everything held, so
        // importing it again keeps nothing new.
        assert_eq!(target.import_json(&exported).unwrap(), 0);
        assert!(target.import_json("{not json").is_err());
        assert_eq!(target.len(), 3);
        assert_eq!(target.entries()[0].details["i"], 1);
    }
}
