//! # Ban System
//!
//! Threshold-driven bans over violation severity.
//!
//! ## Rules
//!
//! - At most one effectively active ban per identifier.
//! - A permanent ban is never replaced by a temporary one.
//! - A temporary ban over an active temporary ban keeps the later expiry.
//! - Records are never deleted; they are deactivated and kept as history.
//! - Expiry is lazy: the first read after `expires_at` deactivates the ban.
//! - Stored records are never overwritten before they have been read. If the
//!   store is down at startup, every call retries the load and merges what it
//!   finds into the in-memory ledger before anything is written back.
//!
//! Every transition is written to the audit log when one is attached.

mod policy;

pub use policy::{BanPolicy, BanTier};

use chrono::{DateTime, Duration, Utc};
use daddeck_core::{
    normalize_identifier, saturating_add, seconds_until, system_clock, Namespace, Severity,
    SharedClock, SharedStore, StoreError,
};
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::audit::{AuditAction, AuditLogger};
use crate::validation::Violation;

const BAN_NAMESPACE: Namespace = Namespace::new("bans", 1);
const RECORDS_KEY: &str = "records";

/// Identifier used for audit entries about the ban system itself.
const SYSTEM_IDENTIFIER: &str = "system";

/// How long a ban lasts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BanTerm {
    /// Until lifted by an operator.
    Permanent,
    /// Until `expires_at`.
    Temporary {
        /// Expiry time.
        expires_at: DateTime<Utc>,
    },
}

impl BanTerm {
    /// Returns true for a permanent term.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Permanent)
    }

    /// Expiry time of a temporary term.
    #[must_use]
    pub const fn expires_at(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Permanent => None,
            Self::Temporary { expires_at } => Some(*expires_at),
        }
    }
}

/// Why a record stopped being active.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Deactivation {
    /// The temporary term ran out.
    Expired,
    /// An operator lifted the ban.
    Lifted {
        /// Operator's reason.
        reason: String,
    },
    /// A permanent ban replaced this temporary one.
    Superseded,
}

/// One ban, active or historical.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanRecord {
    /// Normalized identifier.
    pub identifier: String,
    /// Why the ban was applied.
    pub reason: String,
    /// Violations that led to it.
    pub violation_ids: Vec<String>,
    /// When it was applied.
    pub created_at: DateTime<Utc>,
    /// Permanent or until a time.
    pub term: BanTerm,
    /// False once deactivated.
    pub active: bool,
    /// When it was deactivated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivated_at: Option<DateTime<Utc>>,
    /// How it was deactivated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deactivation: Option<Deactivation>,
}

impl BanRecord {
    /// Active and, if temporary, not yet expired.
    #[must_use]
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.active && self.term.expires_at().map_or(true, |at| at > now)
    }

    fn deactivate(&mut self, now: DateTime<Utc>, how: Deactivation) {
        self.active = false;
        self.deactivated_at = Some(now);
        self.deactivation = Some(how);
    }
}

/// How to apply a manual ban.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BanOptions {
    /// Ban until lifted.
    pub permanent: bool,
    /// Length of a temporary ban; the policy default when unset.
    pub duration: Option<Duration>,
}

impl BanOptions {
    /// A permanent ban.
    #[must_use]
    pub const fn permanent() -> Self {
        Self { permanent: true, duration: None }
    }

    /// A temporary ban of `duration`.
    #[must_use]
    pub const fn temporary(duration: Duration) -> Self {
        Self { permanent: false, duration: Some(duration) }
    }
}

/// Answer to "is this identifier banned?".
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanStatus {
    /// Normalized identifier.
    pub identifier: String,
    /// Whether requests must be refused.
    pub banned: bool,
    /// Reason of the active ban.
    pub reason: Option<String>,
    /// Whether the active ban is permanent.
    pub permanent: bool,
    /// Expiry of the active temporary ban.
    pub expires_at: Option<DateTime<Utc>>,
    /// When the active ban was applied.
    pub created_at: Option<DateTime<Utc>>,
    /// Violations behind the active ban.
    pub violation_ids: Vec<String>,
}

impl BanStatus {
    fn clear(identifier: String) -> Self {
        Self {
            identifier,
            banned: false,
            reason: None,
            permanent: false,
            expires_at: None,
            created_at: None,
            violation_ids: Vec::new(),
        }
    }

    fn from_record(record: &BanRecord) -> Self {
        Self {
            identifier: record.identifier.clone(),
            banned: true,
            reason: Some(record.reason.clone()),
            permanent: record.term.is_permanent(),
            expires_at: record.term.expires_at(),
            created_at: Some(record.created_at),
            violation_ids: record.violation_ids.clone(),
        }
    }

    /// Whole seconds left on a temporary ban.
    #[must_use]
    pub fn remaining_seconds(&self, now: DateTime<Utc>) -> Option<u64> {
        self.expires_at.map(|at| seconds_until(now, at))
    }
}

/// Counts over every ban record.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BanStats {
    /// Effectively active bans.
    pub active: usize,
    /// Active permanent bans.
    pub permanent: usize,
    /// Active temporary bans.
    pub temporary: usize,
    /// Every record ever created.
    pub total_records: usize,
    /// Records deactivated by expiry.
    pub expired: usize,
    /// Records lifted by an operator.
    pub lifted: usize,
}

/// A transition to write to the audit log once the ledger lock is released.
struct Transition {
    action: AuditAction,
    severity: Severity,
    identifier: String,
    details: serde_json::Value,
}

impl Transition {
    fn applied(record: &BanRecord, extended: bool) -> Self {
        Self {
            action: AuditAction::BanApplied,
            severity: if record.term.is_permanent() { Severity::Critical } else { Severity::High },
            identifier: record.identifier.clone(),
            details: json!({
                "reason": record.reason,
                "permanent": record.term.is_permanent(),
                "expires_at": record.term.expires_at(),
                "violation_ids": record.violation_ids,
                "extended": extended,
            }),
        }
    }

    fn expired(record: &BanRecord) -> Self {
        Self {
            action: AuditAction::BanExpired,
            severity: Severity::Low,
            identifier: record.identifier.clone(),
            details: json!({
                "reason": record.reason,
                "expires_at": record.term.expires_at(),
            }),
        }
    }

    fn lifted(record: &BanRecord, reason: &str) -> Self {
        Self {
            action: AuditAction::BanLifted,
            severity: Severity::Medium,
            identifier: record.identifier.clone(),
            details: json!({
                "reason": reason,
                "original_reason": record.reason,
                "permanent": record.term.is_permanent(),
                "expires_at": record.term.expires_at(),
            }),
        }
    }
}

/// Ban records grouped by identifier, oldest first.
type Ledger = HashMap<String, Vec<BanRecord>>;

/// The ban system.
pub struct BanSystem {
    policy: BanPolicy,
    ledger: Mutex<Ledger>,
    store: Option<SharedStore>,
    clock: SharedClock,
    audit: Option<Arc<AuditLogger>>,
    degraded: AtomicBool,
    /// Set once the stored records have been merged into the ledger.
    restored: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl BanSystem {
    /// In-memory ban system on the system clock.
    #[must_use]
    pub fn new(policy: BanPolicy) -> Self {
        Self::open(policy, None, system_clock())
    }

    /// Ban system persisting records to `store`.
    ///
    /// Existing records are loaded here. An unreadable store starts an empty
    /// ledger in degraded mode; the load is retried on every later call and
    /// nothing is persisted until it succeeds.
    #[must_use]
    pub fn open(policy: BanPolicy, store: Option<SharedStore>, clock: SharedClock) -> Self {
        let system = Self {
            policy,
            ledger: Mutex::new(Ledger::new()),
            restored: AtomicBool::new(store.is_none()),
            store,
            clock,
            audit: None,
            degraded: AtomicBool::new(false),
            last_error: Mutex::new(None),
        };
        drop(system.lock_ledger());
        system
    }

    /// Writes every transition to `audit`.
    ///
    /// A store failure seen while opening is logged here, since no audit log
    /// was attached yet.
    #[must_use]
    pub fn with_audit(mut self, audit: Arc<AuditLogger>) -> Self {
        if self.is_degraded() {
            let error = self.last_error.lock().clone().unwrap_or_default();
            audit.log(
                AuditAction::StorageDegraded,
                json!({ "subsystem": "bans", "phase": "startup", "error": error }),
                Severity::Medium,
                SYSTEM_IDENTIFIER,
            );
        }
        self.audit = Some(audit);
        self
    }

    /// Active policy.
    #[must_use]
    pub fn policy(&self) -> &BanPolicy {
        &self.policy
    }

    /// Reports whether `identifier` is banned, expiring a finished
    /// temporary ban on the way.
    pub fn is_banned(&self, identifier: &str) -> BanStatus {
        let identifier = normalize_identifier(identifier);
        let now = self.clock.now();
        let mut transitions = Vec::new();

        let status = {
            let mut ledger = self.lock_ledger();
            let expired = ledger
                .get_mut(&identifier)
                .is_some_and(|records| expire_records(records, now, &mut transitions));
            if expired {
                self.persist(&ledger);
            }
            ledger
                .get(&identifier)
                .and_then(|records| records.iter().rev().find(|r| r.is_effective(now)))
                .map_or_else(|| BanStatus::clear(identifier.clone()), BanStatus::from_record)
        };

        self.emit(transitions);
        status
    }

    /// Bans `identifier`.
    ///
    /// An active permanent ban is returned unchanged. A temporary request
    /// over an active temporary ban keeps the later expiry and merges the
    /// violation ids. A permanent request replaces an active temporary ban.
    pub fn ban(
        &self,
        identifier: &str,
        reason: &str,
        violation_ids: &[String],
        options: BanOptions,
    ) -> BanStatus {
        let identifier = normalize_identifier(identifier);
        let now = self.clock.now();
        let mut transitions = Vec::new();

        let status = {
            let mut ledger = self.lock_ledger();
            let records = ledger.entry(identifier.clone()).or_default();
            expire_records(records, now, &mut transitions);

            let current = records.iter_mut().rev().find(|r| r.is_effective(now));
            let status = match current {
                Some(existing) if existing.term.is_permanent() => {
                    tracing::debug!(identifier = %identifier, "already permanently banned");
                    BanStatus::from_record(existing)
                }
                Some(existing) if !options.permanent => {
                    let requested = self.expiry(now, options);
                    if let BanTerm::Temporary { expires_at } = &mut existing.term {
                        *expires_at = (*expires_at).max(requested);
                    }
                    for id in violation_ids {
                        if !existing.violation_ids.contains(id) {
                            existing.violation_ids.push(id.clone());
                        }
                    }
                    transitions.push(Transition::applied(existing, true));
                    BanStatus::from_record(existing)
                }
                current => {
                    if let Some(existing) = current {
                        existing.deactivate(now, Deactivation::Superseded);
                    }
                    let term = if options.permanent {
                        BanTerm::Permanent
                    } else {
                        BanTerm::Temporary { expires_at: self.expiry(now, options) }
                    };
                    let record = BanRecord {
                        identifier: identifier.clone(),
                        reason: reason.to_string(),
                        violation_ids: violation_ids.to_vec(),
                        created_at: now,
                        term,
                        active: true,
                        deactivated_at: None,
                        deactivation: None,
                    };
                    tracing::info!(
                        identifier = %identifier,
                        permanent = options.permanent,
                        reason,
                        "ban applied"
                    );
                    transitions.push(Transition::applied(&record, false));
                    let status = BanStatus::from_record(&record);
                    records.push(record);
                    status
                }
            };
            self.persist(&ledger);
            status
        };

        self.emit(transitions);
        status
    }

    /// Lifts the active ban on `identifier`. Returns false if there was none.
    pub fn unban(&self, identifier: &str, reason: &str) -> bool {
        let identifier = normalize_identifier(identifier);
        let now = self.clock.now();
        let mut transitions = Vec::new();

        let lifted = {
            let mut ledger = self.lock_ledger();
            let Some(records) = ledger.get_mut(&identifier) else {
                return false;
            };
            let expired = expire_records(records, now, &mut transitions);
            let lifted = match records.iter_mut().rev().find(|r| r.is_effective(now)) {
                Some(record) => {
                    record.deactivate(now, Deactivation::Lifted { reason: reason.to_string() });
                    transitions.push(Transition::lifted(record, reason));
                    tracing::info!(identifier = %identifier, reason, "ban lifted");
                    true
                }
                None => false,
            };
            if lifted || expired {
                self.persist(&ledger);
            }
            lifted
        };

        self.emit(transitions);
        lifted
    }

    /// Applies the escalation table to `violations` and bans if a row fires.
    ///
    /// Returns the resulting status, or `None` if no threshold was met.
    pub fn check_auto_ban_threshold(
        &self,
        identifier: &str,
        violations: &[Violation],
    ) -> Option<BanStatus> {
        let tier = self.policy.evaluate(violations)?;
        let ids: Vec<String> = violations
            .iter()
            .filter(|v| v.severity == tier.severity)
            .map(|v| v.id.clone())
            .collect();
        let reason = format!(
            "automatic: {} {} violation(s) (threshold {})",
            ids.len(),
            tier.severity,
            tier.threshold
        );
        Some(self.ban(identifier, &reason, &ids, BanOptions::temporary(tier.duration())))
    }

    /// Every effectively active ban, expiring finished ones on the way.
    pub fn active_bans(&self) -> Vec<BanStatus> {
        let now = self.clock.now();
        let mut transitions = Vec::new();

        let mut active: Vec<BanStatus> = {
            let mut ledger = self.lock_ledger();
            let mut changed = false;
            for records in ledger.values_mut() {
                changed |= expire_records(records, now, &mut transitions);
            }
            if changed {
                self.persist(&ledger);
            }
            ledger
                .values()
                .filter_map(|records| records.iter().rev().find(|r| r.is_effective(now)))
                .map(BanStatus::from_record)
                .collect()
        };
        active.sort_by(|a, b| a.identifier.cmp(&b.identifier));

        self.emit(transitions);
        active
    }

    /// Every record for `identifier`, oldest first.
    #[must_use]
    pub fn history(&self, identifier: &str) -> Vec<BanRecord> {
        let identifier = normalize_identifier(identifier);
        self.lock_ledger().get(&identifier).cloned().unwrap_or_default()
    }

    /// Counts over the ledger, after expiring finished bans.
    pub fn stats(&self) -> BanStats {
        let active = self.active_bans();
        let ledger = self.lock_ledger();
        let mut stats = BanStats {
            active: active.len(),
            permanent: active.iter().filter(|s| s.permanent).count(),
            temporary: active.iter().filter(|s| !s.permanent).count(),
            ..BanStats::default()
        };
        for record in ledger.values().flatten() {
            stats.total_records += 1;
            match record.deactivation {
                Some(Deactivation::Expired) => stats.expired += 1,
                Some(Deactivation::Lifted { .. }) => stats.lifted += 1,
                _ => {}
            }
        }
        stats
    }

    /// Returns true if the store has failed and bans live only in memory.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    fn expiry(&self, now: DateTime<Utc>, options: BanOptions) -> DateTime<Utc> {
        let duration = options.duration.unwrap_or_else(|| self.policy.default_duration());
        saturating_add(now, duration)
    }

    /// Locks the ledger, first merging stored records if that has not
    /// happened yet.
    fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        let mut ledger = self.ledger.lock();
        if !self.restored.load(Ordering::Acquire) {
            self.restore(&mut ledger);
        }
        ledger
    }

    fn restore(&self, ledger: &mut Ledger) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        match BAN_NAMESPACE.load_json::<Vec<BanRecord>>(store.as_ref(), RECORDS_KEY) {
            Ok(stored) => {
                let stored = stored.unwrap_or_default();
                let count = stored.len();
                let pending = !ledger.is_empty();
                merge_records(ledger, stored, self.clock.now());
                self.restored.store(true, Ordering::Release);
                tracing::info!(records = count, "restored ban records");
                if pending {
                    self.persist(ledger);
                } else if self.degraded.swap(false, Ordering::AcqRel) {
                    tracing::info!("ban persistence recovered");
                }
            }
            Err(err) => self.mark_degraded(&err),
        }
    }

    fn persist(&self, ledger: &Ledger) {
        let Some(store) = self.store.as_ref() else {
            return;
        };
        if !self.restored.load(Ordering::Acquire) {
            return;
        }
        let mut records: Vec<&BanRecord> = ledger.values().flatten().collect();
        records.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.identifier.cmp(&b.identifier))
        });
        match BAN_NAMESPACE.save_json(store.as_ref(), RECORDS_KEY, &records) {
            Ok(()) => {
                if self.degraded.swap(false, Ordering::AcqRel) {
                    tracing::info!("ban persistence recovered");
                }
            }
            Err(err) => self.mark_degraded(&err),
        }
    }

    fn mark_degraded(&self, err: &StoreError) {
        *self.last_error.lock() = Some(err.to_string());
        if self.degraded.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::warn!(error = %err, "ban storage unavailable, keeping bans in memory only");
        if let Some(audit) = self.audit.as_ref() {
            audit.log(
                AuditAction::StorageDegraded,
                json!({ "subsystem": "bans", "error": err.to_string() }),
                Severity::Medium,
                SYSTEM_IDENTIFIER,
            );
        }
    }

    fn emit(&self, transitions: Vec<Transition>) {
        let Some(audit) = self.audit.as_ref() else {
            return;
        };
        for t in transitions {
            audit.log(t.action, t.details, t.severity, &t.identifier);
        }
    }
}

impl Default for BanSystem {
    fn default() -> Self {
        Self::new(BanPolicy::default())
    }
}

impl std::fmt::Debug for BanSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BanSystem")
            .field("identifiers", &self.ledger.lock().len())
            .field("audit", &self.audit.is_some())
            .field("degraded", &self.is_degraded())
            .finish()
    }
}

/// Adds stored records missing from `ledger`, then leaves at most one active
/// record per identifier: a permanent one if any, else the latest expiry.
fn merge_records(ledger: &mut Ledger, stored: Vec<BanRecord>, now: DateTime<Utc>) {
    for record in stored {
        let records = ledger.entry(record.identifier.clone()).or_default();
        let known = records
            .iter()
            .any(|r| r.created_at == record.created_at && r.reason == record.reason);
        if !known {
            records.push(record);
        }
    }
    for records in ledger.values_mut() {
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let keep = records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.active)
            .max_by_key(|(_, r)| (r.term.is_permanent(), r.term.expires_at(), r.created_at))
            .map(|(i, _)| i);
        for (i, record) in records.iter_mut().enumerate() {
            if record.active && Some(i) != keep {
                tracing::info!(identifier = %record.identifier, "merged ban superseded");
                record.deactivate(now, Deactivation::Superseded);
            }
        }
    }
}

/// Deactivates every expired active record. Returns true if any changed.
fn expire_records(
    records: &mut [BanRecord],
    now: DateTime<Utc>,
    transitions: &mut Vec<Transition>,
) -> bool {
    let mut changed = false;
    for record in records.iter_mut().filter(|r| r.active && !r.is_effective(now)) {
        record.deactivate(now, Deactivation::Expired);
        tracing::info!(identifier = %record.identifier, "temporary ban expired");
        transitions.push(Transition::expired(record));
        changed = true;
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditConfig;
    use crate::validation::{CheckKind, ViolationKind};
    use daddeck_core::{Clock, ManualClock, MemoryStore};

    fn system() -> (BanSystem, Arc<ManualClock>, Arc<AuditLogger>) {
        let clock = Arc::new(ManualClock::starting_now());
        let audit = Arc::new(AuditLogger::open(AuditConfig::default(), None, clock.clone()));
        let bans = BanSystem::open(BanPolicy::default(), None, clock.clone())
            .with_audit(Arc::clone(&audit));
        (bans, clock, audit)
    }

    fn violations(severity: Severity, n: usize) -> Vec<Violation> {
        (0..n)
            .map(|_| Violation::new(ViolationKind::DuplicatePack, CheckKind::Duplicate, severity, "x"))
            .collect()
    }

    #[test]
    fn test_unknown_identifier_is_not_banned() {
        let (bans, _, _) = system();
        let status = bans.is_banned("nobody");
        assert!(!status.banned);
        assert_eq!(status.identifier, "nobody");
        assert!(bans.history("nobody").is_empty());
    }

    #[test]
    fn test_auto_ban_thresholds() {
        let (bans, clock, _) = system();
        let status = bans
            .check_auto_ban_threshold("crit", &violations(Severity::Critical, 1))
            .unwrap();
        assert!(status.banned);
        assert!(!status.permanent);
        assert_eq!(status.remaining_seconds(clock.now()), Some(7 * 24 * 3600));

        assert!(bans.check_auto_ban_threshold("high", &violations(Severity::High, 4)).is_none());
        assert!(!bans.is_banned("high").banned);

        let status = bans.check_auto_ban_threshold("high", &violations(Severity::High, 5)).unwrap();
        assert_eq!(status.remaining_seconds(clock.now()), Some(24 * 3600));
        assert_eq!(status.violation_ids.len(), 5);
    }

    #[test]
    fn test_lazy_expiry_is_audited() {
        let (bans, clock, audit) = system();
        bans.ban("temp", "test", &[], BanOptions::temporary(Duration::hours(1)));
        assert!(bans.is_banned("temp").banned);

        clock.advance(Duration::hours(1));
        assert!(!bans.is_banned("temp").banned);
        assert!(bans.active_bans().is_empty());

        let history = bans.history("temp");
        assert_eq!(history.len(), 1);
        assert!(!history[0].active);
        assert_eq!(history[0].deactivation, Some(Deactivation::Expired));
        assert_eq!(audit.by_action(AuditAction::BanExpired).len(), 1);
    }

    #[test]
    fn test_permanent_never_downgraded() {
        let (bans, _, _) = system();
        bans.ban("p", "botting", &[], BanOptions::permanent());
        let status = bans.ban("p", "later", &[], BanOptions::temporary(Duration::minutes(5)));
        assert!(status.permanent);
        assert_eq!(status.reason.as_deref(), Some("botting"));
        assert_eq!(bans.history("p").len(), 1);
    }

    #[test]
    fn test_temporary_keeps_later_expiry() {
        let (bans, clock, _) = system();
        let long = bans.ban("t", "a", &["v1".to_string()], BanOptions::temporary(Duration::days(1)));
        let short = bans.ban("t", "b", &["v2".to_string()], BanOptions::temporary(Duration::hours(1)));
        assert_eq!(short.expires_at, long.expires_at);
        assert_eq!(short.violation_ids, vec!["v1".to_string(), "v2".to_string()]);

        clock.advance(Duration::hours(2));
        let longer = bans.ban("t", "c", &[], BanOptions::temporary(Duration::days(1)));
        assert!(longer.expires_at > long.expires_at);
        assert_eq!(bans.history("t").len(), 1);
    }

    #[test]
    fn test_permanent_supersedes_temporary() {
        let (bans, clock, _) = system();
        bans.ban("u", "first", &[], BanOptions::temporary(Duration::hours(1)));
        let status = bans.ban("u", "second", &[], BanOptions::permanent());
        assert!(status.permanent);

        clock.advance(Duration::days(30));
        assert!(bans.is_banned("u").banned);
        let history = bans.history("u");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].deactivation, Some(Deactivation::Superseded));
        assert_eq!(bans.active_bans().len(), 1);
    }

    #[test]
    fn test_unban() {
        let (bans, _, audit) = system();
        assert!(!bans.unban("v", "nothing to lift"));
        bans.ban("v", "spam", &[], BanOptions::permanent());
        assert!(bans.unban(" V ", "appeal granted"));
        assert!(!bans.is_banned("v").banned);
        assert!(!bans.unban("v", "again"));

        let lifted = audit.by_action(AuditAction::BanLifted);
        assert_eq!(lifted.len(), 1);
        assert_eq!(lifted[0].details["reason"], "appeal granted");
    }

    #[test]
    fn test_stats() {
        let (bans, clock, _) = system();
        bans.ban("a", "r", &[], BanOptions::permanent());
        bans.ban("b", "r", &[], BanOptions::temporary(Duration::minutes(10)));
        bans.ban("c", "r", &[], BanOptions::temporary(Duration::days(2)));
        bans.unban("a", "mistake");
        clock.advance(Duration::hours(1));

        let stats = bans.stats();
        assert_eq!(stats.total_records, 3);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.temporary, 1);
        assert_eq!(stats.permanent, 0);
        assert_eq!(stats.expired, 1);
        assert_eq!(stats.lifted, 1);
    }

    #[test]
    fn test_records_survive_restart() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        {
            let bans = BanSystem::open(BanPolicy::default(), Some(store.clone()), clock.clone());
            bans.ban("persist", "r", &[], BanOptions::permanent());
        }
        let reopened = BanSystem::open(BanPolicy::default(), Some(store), clock);
        assert!(reopened.is_banned("persist").banned);
        assert!(!reopened.is_degraded());
    }

    #[test]
    fn test_store_outage_keeps_bans_in_memory() {
        let store = Arc::new(MemoryStore::new());
        store.set_offline(true);
        let bans = BanSystem::open(BanPolicy::default(), Some(store), Arc::new(ManualClock::starting_now()));
        assert!(bans.is_degraded());
        bans.ban("mem", "r", &[], BanOptions::permanent());
        assert!(bans.is_banned("mem").banned);
    }

    #[test]
    fn test_startup_outage_never_erases_stored_bans() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        {
            let bans = BanSystem::open(BanPolicy::default(), Some(store.clone()), clock.clone());
            bans.ban("perma-cheater", "duplication", &[], BanOptions::permanent());
        }

        store.set_offline(true);
        let audit = Arc::new(AuditLogger::open(AuditConfig::default(), None, clock.clone()));
        let bans = BanSystem::open(BanPolicy::default(), Some(store.clone()), clock.clone())
            .with_audit(Arc::clone(&audit));
        assert!(bans.is_degraded());
        let degraded = audit.by_action(AuditAction::StorageDegraded);
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].details["phase"], "startup");

        store.set_offline(false);
        bans.ban("someone-else", "spam", &[], BanOptions::permanent());
        assert!(!bans.is_degraded());
        assert!(bans.is_banned("perma-cheater").banned);
        drop(bans);

        let reopened = BanSystem::open(BanPolicy::default(), Some(store), clock);
        assert!(reopened.is_banned("perma-cheater").banned);
        assert!(reopened.is_banned("someone-else").banned);
        assert_eq!(reopened.stats().total_records, 2);
    }

    #[test]
    fn test_bans_made_during_outage_merge_with_stored() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        {
            let bans = BanSystem::open(BanPolicy::default(), Some(store.clone()), clock.clone());
            bans.ban("dup", "first", &[], BanOptions::temporary(Duration::hours(1)));
        }

        store.set_offline(true);
        let bans = BanSystem::open(BanPolicy::default(), Some(store.clone()), clock.clone());
        clock.advance(Duration::minutes(1));
        bans.ban("dup", "second", &[], BanOptions::permanent());

        store.set_offline(false);
        let status = bans.is_banned("dup");
        assert!(status.permanent);
        let history = bans.history("dup");
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].deactivation, Some(Deactivation::Superseded));
        assert_eq!(bans.active_bans().len(), 1);

        let reopened = BanSystem::open(BanPolicy::default(), Some(store), clock);
        assert_eq!(reopened.history("dup").len(), 2);
        assert!(reopened.is_banned("dup").permanent);
    }

    #[test]
    fn test_huge_durations_saturate() {
        let (bans, clock, _) = system();
        let status = bans.ban("far", "r", &[], BanOptions::temporary(Duration::MAX));
        assert!(status.banned);
        assert_eq!(status.expires_at, Some(DateTime::<Utc>::MAX_UTC));
        let again = bans.ban("far", "r", &[], BanOptions::temporary(Duration::MAX));
        assert_eq!(again.expires_at, status.expires_at);
        assert!(status.remaining_seconds(clock.now()).is_some_and(|s| s > 0));

        let policy = BanPolicy {
            tiers: vec![BanTier::new(Severity::Critical, 1, u64::MAX)],
            ..BanPolicy::default()
        };
        let bans = BanSystem::open(policy, None, clock);
        let status = bans
            .check_auto_ban_threshold("tier", &violations(Severity::Critical, 1))
            .unwrap();
        assert!(status.banned);
    }

    #[test]
    fn test_outage_after_start_is_audited_once() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::starting_now());
        let audit = Arc::new(AuditLogger::open(AuditConfig::default(), None, clock.clone()));
        let bans = BanSystem::open(BanPolicy::default(), Some(store.clone()), clock)
            .with_audit(Arc::clone(&audit));

        store.set_offline(true);
        bans.ban("a", "r", &[], BanOptions::permanent());
        bans.ban("b", "r", &[], BanOptions::permanent());
        assert!(bans.is_degraded());

        let degraded = audit.by_action(AuditAction::StorageDegraded);
        assert_eq!(degraded.len(), 1);
        assert_eq!(degraded[0].details["subsystem"], "bans");

        store.set_offline(false);
        bans.unban("a", "r");
        assert!(!bans.is_degraded());
    }
}
