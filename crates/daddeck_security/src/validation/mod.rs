//! # Pack Validator
//!
//! Decides whether a generated pack is genuine.
//!
//! ## Checks
//!
//! | Check        | Looks at                               | Critical when                       |
//! |--------------|----------------------------------------|-------------------------------------|
//! | Duplicate    | canonical hash vs. recent-hash cache   | same pack seen inside the TTL       |
//! | Distribution | each slot vs. the generation config    | slot, count, best rarity, config id |
//! | Anomaly      | weighted rarity score vs. history      | \|z\| > 5, or impossible counts     |
//! | Entropy      | item identities                        | never (high / medium at worst)      |
//!
//! The four checks run independently. Malformed input inside one check
//! becomes a critical `malformed_input` violation of that check and the
//! others still run.
//!
//! A verdict is `valid` iff it holds no critical violation.

mod anomaly;
mod distribution;
mod duplicate;
mod entropy;

pub use anomaly::{mean_stddev, rarity_score, ScoreHistory};
pub use duplicate::{MemoryPackCache, RecentPackCache};
pub use entropy::shannon_entropy;

use daddeck_core::{
    millis, system_clock, GenerationConfig, Pack, PackHash, PackHasher, Severity, SharedClock,
    ANONYMOUS,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::audit::{AuditAction, AuditSink};

static VIOLATION_SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// What a finding is about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The same pack was submitted twice inside the duplicate window.
    DuplicatePack,
    /// An item's rarity cannot come from its slot.
    RarityMismatch,
    /// Item count differs from slot count.
    SlotCountMismatch,
    /// Declared best rarity is not the real best.
    BestRarityMismatch,
    /// Pack was generated under a different config.
    ConfigMismatch,
    /// More items of a rarity than any legal pack holds.
    ImpossibleCombination,
    /// Legal but unlikely counts.
    ImprobableCombination,
    /// Rarity score far from the historical mean.
    StatisticalAnomaly,
    /// The same item id appears more than once.
    DuplicateItems,
    /// Entropy below the floor.
    LowEntropy,
    /// Entropy well below the maximum for the pack size.
    LowEntropyRatio,
    /// A check could not read its input.
    MalformedInput,
}

impl ViolationKind {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DuplicatePack => "duplicate_pack",
            Self::RarityMismatch => "rarity_mismatch",
            Self::SlotCountMismatch => "slot_count_mismatch",
            Self::BestRarityMismatch => "best_rarity_mismatch",
            Self::ConfigMismatch => "config_mismatch",
            Self::ImpossibleCombination => "impossible_combination",
            Self::ImprobableCombination => "improbable_combination",
            Self::StatisticalAnomaly => "statistical_anomaly",
            Self::DuplicateItems => "duplicate_items",
            Self::LowEntropy => "low_entropy",
            Self::LowEntropyRatio => "low_entropy_ratio",
            Self::MalformedInput => "malformed_input",
        }
    }
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which of the four checks produced a finding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    /// Replay detection.
    Duplicate,
    /// Slot rules.
    Distribution,
    /// Score z-test.
    Anomaly,
    /// Identity entropy.
    Entropy,
}

impl CheckKind {
    /// Every check, in evaluation order.
    pub const ALL: [Self; 4] = [Self::Duplicate, Self::Distribution, Self::Anomaly, Self::Entropy];

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Duplicate => "duplicate",
            Self::Distribution => "distribution",
            Self::Anomaly => "anomaly",
            Self::Entropy => "entropy",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A finding. Only `severity` affects control flow.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Unique id, referenced by ban records.
    pub id: String,
    /// What was found.
    pub kind: ViolationKind,
    /// Which check found it.
    pub check: CheckKind,
    /// How serious it is.
    pub severity: Severity,
    /// Human-readable summary.
    pub message: String,
    /// Structured context.
    #[serde(default)]
    pub details: serde_json::Value,
}

/// Warnings share the violation shape but never affect validity.
pub type Warning = Violation;

impl Violation {
    /// Creates a finding with a fresh id.
    #[must_use]
    pub fn new(
        kind: ViolationKind,
        check: CheckKind,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        let seq = VIOLATION_SEQUENCE.fetch_add(1, Ordering::Relaxed);
        Self {
            id: format!("vio-{seq:08}"),
            kind,
            check,
            severity,
            message: message.into(),
            details: serde_json::Value::Null,
        }
    }

    /// Attaches structured details.
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }

    /// Returns true for a critical finding.
    #[must_use]
    pub fn is_critical(&self) -> bool {
        self.severity == Severity::Critical
    }

    fn summary(&self) -> serde_json::Value {
        json!({
            "id": self.id,
            "kind": self.kind,
            "check": self.check,
            "severity": self.severity,
            "message": self.message,
        })
    }
}

/// A check could not interpret its input.
#[derive(Debug, Error)]
#[error("malformed input: {reason}")]
pub(crate) struct MalformedInput {
    reason: String,
}

impl MalformedInput {
    pub(crate) fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    fn into_violation(self, check: CheckKind) -> Violation {
        Violation::new(ViolationKind::MalformedInput, check, Severity::Critical, self.to_string())
            .with_details(json!({ "reason": self.reason }))
    }
}

/// Findings of one check.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct CheckOutcome {
    pub violations: Vec<Violation>,
    pub warnings: Vec<Warning>,
}

impl CheckOutcome {
    fn settle(check: CheckKind, result: Result<Self, MalformedInput>) -> Self {
        result.unwrap_or_else(|err| {
            tracing::debug!(check = %check, error = %err, "check could not read its input");
            Self {
                violations: vec![err.into_violation(check)],
                warnings: Vec::new(),
            }
        })
    }

    fn confidence(&self, config: &ValidatorConfig) -> f64 {
        if self.violations.iter().any(Violation::is_critical) {
            return 0.0;
        }
        let penalty = config.warning_penalty * self.warnings.len() as f64
            + config.violation_penalty * self.violations.len() as f64;
        (1.0 - penalty).clamp(0.0, 1.0)
    }
}

/// Relative weight of each check in the overall confidence.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    /// Duplicate check weight.
    pub duplicate: f64,
    /// Distribution check weight.
    pub distribution: f64,
    /// Anomaly check weight.
    pub anomaly: f64,
    /// Entropy check weight.
    pub entropy: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            duplicate: 1.0,
            distribution: 1.0,
            anomaly: 1.0,
            entropy: 1.0,
        }
    }
}

impl ConfidenceWeights {
    /// Weight of `check`.
    #[must_use]
    pub const fn of(&self, check: CheckKind) -> f64 {
        match check {
            CheckKind::Duplicate => self.duplicate,
            CheckKind::Distribution => self.distribution,
            CheckKind::Anomaly => self.anomaly,
            CheckKind::Entropy => self.entropy,
        }
    }

    /// Weighted mean of per-check confidences. Falls back to the plain mean
    /// if the weights do not sum to a positive number.
    #[must_use]
    pub fn combine(&self, confidences: &[(CheckKind, f64)]) -> f64 {
        let total: f64 = confidences.iter().map(|&(c, _)| self.of(c).max(0.0)).sum();
        if total > 0.0 {
            confidences
                .iter()
                .map(|&(c, v)| self.of(c).max(0.0) * v)
                .sum::<f64>()
                / total
        } else if confidences.is_empty() {
            1.0
        } else {
            confidences.iter().map(|&(_, v)| v).sum::<f64>() / confidences.len() as f64
        }
    }
}

/// Tunables of the validator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// How long a pack hash counts as recently seen.
    pub duplicate_ttl_ms: u64,
    /// Maximum hashes held by the default cache.
    pub cache_capacity: usize,
    /// Per-tier score base.
    pub tier_base: f64,
    /// Score multiplier for holo items.
    pub holo_multiplier: f64,
    /// History needed before the z-test applies.
    pub min_history: usize,
    /// |z| above this warns.
    pub warning_z: f64,
    /// |z| above this is critical.
    pub critical_z: f64,
    /// Minimum identity entropy in bits (clamped to `log2(n)`).
    pub entropy_floor_bits: f64,
    /// Entropy ratio below this warns.
    pub entropy_ratio_warning: f64,
    /// Confidence lost per warning.
    pub warning_penalty: f64,
    /// Confidence lost per non-critical violation.
    pub violation_penalty: f64,
    /// Per-check weights.
    pub weights: ConfidenceWeights,
    /// Capacity of a default [`ScoreHistory`].
    pub score_history_capacity: usize,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            duplicate_ttl_ms: 60 * 60 * 1000,
            cache_capacity: 10_000,
            tier_base: 2.0,
            holo_multiplier: 1.5,
            min_history: 100,
            warning_z: 3.0,
            critical_z: 5.0,
            entropy_floor_bits: 2.0,
            entropy_ratio_warning: 0.7,
            warning_penalty: 0.1,
            violation_penalty: 0.25,
            weights: ConfidenceWeights::default(),
            score_history_capacity: 10_000,
        }
    }
}

impl ValidatorConfig {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns a description of the first bad value.
    pub fn validate(&self) -> Result<(), String> {
        if self.duplicate_ttl_ms == 0 {
            return Err("duplicate_ttl_ms must be positive".to_string());
        }
        if self.cache_capacity == 0 {
            return Err("cache_capacity must be positive".to_string());
        }
        if !(self.tier_base.is_finite() && self.tier_base >= 1.0) {
            return Err("tier_base must be at least 1".to_string());
        }
        if !(self.holo_multiplier.is_finite() && self.holo_multiplier >= 1.0) {
            return Err("holo_multiplier must be at least 1".to_string());
        }
        if !(self.warning_z > 0.0 && self.critical_z >= self.warning_z) {
            return Err("z thresholds must satisfy 0 < warning_z <= critical_z".to_string());
        }
        if !(0.0..=1.0).contains(&self.entropy_ratio_warning) {
            return Err("entropy_ratio_warning must be within 0..=1".to_string());
        }
        if self.entropy_floor_bits < 0.0 || self.warning_penalty < 0.0 || self.violation_penalty < 0.0 {
            return Err("entropy floor and penalties must not be negative".to_string());
        }
        Ok(())
    }
}

/// Per-call inputs besides the pack.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValidateOptions<'a> {
    /// Who submitted the pack; recorded in the audit log.
    pub identifier: Option<&'a str>,
    /// Scores of previously accepted packs.
    pub history: Option<&'a [f64]>,
}

impl<'a> ValidateOptions<'a> {
    /// No identifier, no history.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the identifier.
    #[must_use]
    pub fn identifier(mut self, identifier: &'a str) -> Self {
        self.identifier = Some(identifier);
        self
    }

    /// Sets the score history.
    #[must_use]
    pub fn history(mut self, history: &'a [f64]) -> Self {
        self.history = Some(history);
        self
    }
}

/// Outcome of one validation. Never mutated after it is returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ValidationVerdict {
    /// No critical violation.
    pub valid: bool,
    /// Every violation, in check order.
    pub violations: Vec<Violation>,
    /// Every warning, in check order.
    pub warnings: Vec<Warning>,
    /// Overall confidence in `0..=1`.
    pub confidence: f64,
    /// Canonical hash of the pack.
    pub pack_hash: PackHash,
    /// Weighted rarity score of the pack.
    pub score: f64,
}

impl ValidationVerdict {
    /// Critical violations only.
    pub fn critical(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| v.is_critical())
    }

    /// Returns true if a violation of `kind` was found.
    #[must_use]
    pub fn has(&self, kind: ViolationKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }

    /// Returns true if nothing at all was found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.violations.is_empty() && self.warnings.is_empty()
    }
}

/// Validation counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ValidatorStats {
    /// Packs validated.
    pub validated: u64,
    /// Packs with a critical violation.
    pub rejected: u64,
    /// Packs caught as duplicates.
    pub duplicates: u64,
    /// Packs with at least one warning.
    pub warned: u64,
}

/// The pack validator.
pub struct PackValidator {
    config: ValidatorConfig,
    cache: Arc<dyn RecentPackCache>,
    hasher: PackHasher,
    clock: SharedClock,
    audit: Option<AuditSink>,
    validated: AtomicU64,
    rejected: AtomicU64,
    duplicates: AtomicU64,
    warned: AtomicU64,
}

impl PackValidator {
    /// Validator with an in-memory cache on the system clock.
    #[must_use]
    pub fn new(config: ValidatorConfig) -> Self {
        let cache = Arc::new(MemoryPackCache::new(config.cache_capacity));
        Self {
            config,
            cache,
            hasher: PackHasher::new(),
            clock: system_clock(),
            audit: None,
            validated: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            warned: AtomicU64::new(0),
        }
    }

    /// Uses `cache` for duplicate detection.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn RecentPackCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Reads time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Hashes packs with `hasher`.
    #[must_use]
    pub fn with_hasher(mut self, hasher: PackHasher) -> Self {
        self.hasher = hasher;
        self
    }

    /// Submits findings to `sink`.
    #[must_use]
    pub fn with_audit(mut self, sink: AuditSink) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &ValidatorConfig {
        &self.config
    }

    /// Validates `pack` against `generation`.
    ///
    /// Never fails: malformed input becomes a violation, and audit
    /// submission cannot change the verdict.
    pub fn validate(
        &self,
        pack: &Pack,
        generation: &GenerationConfig,
        options: &ValidateOptions<'_>,
    ) -> ValidationVerdict {
        let now = self.clock.now();
        let pack_hash = self.hasher.hash_pack(pack);
        let ttl = millis(self.config.duplicate_ttl_ms);

        let duplicate = CheckOutcome::settle(
            CheckKind::Duplicate,
            duplicate::check(pack, pack_hash, self.cache.as_ref(), now, ttl),
        );
        let distribution = CheckOutcome::settle(
            CheckKind::Distribution,
            distribution::check(pack, generation),
        );
        let (score, anomaly) =
            match anomaly::check(pack, generation, options.history, &self.config) {
                Ok(scored) => scored,
                Err(err) => (
                    rarity_score(pack, self.config.tier_base, self.config.holo_multiplier),
                    CheckOutcome::settle(CheckKind::Anomaly, Err(err)),
                ),
            };
        let entropy = CheckOutcome::settle(CheckKind::Entropy, entropy::check(pack, &self.config));

        let is_duplicate = duplicate.violations.iter().any(|v| v.kind == ViolationKind::DuplicatePack);
        let outcomes = [
            (CheckKind::Duplicate, duplicate),
            (CheckKind::Distribution, distribution),
            (CheckKind::Anomaly, anomaly),
            (CheckKind::Entropy, entropy),
        ];

        let confidence = if is_duplicate {
            0.0
        } else {
            let per_check: Vec<(CheckKind, f64)> = outcomes
                .iter()
                .map(|(check, outcome)| (*check, outcome.confidence(&self.config)))
                .collect();
            self.config.weights.combine(&per_check)
        };

        let mut violations = Vec::new();
        let mut warnings = Vec::new();
        for (_, outcome) in outcomes {
            violations.extend(outcome.violations);
            warnings.extend(outcome.warnings);
        }
        let valid = !violations.iter().any(Violation::is_critical);

        let verdict = ValidationVerdict {
            valid,
            violations,
            warnings,
            confidence,
            pack_hash,
            score,
        };
        self.record(pack, &verdict, is_duplicate, options.identifier);
        verdict
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ValidatorStats {
        ValidatorStats {
            validated: self.validated.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            warned: self.warned.load(Ordering::Relaxed),
        }
    }

    /// Hashes currently held by the duplicate cache.
    #[must_use]
    pub fn cached_hashes(&self) -> usize {
        self.cache.len()
    }

    /// Empties the duplicate cache.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn record(
        &self,
        pack: &Pack,
        verdict: &ValidationVerdict,
        is_duplicate: bool,
        identifier: Option<&str>,
    ) {
        self.validated.fetch_add(1, Ordering::Relaxed);
        if !verdict.valid {
            self.rejected.fetch_add(1, Ordering::Relaxed);
        }
        if is_duplicate {
            self.duplicates.fetch_add(1, Ordering::Relaxed);
        }
        if !verdict.warnings.is_empty() {
            self.warned.fetch_add(1, Ordering::Relaxed);
        }

        let identifier = identifier.unwrap_or(ANONYMOUS);
        if verdict.valid {
            tracing::debug!(pack_id = %pack.id, confidence = verdict.confidence, "pack accepted");
        } else {
            tracing::info!(
                pack_id = %pack.id,
                identifier,
                violations = verdict.violations.len(),
                "pack rejected"
            );
        }

        if verdict.is_clean() {
            return;
        }
        let Some(sink) = self.audit.as_ref() else {
            return;
        };

        let action = if is_duplicate {
            AuditAction::DuplicatePack
        } else if verdict.valid {
            AuditAction::PackFlagged
        } else {
            AuditAction::PackRejected
        };
        let severity = verdict
            .violations
            .iter()
            .map(|v| v.severity)
            .max()
            .unwrap_or(Severity::Low);
        let details = json!({
            "pack_id": pack.id,
            "pack_hash": verdict.pack_hash,
            "config_ref": pack.config_ref,
            "confidence": verdict.confidence,
            "violations": verdict.violations.iter().map(Violation::summary).collect::<Vec<_>>(),
            "warnings": verdict.warnings.iter().map(Violation::summary).collect::<Vec<_>>(),
        });
        if !sink.submit(action, details, severity, identifier) {
            tracing::debug!(pack_id = %pack.id, "audit event dropped");
        }
    }
}

impl Default for PackValidator {
    fn default() -> Self {
        Self::new(ValidatorConfig::default())
    }
}

impl fmt::Debug for PackValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackValidator")
            .field("cached_hashes", &self.cached_hashes())
            .field("audit", &self.audit.is_some())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditConfig, AuditLogger};
    use daddeck_core::{Item, ManualClock, Rarity};

    fn legal_pack(id: &str) -> Pack {
        let items = vec![
            Item::new("grillmaster-gary", Rarity::Common),
            Item::new("lawnmower-larry", Rarity::Common),
            Item::new("thermostat-ted", Rarity::Common),
            Item::new("cargo-shorts-carl", Rarity::Uncommon),
            Item::new("dad-joke-dan", Rarity::Rare),
            Item::holo("bbq-baron-bob", Rarity::Epic),
        ];
        Pack::new(id, items, chrono::Utc::now(), "standard-v1")
    }

    #[test]
    fn test_legal_pack_full_confidence() {
        let validator = PackValidator::default();
        let verdict = validator.validate(&legal_pack("p1"), &GenerationConfig::standard(), &ValidateOptions::new());
        assert!(verdict.valid);
        assert!(verdict.is_clean());
        assert!((verdict.confidence - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_replay_is_rejected_once() {
        let validator = PackValidator::default();
        let config = GenerationConfig::standard();
        let pack = legal_pack("p1");

        assert!(validator.validate(&pack, &config, &ValidateOptions::new()).valid);
        let replay = validator.validate(&pack, &config, &ValidateOptions::new());
        assert!(!replay.valid);
        assert!(replay.has(ViolationKind::DuplicatePack));
        assert!(replay.confidence.abs() < f64::EPSILON);
        assert_eq!(validator.stats().duplicates, 1);
    }

    #[test]
    fn test_replay_after_ttl_is_accepted() {
        let clock = Arc::new(ManualClock::starting_now());
        let validator = PackValidator::default().with_clock(clock.clone());
        let config = GenerationConfig::standard();
        let pack = legal_pack("p1");

        validator.validate(&pack, &config, &ValidateOptions::new());
        clock.advance_ms(60 * 60 * 1000);
        assert!(validator.validate(&pack, &config, &ValidateOptions::new()).valid);
    }

    #[test]
    fn test_malformed_pack_runs_every_check() {
        let validator = PackValidator::default();
        let empty = Pack::new("p-empty", Vec::new(), chrono::Utc::now(), "standard-v1");
        let verdict = validator.validate(&empty, &GenerationConfig::standard(), &ValidateOptions::new());

        assert!(!verdict.valid);
        let malformed: Vec<CheckKind> = verdict
            .violations
            .iter()
            .filter(|v| v.kind == ViolationKind::MalformedInput)
            .map(|v| v.check)
            .collect();
        assert_eq!(malformed, vec![CheckKind::Distribution, CheckKind::Anomaly, CheckKind::Entropy]);
        // The duplicate check still recorded the hash.
        assert_eq!(validator.cached_hashes(), 1);
    }

    #[test]
    fn test_non_critical_findings_lower_confidence() {
        let validator = PackValidator::default();
        let mut pack = legal_pack("p1");
        pack.items[1].id = pack.items[0].id.clone();
        let verdict = validator.validate(&pack, &GenerationConfig::standard(), &ValidateOptions::new());

        assert!(verdict.valid);
        assert!(verdict.has(ViolationKind::DuplicateItems));
        // Entropy check: one violation = 0.75, others 1.0.
        assert!((verdict.confidence - 0.9375).abs() < 1e-9);
    }

    #[test]
    fn test_weights_shift_confidence() {
        let config = ValidatorConfig {
            weights: ConfidenceWeights { duplicate: 0.0, distribution: 0.0, anomaly: 0.0, entropy: 1.0 },
            ..ValidatorConfig::default()
        };
        let validator = PackValidator::new(config);
        let mut pack = legal_pack("p1");
        pack.items[1].id = pack.items[0].id.clone();
        let verdict = validator.validate(&pack, &GenerationConfig::standard(), &ValidateOptions::new());
        assert!((verdict.confidence - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_findings_reach_the_audit_log() {
        let audit = AuditLogger::new(AuditConfig::default());
        let validator = PackValidator::default().with_audit(audit.sink());
        let config = GenerationConfig::standard();
        let pack = legal_pack("p1");

        validator.validate(&pack, &config, &ValidateOptions::new().identifier("Device-9"));
        validator.validate(&pack, &config, &ValidateOptions::new().identifier("Device-9"));
        audit.flush();

        let entries = audit.by_identifier("device-9");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::DuplicatePack);
        assert_eq!(entries[0].severity, Severity::Critical);
        assert_eq!(entries[0].details["pack_id"], "p1");
    }

    #[test]
    fn test_config_validation() {
        assert!(ValidatorConfig::default().validate().is_ok());
        let bad = ValidatorConfig { critical_z: 1.0, ..ValidatorConfig::default() };
        assert!(bad.validate().is_err());
    }
}
