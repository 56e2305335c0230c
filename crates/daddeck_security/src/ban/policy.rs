//! Escalation table for automatic bans.

use daddeck_core::{millis, Severity, MAX_DURATION_MS};
use serde::{Deserialize, Serialize};

use crate::validation::Violation;

const HOUR_MS: u64 = 60 * 60 * 1000;
const DAY_MS: u64 = 24 * HOUR_MS;

/// One row of the escalation table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BanTier {
    /// Severity counted by this row.
    pub severity: Severity,
    /// Violations of exactly this severity needed to trigger.
    pub threshold: usize,
    /// Ban length in milliseconds.
    pub duration_ms: u64,
}

impl BanTier {
    /// Creates a row.
    #[must_use]
    pub const fn new(severity: Severity, threshold: usize, duration_ms: u64) -> Self {
        Self { severity, threshold, duration_ms }
    }

    /// Ban length as a chrono duration.
    #[must_use]
    pub fn duration(&self) -> chrono::Duration {
        millis(self.duration_ms)
    }
}

/// Ordered escalation table.
///
/// Rows are evaluated from the most severe to the least severe; the first
/// row whose threshold is met decides the ban.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BanPolicy {
    /// Escalation rows.
    pub tiers: Vec<BanTier>,
    /// Length of a manual temporary ban when none is given.
    pub default_duration_ms: u64,
}

impl Default for BanPolicy {
    fn default() -> Self {
        Self {
            tiers: vec![
                BanTier::new(Severity::Critical, 1, 7 * DAY_MS),
                BanTier::new(Severity::High, 5, DAY_MS),
                BanTier::new(Severity::Medium, 10, HOUR_MS),
                BanTier::new(Severity::Low, 20, HOUR_MS),
            ],
            default_duration_ms: DAY_MS,
        }
    }
}

impl BanPolicy {
    /// Default manual ban length.
    #[must_use]
    pub fn default_duration(&self) -> chrono::Duration {
        millis(self.default_duration_ms)
    }

    /// First row met by `violations`, most severe first.
    #[must_use]
    pub fn evaluate(&self, violations: &[Violation]) -> Option<BanTier> {
        Severity::DESCENDING.iter().find_map(|&severity| {
            let count = violations.iter().filter(|v| v.severity == severity).count();
            self.tiers
                .iter()
                .filter(|tier| tier.severity == severity && tier.threshold > 0)
                .find(|tier| count >= tier.threshold)
                .copied()
        })
    }

    /// Checks the table for rows that can never fire.
    ///
    /// # Errors
    ///
    /// Returns a description of the first bad row.
    pub fn validate(&self) -> Result<(), String> {
        for tier in &self.tiers {
            if tier.threshold == 0 {
                return Err(format!("{} tier has a zero threshold", tier.severity));
            }
            if tier.duration_ms == 0 {
                return Err(format!("{} tier has a zero duration", tier.severity));
            }
            if tier.duration_ms > MAX_DURATION_MS {
                return Err(format!(
                    "{} tier duration exceeds {MAX_DURATION_MS} ms",
                    tier.severity
                ));
            }
        }
        if self.default_duration_ms == 0 || self.default_duration_ms > MAX_DURATION_MS {
            return Err(format!(
                "default_duration_ms must be between 1 and {MAX_DURATION_MS}"
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{CheckKind, ViolationKind};

    fn violations(severity: Severity, n: usize) -> Vec<Violation> {
        (0..n)
            .map(|_| {
                Violation::new(
                    ViolationKind::RarityMismatch,
                    CheckKind::Distribution,
                    severity,
                    "test",
                )
            })
            .collect()
    }

    #[test]
    fn test_default_table() {
        let policy = BanPolicy::default();
        assert_eq!(
            policy.evaluate(&violations(Severity::Critical, 1)).map(|t| t.duration_ms),
            Some(7 * DAY_MS)
        );
        assert_eq!(policy.evaluate(&violations(Severity::High, 4)), None);
        assert_eq!(
            policy.evaluate(&violations(Severity::High, 5)).map(|t| t.duration_ms),
            Some(DAY_MS)
        );
        assert_eq!(policy.evaluate(&violations(Severity::Low, 19)), None);
        assert!(policy.evaluate(&violations(Severity::Low, 20)).is_some());
    }

    #[test]
    fn test_most_severe_row_wins() {
        let mut mixed = violations(Severity::Low, 25);
        mixed.extend(violations(Severity::Critical, 1));
        let tier = BanPolicy::default().evaluate(&mixed).unwrap();
        assert_eq!(tier.severity, Severity::Critical);
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut policy = BanPolicy::default();
        assert!(policy.validate().is_ok());
        policy.tiers.push(BanTier::new(Severity::Low, 0, HOUR_MS));
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_unbounded_durations() {
        let mut policy = BanPolicy::default();
        policy.tiers[0].duration_ms = MAX_DURATION_MS;
        assert!(policy.validate().is_ok());
        policy.tiers[0].duration_ms = u64::MAX;
        assert!(policy.validate().is_err());

        let policy = BanPolicy { default_duration_ms: u64::MAX / 2, ..BanPolicy::default() };
        assert!(policy.validate().is_err());
    }
}
