//! Audit entries and the actions they record.

use chrono::{DateTime, Utc};
use daddeck_core::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What happened.
///
/// Serialized as a plain snake_case string so exported logs stay a flat JSON
/// array; unknown strings survive a round trip as [`AuditAction::Custom`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuditAction {
    /// A pack failed validation.
    PackRejected,
    /// A pack passed but produced warnings or non-critical violations.
    PackFlagged,
    /// A pack was submitted again inside the duplicate window.
    DuplicatePack,
    /// A request was refused by the rate limiter.
    RateLimitExceeded,
    /// A ban was created or extended.
    BanApplied,
    /// A ban was lifted by an operator.
    BanLifted,
    /// A temporary ban ran out and was deactivated on read.
    BanExpired,
    /// Persisted state became unavailable and a subsystem fell back to memory.
    StorageDegraded,
    /// Anything else.
    Custom(String),
}

impl AuditAction {
    /// Wire name of the action.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::PackRejected => "pack_rejected",
            Self::PackFlagged => "pack_flagged",
            Self::DuplicatePack => "duplicate_pack",
            Self::RateLimitExceeded => "rate_limit_exceeded",
            Self::BanApplied => "ban_applied",
            Self::BanLifted => "ban_lifted",
            Self::BanExpired => "ban_expired",
            Self::StorageDegraded => "storage_degraded",
            Self::Custom(name) => name,
        }
    }

    /// Returns true if the action counts against the identifier in offender
    /// rankings.
    #[must_use]
    pub const fn is_violation(&self) -> bool {
        matches!(
            self,
            Self::PackRejected | Self::PackFlagged | Self::DuplicatePack | Self::RateLimitExceeded
        )
    }
}

impl From<String> for AuditAction {
    fn from(value: String) -> Self {
        match value.as_str() {
            "pack_rejected" => Self::PackRejected,
            "pack_flagged" => Self::PackFlagged,
            "duplicate_pack" => Self::DuplicatePack,
            "rate_limit_exceeded" => Self::RateLimitExceeded,
            "ban_applied" => Self::BanApplied,
            "ban_lifted" => Self::BanLifted,
            "ban_expired" => Self::BanExpired,
            "storage_degraded" => Self::StorageDegraded,
            _ => Self::Custom(value),
        }
    }
}

impl From<&str> for AuditAction {
    fn from(value: &str) -> Self {
        Self::from(value.to_string())
    }
}

impl From<AuditAction> for String {
    fn from(action: AuditAction) -> Self {
        match action {
            AuditAction::Custom(name) => name,
            other => other.as_str().to_string(),
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of the audit log. Never edited after creation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Unique entry id.
    pub id: String,
    /// When the event was recorded (ISO-8601 on the wire).
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub action: AuditAction,
    /// Normalized identifier the event concerns.
    pub identifier: String,
    /// How serious it is.
    pub severity: Severity,
    /// Free-form structured context.
    pub details: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_string_round_trip() {
        for action in [
            AuditAction::PackRejected,
            AuditAction::BanExpired,
            AuditAction::Custom("manual_review_note".to_string()),
        ] {
            let text: String = action.clone().into();
            assert_eq!(AuditAction::from(text), action);
        }
    }

    #[test]
    fn test_action_serializes_flat() {
        let json = serde_json::to_string(&AuditAction::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"rate_limit_exceeded\"");
        let custom: AuditAction = serde_json::from_str("\"shadow_flag\"").unwrap();
        assert_eq!(custom, AuditAction::Custom("shadow_flag".to_string()));
    }

    #[test]
    fn test_violation_actions() {
        assert!(AuditAction::DuplicatePack.is_violation());
        assert!(!AuditAction::BanApplied.is_violation());
        assert!(!AuditAction::from("pack_rejected_manually").is_violation());
    }
}
