//! # DadDeck Security - The Pack Guard
//!
//! Anti-cheat and abuse mitigation for the pack-open endpoint.
//!
//! ## Subsystems
//!
//! - **Pack Validator**: duplicates, slot odds, score anomalies, entropy
//! - **Rate Limiter**: fixed windows with a burst allowance, per action
//! - **Ban System**: escalation table over violation severity
//! - **Audit Logger**: bounded ring, fire-and-forget writer thread
//!
//! ## Request Flow
//!
//! ```text
//! open_pack(identifier, pack)
//!     │
//!     ├─► BanSystem::is_banned ──────────► refuse if banned
//!     │
//!     ├─► RateLimiter::record ───────────► refuse if over the window
//!     │
//!     ├─► PackValidator::validate ───────► verdict
//!     │         │
//!     │         └──(AuditSink, non-blocking)──► AuditLogger
//!     │
//!     └─► BanSystem::check_auto_ban_threshold(violations)
//!               │
//!               └──(log)──► AuditLogger
//! ```
//!
//! The orchestration itself belongs to the caller; every subsystem is
//! `Send + Sync` and meant to be shared behind an `Arc`.
//!
//! ## Example
//!
//! ```rust
//! use daddeck_core::{GenerationConfig, Item, Pack, Rarity};
//! use daddeck_security::{PackValidator, ValidateOptions};
//!
//! let config = GenerationConfig::standard();
//! let pack = Pack::new(
//!     "pack-1",
//!     vec![
//!         Item::new("grillmaster-gary", Rarity::Common),
//!         Item::new("lawnmower-larry", Rarity::Common),
//!         Item::new("thermostat-ted", Rarity::Common),
//!         Item::new("cargo-shorts-carl", Rarity::Uncommon),
//!         Item::new("dad-joke-dan", Rarity::Uncommon),
//!         Item::new("bbq-baron-bob", Rarity::Rare),
//!     ],
//!     chrono::Utc::now(),
//!     &config.id,
//! );
//!
//! let validator = PackValidator::default();
//! let verdict = validator.validate(&pack, &config, &ValidateOptions::new());
//! assert!(verdict.valid);
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![deny(clippy::perf)]

pub mod audit;
pub mod ban;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod validation;

pub use audit::{
    AuditAction, AuditConfig, AuditEntry, AuditLogger, AuditQuery, AuditSink, AuditStats,
    AuditWriterStats, Offender,
};
pub use ban::{BanOptions, BanPolicy, BanRecord, BanStats, BanStatus, BanSystem, BanTerm, BanTier};
pub use config::SecurityConfig;
pub use error::{SecurityError, SecurityResult};
pub use rate_limit::{
    ApiTier, RateLimitConfig, RateLimitStatus, RateLimiter, RateLimiterConfig, TierLimit,
};
pub use validation::{
    CheckKind, ConfidenceWeights, MemoryPackCache, PackValidator, RecentPackCache, ScoreHistory,
    ValidateOptions, ValidationVerdict, ValidatorConfig, ValidatorStats, Violation, ViolationKind,
    Warning,
};
