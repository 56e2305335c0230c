//! # Security Configuration
//!
//! Every tunable lives in one TOML file, loaded once at startup. Missing
//! sections fall back to their defaults.
//!
//! ```toml
//! [audit]
//! capacity = 1000
//!
//! [rate_limits.open_pack]
//! max_requests = 60
//! window_ms = 60000
//! burst_allowed = 10
//!
//! [[bans.tiers]]
//! severity = "critical"
//! threshold = 1
//! duration_ms = 604800000
//!
//! [validator]
//! duplicate_ttl_ms = 3600000
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::audit::AuditConfig;
use crate::ban::BanPolicy;
use crate::error::{SecurityError, SecurityResult};
use crate::rate_limit::RateLimiterConfig;
use crate::validation::ValidatorConfig;

/// Configuration of every subsystem.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Audit logger.
    pub audit: AuditConfig,
    /// Rate limits per action.
    pub rate_limits: RateLimiterConfig,
    /// Ban escalation table.
    pub bans: BanPolicy,
    /// Pack validator.
    pub validator: ValidatorConfig,
}

impl SecurityConfig {
    /// Parses and checks a config from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::InvalidConfig`] if the text does not parse or
    /// a value is out of range.
    pub fn from_toml_str(text: &str) -> SecurityResult<Self> {
        let config: Self =
            toml::from_str(text).map_err(|e| SecurityError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a config file.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::InvalidConfig`] if the file cannot be read or
    /// does not parse.
    pub fn load(path: impl AsRef<Path>) -> SecurityResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| SecurityError::InvalidConfig(format!("{}: {e}", path.display())))?;
        let config = Self::from_toml_str(&text)?;
        tracing::info!(path = %path.display(), "loaded security config");
        Ok(config)
    }

    /// Checks value ranges across every section.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError::InvalidConfig`] naming the bad section.
    pub fn validate(&self) -> SecurityResult<()> {
        if self.audit.capacity == 0 {
            return Err(SecurityError::InvalidConfig("audit.capacity must be positive".to_string()));
        }
        self.rate_limits
            .validate()
            .map_err(|e| SecurityError::InvalidConfig(format!("rate_limits.{e}")))?;
        self.bans
            .validate()
            .map_err(|e| SecurityError::InvalidConfig(format!("bans: {e}")))?;
        self.validator
            .validate()
            .map_err(|e| SecurityError::InvalidConfig(format!("validator: {e}")))?;
        Ok(())
    }
}
