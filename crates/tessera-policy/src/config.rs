//! Access-control configuration.
//!
//! Decides how strictly the enforcement pipeline treats merge conflicts,
//! broken policy rules and environment references that do not resolve.
//!
//! # Example (TOML)
//!
//! ```toml
//! conflict_mode = "reject"
//! rule_errors = "skip"
//! unresolved_env = "null"
//!
//! [cache]
//! enabled = true
//! ttl = "5m"
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::PolicyResult;
use crate::error::PolicyError;

/// Root access-control configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessControlConfig {
    /// What happens when the caller's query contradicts the policies.
    pub conflict_mode: ConflictMode,

    /// What happens when a single policy rule fails to translate.
    pub rule_errors: RuleErrorMode,

    /// What an environment reference that does not resolve becomes.
    pub unresolved_env: UnresolvedEnvMode,

    /// Policy cache settings.
    pub cache: PolicyCacheConfig,
}

/// Handling of merge conflicts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictMode {
    /// Refuse the request with a `PolicyConflict` error.
    #[default]
    Reject,
    /// Keep the merged query and hand the conflicts back to the caller.
    Report,
}

/// Handling of per-rule translation failures.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleErrorMode {
    /// Log the failure and drop the rule's contribution.
    #[default]
    Skip,
    /// Abort the whole request.
    Abort,
}

/// Handling of environment references that do not resolve.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedEnvMode {
    /// Substitute a JSON `null` operand.
    #[default]
    Null,
    /// Abort the request.
    Reject,
}

/// Policy cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyCacheConfig {
    /// Cache active policies per app.
    pub enabled: bool,

    /// How long cached policies stay valid.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for PolicyCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(300), // 5 minutes
        }
    }
}

impl PolicyCacheConfig {
    /// The TTL as a `time::Duration`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the TTL does not fit.
    pub fn ttl(&self) -> PolicyResult<time::Duration> {
        time::Duration::try_from(self.ttl)
            .map_err(|e| PolicyError::configuration(format!("cache.ttl out of range: {e}")))
    }
}

impl AccessControlConfig {
    /// Parses and validates a TOML document.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document does not parse or does
    /// not validate.
    pub fn from_toml_str(source: &str) -> PolicyResult<Self> {
        let config: Self = toml::from_str(source)
            .map_err(|e| PolicyError::configuration(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the cache is enabled with a zero TTL.
    pub fn validate(&self) -> PolicyResult<()> {
        if self.cache.enabled && self.cache.ttl.is_zero() {
            return Err(PolicyError::configuration(
                "cache.ttl must be greater than zero when the cache is enabled",
            ));
        }
        self.cache.ttl()?;
        Ok(())
    }
}
