//! Search configuration
//!
//! [`SearchConfig`] is an immutable value handed to the coordinator and
//! every branch controller. It deserializes from a flat table with
//! durations given in (fractional) seconds under `*_secs` keys.

use refract_candidate::PromptLimits;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration validation error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    /// Count below its minimum
    #[error("{field} must be at least {min}, got {value}")]
    TooSmall {
        /// Field name
        field: &'static str,
        /// Minimum accepted value
        min: u64,
        /// Provided value
        value: u64,
    },

    /// Target score is NaN or infinite
    #[error("target_score must be finite, got {0}")]
    NonFiniteTarget(f64),

    /// Job prefix empty or unusable in file names
    #[error("invalid job prefix {0:?}")]
    InvalidPrefix(String),
}

/// Search parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Independent branches to run
    pub max_branches: u32,
    /// Attempt budget per branch
    pub max_attempts_per_branch: u32,
    /// Consecutive non-improving attempts before a branch stops
    pub max_stale: u32,
    /// Dispatch attempts per job, including the first
    pub retry_bound: u32,
    /// Delay between dispatch attempts
    #[serde(rename = "retry_backoff_secs", with = "duration_secs")]
    pub retry_backoff: Duration,
    /// Pause between attempts and between exploitation renders
    #[serde(rename = "inter_attempt_delay_secs", with = "duration_secs")]
    pub inter_attempt_delay: Duration,
    /// Bound on waiting for an artifact
    #[serde(rename = "discovery_timeout_secs", with = "duration_secs")]
    pub discovery_timeout: Duration,
    /// Bound on one scoring call
    #[serde(rename = "scoring_timeout_secs", with = "duration_secs")]
    pub scoring_timeout: Duration,
    /// Bound on one refinement call
    #[serde(rename = "refinement_timeout_secs", with = "duration_secs")]
    pub refinement_timeout: Duration,
    /// Stop a branch once its best total reaches this value
    pub target_score: Option<f64>,
    /// Confidence renders of the winner
    pub final_variant_count: u32,
    /// Concurrent renders per attempt
    pub variants_per_attempt: u32,
    /// Seed refinement from the best candidate after a regression
    pub reanchor_on_regression: bool,
    /// Run branches concurrently instead of one after another
    pub concurrent_branches: bool,
    /// Send the previous artifact along with refinement requests
    pub multimodal_refinement: bool,
    /// Sanitizer budgets
    pub prompt_limits: PromptLimits,
    /// Fixed seed for reproducible synthesis seeds
    pub rng_seed: Option<u64>,
    /// Square image edge in pixels
    pub image_size: u32,
    /// Prefix for every job identity
    pub job_prefix: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_branches: 3,
            max_attempts_per_branch: 3,
            max_stale: 2,
            retry_bound: 3,
            retry_backoff: Duration::from_secs(2),
            inter_attempt_delay: Duration::from_secs(5),
            discovery_timeout: Duration::from_secs(300),
            scoring_timeout: Duration::from_secs(120),
            refinement_timeout: Duration::from_secs(120),
            target_score: None,
            final_variant_count: 2,
            variants_per_attempt: 1,
            reanchor_on_regression: true,
            concurrent_branches: false,
            multimodal_refinement: false,
            prompt_limits: PromptLimits::default(),
            rng_seed: None,
            image_size: 768,
            job_prefix: "refract".to_string(),
        }
    }
}

impl SearchConfig {
    /// Create default config
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set branch count
    #[inline]
    #[must_use]
    pub fn with_max_branches(mut self, branches: u32) -> Self {
        self.max_branches = branches;
        self
    }

    /// Set attempts per branch
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts_per_branch = attempts;
        self
    }

    /// Set stagnation threshold
    #[inline]
    #[must_use]
    pub fn with_max_stale(mut self, max_stale: u32) -> Self {
        self.max_stale = max_stale;
        self
    }

    /// Set dispatch retry bound and backoff
    #[inline]
    #[must_use]
    pub fn with_retry(mut self, bound: u32, backoff: Duration) -> Self {
        self.retry_bound = bound;
        self.retry_backoff = backoff;
        self
    }

    /// Set inter-attempt delay
    #[inline]
    #[must_use]
    pub fn with_inter_attempt_delay(mut self, delay: Duration) -> Self {
        self.inter_attempt_delay = delay;
        self
    }

    /// Set artifact discovery timeout
    #[inline]
    #[must_use]
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set target score
    #[inline]
    #[must_use]
    pub fn with_target_score(mut self, target: f64) -> Self {
        self.target_score = Some(target);
        self
    }

    /// Set exploitation render count
    #[inline]
    #[must_use]
    pub fn with_final_variants(mut self, count: u32) -> Self {
        self.final_variant_count = count;
        self
    }

    /// Set renders per attempt
    #[inline]
    #[must_use]
    pub fn with_variants_per_attempt(mut self, variants: u32) -> Self {
        self.variants_per_attempt = variants;
        self
    }

    /// Enable or disable the regression guard
    #[inline]
    #[must_use]
    pub fn with_reanchor_on_regression(mut self, enabled: bool) -> Self {
        self.reanchor_on_regression = enabled;
        self
    }

    /// Run branches concurrently
    #[inline]
    #[must_use]
    pub fn with_concurrent_branches(mut self, enabled: bool) -> Self {
        self.concurrent_branches = enabled;
        self
    }

    /// Send artifacts to the refinement oracle
    #[inline]
    #[must_use]
    pub fn with_multimodal_refinement(mut self, enabled: bool) -> Self {
        self.multimodal_refinement = enabled;
        self
    }

    /// Fix the random seed
    #[inline]
    #[must_use]
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    /// Set job prefix
    #[inline]
    #[must_use]
    pub fn with_job_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.job_prefix = prefix.into();
        self
    }

    /// Check the configuration is runnable
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let at_least_one = [
            ("max_branches", self.max_branches),
            ("max_attempts_per_branch", self.max_attempts_per_branch),
            ("max_stale", self.max_stale),
            ("retry_bound", self.retry_bound),
            ("variants_per_attempt", self.variants_per_attempt),
            ("image_size", self.image_size),
        ];
        for (field, value) in at_least_one {
            if value < 1 {
                return Err(ConfigError::TooSmall {
                    field,
                    min: 1,
                    value: u64::from(value),
                });
            }
        }
        if let Some(target) = self.target_score {
            if !target.is_finite() {
                return Err(ConfigError::NonFiniteTarget(target));
            }
        }
        let prefix_ok = !self.job_prefix.trim().is_empty()
            && !self.job_prefix.contains(['/', '\\'])
            && !self.job_prefix.chars().any(char::is_control);
        if !prefix_ok {
            return Err(ConfigError::InvalidPrefix(self.job_prefix.clone()));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SearchConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_counts_rejected() {
        let err = SearchConfig::new().with_max_stale(0).validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::TooSmall {
                field: "max_stale",
                min: 1,
                value: 0
            }
        );
        assert!(SearchConfig::new().with_variants_per_attempt(0).validate().is_err());
    }

    #[test]
    fn non_finite_target_rejected() {
        let err = SearchConfig::new().with_target_score(f64::NAN).validate().unwrap_err();
        assert!(matches!(err, ConfigError::NonFiniteTarget(_)));
    }

    #[test]
    fn prefix_with_separator_rejected() {
        assert!(SearchConfig::new().with_job_prefix("a/b").validate().is_err());
        assert!(SearchConfig::new().with_job_prefix("  ").validate().is_err());
        assert!(SearchConfig::new().with_job_prefix("control_room_part1").validate().is_ok());
    }

    #[test]
    fn durations_serialize_as_seconds() {
        let config = SearchConfig::new().with_retry(3, Duration::from_millis(1500));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["retry_backoff_secs"], serde_json::json!(1.5));
        assert!(value.get("retry_backoff").is_none());
    }
}
