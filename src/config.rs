//! Failover layer configuration.
//!
//! Plain serde structs with per-field defaults, so a config file only has
//! to name the fields it overrides:
//!
//! ```toml
//! failure_threshold = 5
//! cooldown_seconds = 60
//! half_open_trial_count = 3
//! ```
//!
//! All values are validated once at registry construction; a bad value is a
//! [`FailoverError::Configuration`] then, never a surprise at call time.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::circuit_breaker::BreakerConfig;
use crate::errors::FailoverError;

fn default_failure_threshold() -> u32 {
    5
}

fn default_cooldown_seconds() -> u64 {
    60
}

fn default_max_cooldown_seconds() -> u64 {
    300
}

fn default_half_open_trial_count() -> u32 {
    3
}

fn default_required_successes() -> u32 {
    2
}

fn default_window_size() -> usize {
    1000
}

fn default_health_check_interval_seconds() -> u64 {
    30
}

fn default_call_timeout_seconds() -> u64 {
    10
}

/// Tuning knobs shared by every endpoint in a registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailoverConfig {
    /// Consecutive-window failures that trip a breaker open.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Base cooldown after a breaker opens.
    #[serde(default = "default_cooldown_seconds")]
    pub cooldown_seconds: u64,

    /// Upper bound for the exponentially growing cooldown.
    #[serde(default = "default_max_cooldown_seconds")]
    pub max_cooldown_seconds: u64,

    /// Requests admitted per half-open trial period.
    #[serde(default = "default_half_open_trial_count")]
    pub half_open_trial_count: u32,

    /// Consecutive half-open successes required to close a breaker.
    #[serde(default = "default_required_successes")]
    pub required_successes: u32,

    /// Maximum samples retained per endpoint latency window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    /// Optional age bound for window samples; old samples are pruned.
    #[serde(default)]
    pub sample_max_age_seconds: Option<u64>,

    /// Interval between background health sweeps.
    #[serde(default = "default_health_check_interval_seconds")]
    pub health_check_interval_seconds: u64,

    /// Default per-attempt deadline for routed calls.
    #[serde(default = "default_call_timeout_seconds")]
    pub call_timeout_seconds: u64,

    /// Cap on candidates tried per routed call; `None` tries them all.
    #[serde(default)]
    pub max_attempts: Option<usize>,
}

impl Default for FailoverConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            cooldown_seconds: default_cooldown_seconds(),
            max_cooldown_seconds: default_max_cooldown_seconds(),
            half_open_trial_count: default_half_open_trial_count(),
            required_successes: default_required_successes(),
            window_size: default_window_size(),
            sample_max_age_seconds: None,
            health_check_interval_seconds: default_health_check_interval_seconds(),
            call_timeout_seconds: default_call_timeout_seconds(),
            max_attempts: None,
        }
    }
}

impl FailoverConfig {
    pub fn validate(&self) -> Result<(), FailoverError> {
        if self.failure_threshold == 0 {
            return Err(FailoverError::Configuration(
                "failure_threshold must be at least 1".into(),
            ));
        }
        if self.cooldown_seconds == 0 {
            return Err(FailoverError::Configuration(
                "cooldown_seconds must be at least 1".into(),
            ));
        }
        if self.max_cooldown_seconds < self.cooldown_seconds {
            return Err(FailoverError::Configuration(
                "max_cooldown_seconds must be >= cooldown_seconds".into(),
            ));
        }
        if self.half_open_trial_count == 0 {
            return Err(FailoverError::Configuration(
                "half_open_trial_count must be at least 1".into(),
            ));
        }
        if self.required_successes == 0 {
            return Err(FailoverError::Configuration(
                "required_successes must be at least 1".into(),
            ));
        }
        if self.window_size == 0 {
            return Err(FailoverError::Configuration(
                "window_size must be at least 1".into(),
            ));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(FailoverError::Configuration(
                "health_check_interval_seconds must be at least 1".into(),
            ));
        }
        if self.call_timeout_seconds == 0 {
            return Err(FailoverError::Configuration(
                "call_timeout_seconds must be at least 1".into(),
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(FailoverError::Configuration(
                "max_attempts must be at least 1 when set".into(),
            ));
        }
        Ok(())
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_seconds)
    }

    pub fn max_cooldown(&self) -> Duration {
        Duration::from_secs(self.max_cooldown_seconds)
    }

    pub fn call_timeout(&self) -> Duration {
        Duration::from_secs(self.call_timeout_seconds)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn sample_max_age(&self) -> Option<Duration> {
        self.sample_max_age_seconds.map(Duration::from_secs)
    }

    pub fn breaker_config(&self) -> BreakerConfig {
        BreakerConfig {
            failure_threshold: self.failure_threshold,
            cooldown: self.cooldown(),
            max_cooldown: self.max_cooldown(),
            half_open_trial_count: self.half_open_trial_count,
            required_successes: self.required_successes,
        }
    }
}
