//! Resilience configuration.
//!
//! Defines configuration for the ledger, breakers, retries, health polling and
//! mitigation dispatch. Durations travel as integer milliseconds.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use ward_types::{DeploymentProfile, ErrorKind};

use crate::error::{ResilienceError, ResilienceResult};

/// Configuration for a resilience context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Ledger retention and threshold configuration.
    pub ledger: LedgerConfig,

    /// Defaults for lazily created circuit breakers.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Default retry policy.
    pub retry: RetryConfig,

    /// Health aggregation configuration.
    pub health: HealthConfig,

    /// Mitigation dispatch configuration.
    pub prevention: PreventionConfig,
}

impl ResilienceConfig {
    /// Create config tuned for a deployment profile.
    pub fn for_profile(profile: DeploymentProfile) -> Self {
        let mut config = Self::default();

        match profile {
            DeploymentProfile::Development => {
                // Local iteration: tolerate noise, recover quickly
                for threshold in config.ledger.thresholds.values_mut() {
                    *threshold = threshold.saturating_mul(2);
                }
                config.circuit_breaker.reset_timeout = Duration::from_secs(5);
                config.retry.max_retries = 2;
            }
            DeploymentProfile::Staging => {}
            DeploymentProfile::Production => {
                // Production: back off harder from failing dependencies
                config.circuit_breaker.reset_timeout = Duration::from_secs(60);
                config.retry.jitter = true;
                config.ledger.retention = Duration::from_secs(7 * 24 * 60 * 60);
            }
        }

        config
    }

    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(document: &str) -> ResilienceResult<Self> {
        let config: Self = toml::from_str(document)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the components cannot honour.
    pub fn validate(&self) -> ResilienceResult<()> {
        self.circuit_breaker.validate()?;
        self.retry.validate()?;

        if self.ledger.threshold_window.is_zero() {
            return Err(config_error("ledger.threshold_window must be non-zero"));
        }
        if let Some((kind, _)) = self.ledger.thresholds.iter().find(|(_, t)| **t == 0) {
            return Err(config_error(format!(
                "ledger threshold for {} must be at least 1",
                kind
            )));
        }
        if self.health.poll_interval.is_zero() || self.health.error_rate_window.is_zero() {
            return Err(config_error("health intervals must be non-zero"));
        }
        if self.health.degraded_error_rate == 0
            || self.health.degraded_error_rate > self.health.critical_error_rate
        {
            return Err(config_error(
                "health.degraded_error_rate must be in 1..=critical_error_rate",
            ));
        }
        if self.prevention.tick_interval.is_zero() || self.prevention.eviction_interval.is_zero() {
            return Err(config_error("prevention intervals must be non-zero"));
        }

        Ok(())
    }
}

/// Ledger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// How long resolved entries are retained before eviction.
    #[serde(rename = "retention_ms", with = "duration_ms")]
    pub retention: Duration,

    /// Window over which threshold breaches are counted.
    #[serde(rename = "threshold_window_ms", with = "duration_ms")]
    pub threshold_window: Duration,

    /// Occurrences per window that constitute a breach, by kind. Kinds left
    /// out of a document keep their default.
    #[serde(deserialize_with = "thresholds_over_defaults")]
    pub thresholds: BTreeMap<ErrorKind, u32>,

    /// Messages longer than this are truncated on classification.
    pub max_message_len: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            retention: Duration::from_secs(24 * 60 * 60),
            threshold_window: Duration::from_secs(60),
            thresholds: default_thresholds(),
            max_message_len: 512,
        }
    }
}

impl LedgerConfig {
    /// Threshold for a kind, if one is configured.
    pub fn threshold_for(&self, kind: ErrorKind) -> Option<u32> {
        self.thresholds.get(&kind).copied()
    }
}

/// Default per-minute breach thresholds.
pub fn default_thresholds() -> BTreeMap<ErrorKind, u32> {
    BTreeMap::from([
        (ErrorKind::TransientIo, 5),
        (ErrorKind::ReloadStorm, 3),
        (ErrorKind::RunawayUpdate, 1),
        (ErrorKind::InvariantViolation, 10),
        (ErrorKind::ResourcePressure, 2),
    ])
}

fn thresholds_over_defaults<'de, D>(deserializer: D) -> Result<BTreeMap<ErrorKind, u32>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let overrides = BTreeMap::<ErrorKind, u32>::deserialize(deserializer)?;
    let mut thresholds = default_thresholds();
    thresholds.extend(overrides);
    Ok(thresholds)
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// Time to wait before letting a trial call through.
    #[serde(rename = "reset_timeout_ms", with = "duration_ms")]
    pub reset_timeout: Duration,

    /// Trial calls allowed while half-open.
    pub half_open_trial_limit: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_trial_limit: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, reset_timeout: Duration) -> Self {
        Self {
            failure_threshold,
            reset_timeout,
            ..Self::default()
        }
    }

    pub fn with_half_open_trial_limit(mut self, limit: u32) -> Self {
        self.half_open_trial_limit = limit;
        self
    }

    pub fn validate(&self) -> ResilienceResult<()> {
        if self.failure_threshold == 0 {
            return Err(config_error(
                "circuit_breaker.failure_threshold must be at least 1",
            ));
        }
        if self.half_open_trial_limit == 0 {
            return Err(config_error(
                "circuit_breaker.half_open_trial_limit must be at least 1",
            ));
        }
        Ok(())
    }

    /// Clamp counters to their minimum of 1.
    pub(crate) fn normalized(mut self) -> Self {
        self.failure_threshold = self.failure_threshold.max(1);
        self.half_open_trial_limit = self.half_open_trial_limit.max(1);
        self
    }
}

/// Retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,

    /// Delay before the first retry.
    #[serde(rename = "base_delay_ms", with = "duration_ms")]
    pub base_delay: Duration,

    /// Upper bound on any single delay.
    #[serde(rename = "max_delay_ms", with = "duration_ms")]
    pub max_delay: Duration,

    /// Growth factor between consecutive delays.
    pub backoff_multiplier: f64,

    /// Scale each delay by a random factor in [0.5, 1.0].
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: false,
        }
    }
}

impl RetryConfig {
    pub fn new(
        max_retries: u32,
        base_delay: Duration,
        max_delay: Duration,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            backoff_multiplier,
            jitter: false,
        }
    }

    /// Deterministic delay before retry number `retry` (0-based):
    /// `min(base_delay * multiplier^retry, max_delay)`.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let factor = self.backoff_multiplier.max(1.0).powi(exponent);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);

        if capped.is_finite() && capped >= 0.0 {
            Duration::from_millis(capped as u64)
        } else {
            self.max_delay
        }
    }

    pub fn validate(&self) -> ResilienceResult<()> {
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(config_error("retry.backoff_multiplier must be >= 1.0"));
        }
        if self.base_delay > self.max_delay {
            return Err(config_error("retry.base_delay must not exceed retry.max_delay"));
        }
        Ok(())
    }
}

/// Health aggregation configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Interval between scheduled polls.
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,

    /// Window the error rate is measured over.
    #[serde(rename = "error_rate_window_ms", with = "duration_ms")]
    pub error_rate_window: Duration,

    /// Error rate at or above which the system is critical.
    pub critical_error_rate: usize,

    /// Error rate at or above which the system is degraded.
    pub degraded_error_rate: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            error_rate_window: Duration::from_secs(60),
            critical_error_rate: 5,
            degraded_error_rate: 1,
        }
    }
}

/// Mitigation dispatch configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreventionConfig {
    /// Interval between dispatcher ticks.
    #[serde(rename = "tick_interval_ms", with = "duration_ms")]
    pub tick_interval: Duration,

    /// Interval between ledger evictions.
    #[serde(rename = "eviction_interval_ms", with = "duration_ms")]
    pub eviction_interval: Duration,
}

impl Default for PreventionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

fn config_error(message: impl Into<String>) -> ResilienceError {
    ResilienceError::ConfigurationError(message.into())
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        u64::try_from(duration.as_millis())
            .unwrap_or(u64::MAX)
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
