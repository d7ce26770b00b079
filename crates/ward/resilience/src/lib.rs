//! # Ward Resilience - Failure Classification, Circuit Breaking and Health
//!
//! This crate is the runtime half of Ward: it classifies failure signals,
//! aggregates them in a deduplicating ledger, protects risky operations with
//! circuit breakers and retries, and derives a single health status.
//!
//! ## Overview
//!
//! Data flows in one direction:
//!
//! ```text
//! RawSignal -> ErrorClassifier -> ErrorLedger -> { HealthAggregator, PreventionDispatcher }
//! ```
//!
//! Independently, application code runs operations through the
//! [`RetryExecutor`], which consults a named [`CircuitBreaker`] and reports
//! every failed attempt into the same ledger.
//!
//! ## Key Components
//!
//! - [`ResilienceContext`]: Owner of all state; the entry point for hosts
//! - [`ErrorClassifier`]: Maps raw signals onto the error taxonomy
//! - [`ErrorLedger`]: Deduplicating store with threshold detection
//! - [`resilience`]: Circuit breakers, the breaker registry and retries
//! - [`HealthAggregator`]: Derives healthy / degraded / critical
//! - [`PreventionDispatcher`]: Invokes host mitigation hooks once per entry
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use ward_resilience::{CircuitBreakerConfig, ResilienceConfig, ResilienceContext};
//! use ward_types::{DeploymentProfile, RawSignal};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let context = ResilienceContext::new(ResilienceConfig::for_profile(
//!     DeploymentProfile::Production,
//! ))?;
//! context.start_scheduler()?;
//!
//! // Collaborators push failures in
//! context.report_signal(&RawSignal::http_failure(503, "/api/widgets"));
//!
//! // Risky calls go through a breaker with retries
//! context.guard("inventory", Some(CircuitBreakerConfig::new(3, Duration::from_secs(10))));
//! let stock: Result<u32, _> = context
//!     .execute(|| async { Ok::<_, std::io::Error>(12) }, Some("inventory"))
//!     .await;
//!
//! println!("status: {}", context.get_health().status);
//! context.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Concurrency
//!
//! Every component is safe to share across tasks. Breaker transitions are
//! serialised per breaker and ledger updates under a single lock; no lock is
//! held while an operation or mitigation hook runs.

#![deny(unsafe_code)]

pub mod classifier;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod health;
pub mod ledger;
pub mod prevention;
pub mod resilience;
pub mod scheduler;

// Re-export main types
pub use classifier::{ClassificationRule, ErrorClassifier, MEMORY_PRESSURE_PERCENT};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    default_thresholds, CircuitBreakerConfig, HealthConfig, LedgerConfig, PreventionConfig,
    ResilienceConfig, RetryConfig,
};
pub use context::{ResilienceContext, ResilienceContextBuilder, EVENT_CHANNEL_CAPACITY};
pub use error::{CallError, CircuitOpenError, ResilienceError, ResilienceResult};
pub use health::HealthAggregator;
pub use ledger::{ErrorLedger, THRESHOLD_SOURCE_PREFIX};
pub use prevention::{MitigationHook, PreventionDispatcher, PreventionReport};
pub use resilience::{
    BreakerStateCounts, CircuitBreaker, CircuitBreakerRegistry, RetryExecutor, UNGUARDED_SOURCE,
};
pub use scheduler::Scheduler;

#[cfg(test)]
mod tests {
    use super::*;
    use ward_types::{DeploymentProfile, HealthStatus};

    #[test]
    fn test_profile_configs_build() {
        for profile in [
            DeploymentProfile::Development,
            DeploymentProfile::Staging,
            DeploymentProfile::Production,
        ] {
            let context = ResilienceContext::new(ResilienceConfig::for_profile(profile)).unwrap();
            assert_eq!(context.get_health().status, HealthStatus::Healthy);
        }
    }
}
