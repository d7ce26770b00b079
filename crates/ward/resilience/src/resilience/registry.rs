//! Named circuit breakers.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;
use ward_types::{CircuitBreakerStats, CircuitState};

use super::circuit_breaker::{BreakerReporting, CircuitBreaker};
use crate::config::CircuitBreakerConfig;
use crate::error::{ResilienceError, ResilienceResult};

/// Count of breakers in each state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BreakerStateCounts {
    pub closed: usize,
    pub open: usize,
    pub half_open: usize,
}

/// Process-wide map from name to breaker.
///
/// Breakers are created lazily on first use. The configuration given at
/// creation is kept; later lookups under the same name ignore theirs.
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    default_config: CircuitBreakerConfig,
    reporting: BreakerReporting,
}

impl CircuitBreakerRegistry {
    pub(crate) fn new(default_config: CircuitBreakerConfig, reporting: BreakerReporting) -> Self {
        Self {
            breakers: DashMap::new(),
            default_config,
            reporting,
        }
    }

    /// Get the breaker for `name`, creating it if absent.
    pub fn guard(&self, name: &str, config: Option<CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return existing.value().clone();
        }

        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                let config = config.unwrap_or_else(|| self.default_config.clone());
                info!(
                    breaker = %name,
                    failure_threshold = config.failure_threshold,
                    reset_timeout_ms = config.reset_timeout.as_millis() as u64,
                    "Registered circuit breaker"
                );
                Arc::new(CircuitBreaker::new(name, config, self.reporting.clone()))
            })
            .value()
            .clone()
    }

    /// Look up an existing breaker.
    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.value().clone())
    }

    /// Reset one breaker to closed.
    pub fn reset(&self, name: &str) -> ResilienceResult<()> {
        let breaker = self
            .get(name)
            .ok_or_else(|| ResilienceError::BreakerNotFound(name.to_string()))?;
        breaker.reset();
        Ok(())
    }

    /// Reset every breaker to closed.
    pub fn reset_all(&self) -> usize {
        let breakers = self.snapshot();
        for breaker in &breakers {
            breaker.reset();
        }
        breakers.len()
    }

    /// Stats for every breaker, sorted by name.
    pub fn stats(&self) -> Vec<CircuitBreakerStats> {
        let mut stats: Vec<_> = self.snapshot().iter().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Count breakers by state.
    pub fn state_counts(&self) -> BreakerStateCounts {
        self.snapshot()
            .iter()
            .fold(BreakerStateCounts::default(), |mut counts, breaker| {
                match breaker.state() {
                    CircuitState::Closed => counts.closed += 1,
                    CircuitState::Open => counts.open += 1,
                    CircuitState::HalfOpen => counts.half_open += 1,
                }
                counts
            })
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    // Clone the Arcs out so no shard lock is held while breakers are used.
    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.iter().map(|e| e.value().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::classifier::ErrorClassifier;
    use crate::clock::{Clock, ManualClock};
    use crate::error::CallError;
    use crate::ledger::ErrorLedger;

    fn test_registry() -> CircuitBreakerRegistry {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::starting_now());
        CircuitBreakerRegistry::new(
            CircuitBreakerConfig::new(1, Duration::from_secs(30)),
            BreakerReporting {
                ledger: Arc::new(ErrorLedger::new(clock.clone())),
                classifier: Arc::new(ErrorClassifier::default()),
                clock,
                event_tx: None,
            },
        )
    }

    async fn trip(breaker: &CircuitBreaker) {
        let result: Result<(), CallError<&str>> =
            breaker.execute(|| async { Err("boom") }).await;
        assert!(result.is_err());
    }

    #[test]
    fn test_guard_returns_same_instance() {
        let registry = test_registry();
        let a = registry.guard("payments", None);
        let b = registry.guard("payments", Some(CircuitBreakerConfig::new(9, Duration::from_secs(1))));

        assert!(Arc::ptr_eq(&a, &b));
        // First configuration wins
        assert_eq!(b.config().failure_threshold, 1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_guard_uses_explicit_config() {
        let registry = test_registry();
        let breaker = registry.guard("search", Some(CircuitBreakerConfig::new(4, Duration::from_secs(2))));
        assert_eq!(breaker.config().failure_threshold, 4);
    }

    #[test]
    fn test_reset_unknown_breaker() {
        let registry = test_registry();
        assert!(matches!(
            registry.reset("missing"),
            Err(ResilienceError::BreakerNotFound(name)) if name == "missing"
        ));
    }

    #[tokio::test]
    async fn test_reset_and_counts() {
        let registry = test_registry();
        trip(&registry.guard("a", None)).await;
        trip(&registry.guard("b", None)).await;
        registry.guard("c", None);

        assert_eq!(
            registry.state_counts(),
            BreakerStateCounts {
                closed: 1,
                open: 2,
                half_open: 0
            }
        );

        registry.reset("a").unwrap();
        assert_eq!(registry.state_counts().open, 1);

        assert_eq!(registry.reset_all(), 3);
        assert_eq!(registry.state_counts().closed, 3);
    }

    #[test]
    fn test_stats_sorted_by_name() {
        let registry = test_registry();
        registry.guard("zeta", None);
        registry.guard("alpha", None);

        let names: Vec<_> = registry.stats().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }
}
