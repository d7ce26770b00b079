//! Circuit breaker pattern for resilience.
//!
//! Prevents cascading failures by tracking consecutive failures of a named
//! operation and refusing to run it for a cooldown once a threshold is hit.
//!
//! The read-check-act sequence of every call is serialised under a single
//! mutex; the operation itself runs outside the lock.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ward_types::{
    CircuitBreakerStats, CircuitState, ClassifiedErrorDraft, ErrorKind, ResilienceEvent, Severity,
};

use crate::classifier::ErrorClassifier;
use crate::clock::{elapsed_between, Clock};
use crate::config::CircuitBreakerConfig;
use crate::error::{CallError, CircuitOpenError};
use crate::ledger::ErrorLedger;

/// Where a breaker reports what it sees.
#[derive(Clone)]
pub(crate) struct BreakerReporting {
    pub ledger: Arc<ErrorLedger>,
    pub classifier: Arc<ErrorClassifier>,
    pub clock: Arc<dyn Clock>,
    pub event_tx: Option<broadcast::Sender<ResilienceEvent>>,
}

/// Mutable breaker state, guarded by the breaker mutex.
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<DateTime<Utc>>,
    last_transition: DateTime<Utc>,
    trials_in_flight: u32,
    /// Bumped on every transition so outcomes of calls admitted under an
    /// earlier state are not applied to a later one.
    generation: u64,
    total_calls: u64,
    total_failures: u64,
    rejected_calls: u64,
}

/// Admission granted to a single call.
#[derive(Debug, Clone, Copy)]
struct Permit {
    generation: u64,
    trial: bool,
}

/// Holds a permit while the operation runs.
///
/// A trial whose outcome is never reported (the call future was dropped
/// mid-flight) gives its half-open slot back on drop.
struct PermitGuard<'a> {
    breaker: &'a CircuitBreaker,
    permit: Permit,
    settled: bool,
}

impl PermitGuard<'_> {
    fn succeed(mut self) {
        self.settled = true;
        self.breaker.on_success(self.permit);
    }

    fn fail(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.permit);
    }
}

impl Drop for PermitGuard<'_> {
    fn drop(&mut self) {
        if !self.settled && self.permit.trial {
            self.breaker.release_trial(self.permit);
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    from: CircuitState,
    to: CircuitState,
    at: DateTime<Utc>,
    failures: u32,
}

/// Circuit breaker guarding one named operation.
///
/// - Closed: calls run; consecutive failures are counted
/// - Open: calls are refused with [`CircuitOpenError`]
/// - Half-Open: a limited number of trial calls run to check for recovery
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    reporting: BreakerReporting,
}

impl CircuitBreaker {
    pub(crate) fn new(
        name: impl Into<String>,
        config: CircuitBreakerConfig,
        reporting: BreakerReporting,
    ) -> Self {
        let now = reporting.clock.now();
        Self {
            name: name.into(),
            config: config.normalized(),
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                failure_count: 0,
                opened_at: None,
                last_transition: now,
                trials_in_flight: 0,
                generation: 0,
                total_calls: 0,
                total_failures: 0,
                rejected_calls: 0,
            }),
            reporting,
        }
    }

    /// Breaker name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Breaker configuration.
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Current state.
    ///
    /// A pure read: an expired open breaker reports `Open` until the next
    /// call moves it to half-open.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// Consecutive failures counted in the closed state.
    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// When the breaker last opened, if it is open or half-open.
    pub fn opened_at(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().opened_at
    }

    /// Run `op` under the breaker.
    ///
    /// Returns [`CallError::CircuitOpen`] without invoking `op` when the
    /// breaker refuses, and [`CallError::Operation`] when `op` itself fails.
    /// Every failure of `op` is recorded in the ledger.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CallError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let guard = PermitGuard {
            breaker: self,
            permit: self.admit()?,
            settled: false,
        };

        match op().await {
            Ok(value) => {
                guard.succeed();
                Ok(value)
            }
            Err(error) => {
                self.reporting.ledger.record(
                    self.reporting
                        .classifier
                        .classify_failure(&self.name, &error),
                );
                guard.fail();
                Err(CallError::Operation(error))
            }
        }
    }

    /// Force the breaker back to closed with counters zeroed.
    pub fn reset(&self) {
        let now = self.reporting.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            inner.failure_count = 0;
            if inner.state == CircuitState::Closed {
                None
            } else {
                Some(self.transition(&mut inner, CircuitState::Closed, now))
            }
        };

        info!(breaker = %self.name, "Circuit breaker reset");
        if let Some(transition) = transition {
            self.publish(transition);
        }
    }

    /// Breaker statistics.
    pub fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.lock();
        CircuitBreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            opened_at: inner.opened_at,
            last_transition: inner.last_transition,
            total_calls: inner.total_calls,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
        }
    }

    /// Decide whether a call may proceed.
    fn admit(&self) -> Result<Permit, CircuitOpenError> {
        let now = self.reporting.clock.now();
        let mut transition = None;

        let admitted = {
            let mut inner = self.inner.lock();

            if inner.state == CircuitState::Open {
                let elapsed = inner
                    .opened_at
                    .map(|at| elapsed_between(at, now))
                    .unwrap_or(self.config.reset_timeout);

                if elapsed >= self.config.reset_timeout {
                    transition = Some(self.transition(&mut inner, CircuitState::HalfOpen, now));
                } else {
                    inner.rejected_calls += 1;
                    let retry_after = self.config.reset_timeout.saturating_sub(elapsed);
                    debug!(
                        breaker = %self.name,
                        retry_after_ms = retry_after.as_millis() as u64,
                        "Call refused by open circuit"
                    );
                    return Err(CircuitOpenError {
                        breaker: self.name.clone(),
                        retry_after,
                    });
                }
            }

            let state = inner.state;
            match state {
                CircuitState::Closed => {
                    inner.total_calls += 1;
                    Ok(Permit {
                        generation: inner.generation,
                        trial: false,
                    })
                }
                CircuitState::HalfOpen
                    if inner.trials_in_flight < self.config.half_open_trial_limit =>
                {
                    inner.trials_in_flight += 1;
                    inner.total_calls += 1;
                    Ok(Permit {
                        generation: inner.generation,
                        trial: true,
                    })
                }
                _ => {
                    inner.rejected_calls += 1;
                    debug!(breaker = %self.name, "Call refused, half-open trials exhausted");
                    Err(CircuitOpenError {
                        breaker: self.name.clone(),
                        retry_after: Duration::ZERO,
                    })
                }
            }
        };

        if let Some(transition) = transition {
            info!(breaker = %self.name, "Circuit breaker half-open after reset timeout");
            self.publish(transition);
        }

        admitted
    }

    fn on_success(&self, permit: Permit) {
        let now = self.reporting.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            if inner.generation != permit.generation {
                return;
            }

            let state = inner.state;
            match state {
                CircuitState::Closed => {
                    inner.failure_count = 0;
                    None
                }
                CircuitState::HalfOpen if permit.trial => {
                    Some(self.transition(&mut inner, CircuitState::Closed, now))
                }
                _ => None,
            }
        };

        if let Some(transition) = transition {
            info!(breaker = %self.name, "Circuit breaker closing after successful trial");
            self.publish(transition);
        }
    }

    fn on_failure(&self, permit: Permit) {
        let now = self.reporting.clock.now();
        let transition = {
            let mut inner = self.inner.lock();
            inner.total_failures += 1;
            if inner.generation != permit.generation {
                return;
            }

            let state = inner.state;
            match state {
                CircuitState::Closed => {
                    inner.failure_count += 1;
                    (inner.failure_count >= self.config.failure_threshold)
                        .then(|| self.transition(&mut inner, CircuitState::Open, now))
                }
                CircuitState::HalfOpen if permit.trial => {
                    Some(self.transition(&mut inner, CircuitState::Open, now))
                }
                _ => None,
            }
        };

        if let Some(transition) = transition {
            self.on_opened(transition);
        }
    }

    /// Return an abandoned trial slot, if the breaker is still in the
    /// half-open period that granted it.
    fn release_trial(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        if inner.generation == permit.generation
            && inner.state == CircuitState::HalfOpen
            && inner.trials_in_flight > 0
        {
            inner.trials_in_flight -= 1;
            debug!(breaker = %self.name, "Abandoned half-open trial released");
        }
    }

    /// Apply a transition under the lock. Side effects happen after unlock.
    fn transition(
        &self,
        inner: &mut BreakerInner,
        to: CircuitState,
        now: DateTime<Utc>,
    ) -> Transition {
        let transition = Transition {
            from: inner.state,
            to,
            at: now,
            failures: inner.failure_count,
        };

        inner.state = to;
        inner.last_transition = now;
        inner.generation += 1;
        inner.trials_in_flight = 0;

        match to {
            CircuitState::Closed => {
                inner.failure_count = 0;
                inner.opened_at = None;
            }
            CircuitState::Open => {
                inner.opened_at = Some(now);
            }
            CircuitState::HalfOpen => {}
        }

        transition
    }

    fn on_opened(&self, transition: Transition) {
        if transition.from == CircuitState::HalfOpen {
            warn!(breaker = %self.name, "Circuit breaker re-opening after failed trial");
        } else {
            warn!(
                breaker = %self.name,
                failures = transition.failures,
                "Circuit breaker opening due to failures"
            );
        }

        let draft = ClassifiedErrorDraft::new(
            ErrorKind::InvariantViolation,
            Severity::High,
            self.name.clone(),
            format!("circuit breaker '{}' opened", self.name),
        )
        .with_detail(serde_json::json!({
            "from": transition.from,
            "consecutive_failures": transition.failures,
            "reset_timeout_ms": self.config.reset_timeout.as_millis() as u64,
        }));
        self.reporting.ledger.record(draft);

        self.publish(transition);
    }

    fn publish(&self, transition: Transition) {
        if let Some(tx) = &self.reporting.event_tx {
            let _ = tx.send(ResilienceEvent::BreakerTransition {
                name: self.name.clone(),
                from: transition.from,
                to: transition.to,
                at: transition.at,
            });
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("config", &self.config)
            .finish()
    }
}
