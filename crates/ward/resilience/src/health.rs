//! Health aggregation.
//!
//! Folds the ledger's recent error rate and the breaker states into a single
//! [`HealthSnapshot`].

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};
use ward_types::{HealthSnapshot, HealthStatus, ResilienceEvent};

use crate::clock::Clock;
use crate::config::HealthConfig;
use crate::ledger::ErrorLedger;
use crate::resilience::CircuitBreakerRegistry;

/// Derives system health on demand and on the scheduler's timer.
pub struct HealthAggregator {
    config: HealthConfig,
    ledger: Arc<ErrorLedger>,
    breakers: Arc<CircuitBreakerRegistry>,
    clock: Arc<dyn Clock>,
    latest: RwLock<Option<HealthSnapshot>>,
    event_tx: Option<broadcast::Sender<ResilienceEvent>>,
}

impl HealthAggregator {
    pub(crate) fn new(
        config: HealthConfig,
        ledger: Arc<ErrorLedger>,
        breakers: Arc<CircuitBreakerRegistry>,
        clock: Arc<dyn Clock>,
        event_tx: Option<broadcast::Sender<ResilienceEvent>>,
    ) -> Self {
        Self {
            config,
            ledger,
            breakers,
            clock,
            latest: RwLock::new(None),
            event_tx,
        }
    }

    /// Compute a fresh snapshot and remember it.
    #[instrument(skip(self))]
    pub fn poll(&self) -> HealthSnapshot {
        let window = self.config.error_rate_window;
        let error_rate = self.ledger.window(window).len();
        let counts = self.breakers.state_counts();

        let status = HealthStatus::derive(
            error_rate,
            counts.open,
            counts.half_open,
            self.config.degraded_error_rate,
            self.config.critical_error_rate,
        );

        let snapshot = HealthSnapshot {
            status,
            error_rate_last_minute: error_rate,
            open_circuits: counts.open,
            half_open_circuits: counts.half_open,
            closed_circuits: counts.closed,
            by_kind: self.ledger.count_by_kind(window),
            breakers: self.breakers.stats(),
            generated_at: self.clock.now(),
        };

        let previous = self
            .latest
            .write()
            .replace(snapshot.clone())
            .map(|s| s.status)
            .unwrap_or(HealthStatus::Healthy);

        if previous != status {
            info!(
                old_status = %previous,
                new_status = %status,
                error_rate = error_rate,
                open_circuits = counts.open,
                "Health status changed"
            );
            if let Some(tx) = &self.event_tx {
                let _ = tx.send(ResilienceEvent::HealthChanged {
                    old_status: previous,
                    new_status: status,
                    at: snapshot.generated_at,
                });
            }
        } else {
            debug!(status = %status, error_rate = error_rate, "Health polled");
        }

        snapshot
    }

    /// The last polled snapshot, if any poll has happened.
    pub fn latest(&self) -> Option<HealthSnapshot> {
        self.latest.read().clone()
    }
}
