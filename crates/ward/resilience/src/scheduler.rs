//! Background scheduler.
//!
//! A single loop drives health polling, mitigation dispatch and ledger
//! eviction, each at its own fixed interval, on the tokio runtime.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{ResilienceError, ResilienceResult};
use crate::health::HealthAggregator;
use crate::ledger::ErrorLedger;
use crate::prevention::PreventionDispatcher;

/// Intervals the scheduler runs at.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScheduleIntervals {
    pub poll: Duration,
    pub tick: Duration,
    pub eviction: Duration,
    pub retention: Duration,
}

/// Handle to the running background loop.
///
/// Dropping the handle aborts the loop; [`Scheduler::stop`] lets it finish
/// its current iteration first.
pub struct Scheduler {
    shutdown_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Spawn the loop on the current tokio runtime.
    pub(crate) fn spawn(
        intervals: ScheduleIntervals,
        health: Arc<HealthAggregator>,
        prevention: Arc<PreventionDispatcher>,
        ledger: Arc<ErrorLedger>,
    ) -> ResilienceResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ResilienceError::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = runtime.spawn(run(intervals, health, prevention, ledger, shutdown_rx));

        info!(
            poll_ms = intervals.poll.as_millis() as u64,
            tick_ms = intervals.tick.as_millis() as u64,
            eviction_ms = intervals.eviction.as_millis() as u64,
            "Scheduler started"
        );

        Ok(Self {
            shutdown_tx,
            handle: Some(handle),
        })
    }

    /// Signal the loop to stop and wait for it.
    pub async fn stop(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        info!("Scheduler stopped");
    }

    /// Whether the loop is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// An interval whose first tick lands one period after start.
fn ticker(period: Duration) -> Interval {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn run(
    intervals: ScheduleIntervals,
    health: Arc<HealthAggregator>,
    prevention: Arc<PreventionDispatcher>,
    ledger: Arc<ErrorLedger>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut poll = ticker(intervals.poll);
    let mut tick = ticker(intervals.tick);
    let mut eviction = ticker(intervals.eviction);

    loop {
        tokio::select! {
            _ = poll.tick() => {
                debug!(task = "health-poll", "Scheduled run");
                health.poll();
            }
            _ = tick.tick() => {
                debug!(task = "prevention-tick", "Scheduled run");
                prevention.tick();
            }
            _ = eviction.tick() => {
                debug!(task = "ledger-eviction", "Scheduled run");
                ledger.evict(intervals.retention);
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }

    debug!("Scheduler loop exiting");
}

#[cfg(test)]
mod tests {
    use ward_types::{ClassifiedErrorDraft, ErrorKind, Severity};

    use super::*;
    use crate::clock::{Clock, SystemClock};
    use crate::config::HealthConfig;
    use crate::resilience::{BreakerReporting, CircuitBreakerRegistry};
    use crate::classifier::ErrorClassifier;
    use crate::config::CircuitBreakerConfig;

    fn components() -> (Arc<HealthAggregator>, Arc<PreventionDispatcher>, Arc<ErrorLedger>) {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let ledger = Arc::new(ErrorLedger::new(clock.clone()));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            CircuitBreakerConfig::default(),
            BreakerReporting {
                ledger: ledger.clone(),
                classifier: Arc::new(ErrorClassifier::default()),
                clock: clock.clone(),
                event_tx: None,
            },
        ));
        let health = Arc::new(HealthAggregator::new(
            HealthConfig::default(),
            ledger.clone(),
            breakers,
            clock,
            None,
        ));
        let prevention = Arc::new(PreventionDispatcher::new(ledger.clone(), None));
        (health, prevention, ledger)
    }

    fn intervals() -> ScheduleIntervals {
        ScheduleIntervals {
            poll: Duration::from_secs(5),
            tick: Duration::from_secs(5),
            eviction: Duration::from_secs(60),
            retention: Duration::from_secs(3600),
        }
    }

    #[test]
    fn test_spawn_requires_runtime() {
        let (health, prevention, ledger) = components();
        assert!(matches!(
            Scheduler::spawn(intervals(), health, prevention, ledger),
            Err(ResilienceError::NoRuntime)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_each_job_runs_on_its_interval() {
        let (health, prevention, ledger) = components();
        let scheduler =
            Scheduler::spawn(intervals(), health.clone(), prevention, ledger.clone()).unwrap();

        let recorded = ledger.record(ClassifiedErrorDraft::new(
            ErrorKind::ResourcePressure,
            Severity::High,
            "memory-monitor",
            "memory usage above 85%",
        ));
        assert!(health.latest().is_none());

        tokio::time::sleep(Duration::from_millis(5_100)).await;

        assert!(health.latest().is_some());
        assert!(ledger.get(&recorded.id).unwrap().mitigation_applied);
        assert!(scheduler.is_running());

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_eviction_shares_the_loop() {
        let (health, prevention, ledger) = components();
        let intervals = ScheduleIntervals {
            retention: Duration::ZERO,
            ..intervals()
        };
        let scheduler = Scheduler::spawn(intervals, health.clone(), prevention, ledger.clone()).unwrap();

        let recorded = ledger.record(ClassifiedErrorDraft::new(
            ErrorKind::TransientIo,
            Severity::Low,
            "/api/x",
            "404 for /api/x",
        ));
        ledger.resolve(&recorded.id).unwrap();

        tokio::time::sleep(Duration::from_millis(59_000)).await;
        assert!(ledger.get(&recorded.id).is_some());

        tokio::time::sleep(Duration::from_millis(1_100)).await;
        assert!(ledger.get(&recorded.id).is_none());
        assert!(health.latest().is_some());
        assert!(scheduler.is_running());

        scheduler.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_ends_the_loop() {
        let (health, prevention, ledger) = components();
        let scheduler = Scheduler::spawn(intervals(), health.clone(), prevention, ledger).unwrap();

        scheduler.stop().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert!(health.latest().is_none());
    }
}
