//! Resilience context.
//!
//! The single owner of the ledger, breaker registry and background components.
//! Hosts construct one per process and hand it (usually in an `Arc`) to every
//! collaborator that reports signals or protects operations.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, instrument};
use ward_types::{
    CircuitBreakerStats, ClassifiedError, ErrorId, ErrorKind, ErrorSummary, HealthSnapshot,
    RawSignal, ResilienceEvent,
};

use crate::classifier::{ClassificationRule, ErrorClassifier};
use crate::clock::{Clock, SystemClock};
use crate::config::{CircuitBreakerConfig, ResilienceConfig, RetryConfig};
use crate::error::{CallError, ResilienceError, ResilienceResult};
use crate::health::HealthAggregator;
use crate::ledger::ErrorLedger;
use crate::prevention::{MitigationHook, PreventionDispatcher};
use crate::resilience::{BreakerReporting, CircuitBreaker, CircuitBreakerRegistry, RetryExecutor};
use crate::scheduler::{ScheduleIntervals, Scheduler};

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Builder for [`ResilienceContext`].
pub struct ResilienceContextBuilder {
    config: ResilienceConfig,
    clock: Arc<dyn Clock>,
    rules: Vec<ClassificationRule>,
    hooks: Vec<(ErrorKind, Arc<dyn MitigationHook>)>,
}

impl ResilienceContextBuilder {
    /// Use a custom time source.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Add a classification rule checked ahead of the built-ins.
    pub fn rule(mut self, rule: ClassificationRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Register the mitigation hook for a kind.
    pub fn mitigation(mut self, kind: ErrorKind, hook: impl MitigationHook + 'static) -> Self {
        let hook: Arc<dyn MitigationHook> = Arc::new(hook);
        self.hooks.push((kind, hook));
        self
    }

    /// Validate the configuration and wire up the components.
    pub fn build(self) -> ResilienceResult<ResilienceContext> {
        self.config.validate()?;

        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        let classifier = Arc::new(
            self.rules
                .into_iter()
                .fold(ErrorClassifier::new(self.config.ledger.max_message_len), |c, rule| {
                    c.with_rule(rule)
                }),
        );
        let ledger = Arc::new(
            ErrorLedger::new(self.clock.clone())
                .with_events(event_tx.clone())
                .with_escalation(
                    self.config.ledger.thresholds.clone(),
                    self.config.ledger.threshold_window,
                ),
        );
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            self.config.circuit_breaker.clone(),
            BreakerReporting {
                ledger: ledger.clone(),
                classifier: classifier.clone(),
                clock: self.clock.clone(),
                event_tx: Some(event_tx.clone()),
            },
        ));
        let retry = RetryExecutor::new(breakers.clone(), ledger.clone(), classifier.clone());
        let health = Arc::new(HealthAggregator::new(
            self.config.health.clone(),
            ledger.clone(),
            breakers.clone(),
            self.clock.clone(),
            Some(event_tx.clone()),
        ));
        let prevention = Arc::new(PreventionDispatcher::new(
            ledger.clone(),
            Some(event_tx.clone()),
        ));
        for (kind, hook) in self.hooks {
            prevention.register(kind, hook);
        }

        Ok(ResilienceContext {
            config: self.config,
            classifier,
            ledger,
            breakers,
            retry,
            health,
            prevention,
            event_tx,
            scheduler: Mutex::new(None),
        })
    }
}

/// Owner of all resilience state for a process.
pub struct ResilienceContext {
    config: ResilienceConfig,
    classifier: Arc<ErrorClassifier>,
    ledger: Arc<ErrorLedger>,
    breakers: Arc<CircuitBreakerRegistry>,
    retry: RetryExecutor,
    health: Arc<HealthAggregator>,
    prevention: Arc<PreventionDispatcher>,
    event_tx: broadcast::Sender<ResilienceEvent>,
    scheduler: Mutex<Option<Scheduler>>,
}

impl ResilienceContext {
    /// Create a context on the system clock.
    pub fn new(config: ResilienceConfig) -> ResilienceResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: ResilienceConfig) -> ResilienceContextBuilder {
        ResilienceContextBuilder {
            config,
            clock: Arc::new(SystemClock),
            rules: Vec::new(),
            hooks: Vec::new(),
        }
    }

    pub fn config(&self) -> &ResilienceConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<ErrorLedger> {
        &self.ledger
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn prevention(&self) -> &Arc<PreventionDispatcher> {
        &self.prevention
    }

    // -- Ingestion --

    /// Classify and record a raw signal. The ledger escalates any threshold
    /// breach the record causes.
    ///
    /// Never fails: malformed signals are recorded as invariant violations.
    /// Nominal readings are not failures and return `None`.
    #[instrument(skip(self, signal))]
    pub fn report_signal(&self, signal: &RawSignal) -> Option<ClassifiedError> {
        if self.classifier.is_nominal(signal) {
            debug!("Nominal reading, nothing recorded");
            return None;
        }
        Some(self.ledger.record(self.classifier.classify(signal)))
    }

    // -- Protection --

    /// Look up or create the breaker for `name`.
    pub fn guard(&self, name: &str, config: Option<CircuitBreakerConfig>) -> Arc<CircuitBreaker> {
        self.breakers.guard(name, config)
    }

    /// Run `op` with retries, optionally through the named breaker.
    pub async fn execute_with_retry<F, Fut, T, E>(
        &self,
        op: F,
        config: &RetryConfig,
        breaker: Option<&str>,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.retry.execute_with_retry(op, config, breaker).await
    }

    /// Run `op` with the configured default retry policy.
    pub async fn execute<F, Fut, T, E>(
        &self,
        op: F,
        breaker: Option<&str>,
    ) -> Result<T, CallError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.retry
            .execute_with_retry(op, &self.config.retry, breaker)
            .await
    }

    // -- Observability --

    /// Poll health now.
    pub fn get_health(&self) -> HealthSnapshot {
        self.health.poll()
    }

    /// The last polled snapshot, without polling.
    pub fn latest_health(&self) -> Option<HealthSnapshot> {
        self.health.latest()
    }

    /// Summary over the health error-rate window.
    pub fn get_error_summary(&self) -> ErrorSummary {
        self.ledger.summary(self.config.health.error_rate_window)
    }

    /// Every ledger entry, most recent first.
    pub fn errors(&self) -> Vec<ClassifiedError> {
        self.ledger.all()
    }

    pub fn breaker_stats(&self) -> Vec<CircuitBreakerStats> {
        self.breakers.stats()
    }

    /// Subscribe to resilience events.
    pub fn subscribe(&self) -> broadcast::Receiver<ResilienceEvent> {
        self.event_tx.subscribe()
    }

    // -- Administration --

    pub fn reset_breaker(&self, name: &str) -> ResilienceResult<()> {
        self.breakers.reset(name)
    }

    pub fn reset_all_breakers(&self) -> usize {
        let count = self.breakers.reset_all();
        info!(count = count, "Reset all circuit breakers");
        count
    }

    pub fn clear_resolved_errors(&self) -> usize {
        self.ledger.clear_resolved()
    }

    pub fn resolve_error(&self, id: &ErrorId) -> ResilienceResult<ClassifiedError> {
        self.ledger.resolve(id)
    }

    /// Register a mitigation hook after construction.
    pub fn register_mitigation(&self, kind: ErrorKind, hook: Arc<dyn MitigationHook>) {
        self.prevention.register(kind, hook);
    }

    // -- Lifecycle --

    /// Start health polling, mitigation dispatch and eviction in the
    /// background. Requires a tokio runtime.
    pub fn start_scheduler(&self) -> ResilienceResult<()> {
        let mut slot = self.scheduler.lock();
        if slot.is_some() {
            return Err(ResilienceError::SchedulerAlreadyRunning);
        }

        let scheduler = Scheduler::spawn(
            ScheduleIntervals {
                poll: self.config.health.poll_interval,
                tick: self.config.prevention.tick_interval,
                eviction: self.config.prevention.eviction_interval,
                retention: self.config.ledger.retention,
            },
            self.health.clone(),
            self.prevention.clone(),
            self.ledger.clone(),
        )?;
        *slot = Some(scheduler);
        Ok(())
    }

    pub fn is_scheduler_running(&self) -> bool {
        self.scheduler.lock().is_some()
    }

    /// Stop the background scheduler. A no-op if it is not running.
    pub async fn shutdown(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop().await;
        }
    }
}

impl std::fmt::Debug for ResilienceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceContext")
            .field("errors", &self.ledger.len())
            .field("breakers", &self.breakers.len())
            .field("scheduler_running", &self.is_scheduler_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use ward_types::{CircuitState, HealthStatus, Severity};

    use super::*;
    use crate::clock::ManualClock;

    fn test_context() -> (ResilienceContext, ManualClock) {
        let clock = ManualClock::starting_now();
        let context = ResilienceContext::builder(ResilienceConfig::default())
            .clock(Arc::new(clock.clone()))
            .build()
            .unwrap();
        (context, clock)
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = ResilienceConfig::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(matches!(
            ResilienceContext::new(config),
            Err(ResilienceError::ConfigurationError(_))
        ));
    }

    #[test]
    fn test_report_signal_classifies_and_records() {
        let (context, _) = test_context();
        let recorded = context.report_signal(&RawSignal::memory_usage(96.0)).unwrap();

        assert_eq!(recorded.kind, ErrorKind::ResourcePressure);
        assert_eq!(recorded.severity, Severity::Critical);
        assert_eq!(context.errors().len(), 1);
    }

    #[test]
    fn test_nominal_memory_readings_are_not_recorded() {
        let (context, _) = test_context();

        assert!(context.report_signal(&RawSignal::memory_usage(20.0)).is_none());
        assert!(context.report_signal(&RawSignal::memory_usage(21.0)).is_none());

        assert!(context.errors().is_empty());
        assert_eq!(context.get_error_summary().critical_count, 0);
        assert_eq!(context.get_health().status, HealthStatus::Healthy);
    }

    #[test]
    fn test_custom_rule_applies() {
        let context = ResilienceContext::builder(ResilienceConfig::default())
            .rule(ClassificationRule::new(
                ErrorKind::ReloadStorm,
                Severity::High,
                ["webpack rebuild"],
            ))
            .build()
            .unwrap();

        let recorded = context
            .report_signal(&RawSignal::text("webpack rebuild looping"))
            .unwrap();
        assert_eq!(recorded.kind, ErrorKind::ReloadStorm);
        assert_eq!(recorded.severity, Severity::High);
    }

    #[test]
    fn test_summary_and_resolution() {
        let (context, _) = test_context();
        let first = context.report_signal(&RawSignal::memory_usage(99.0)).unwrap();
        context.report_signal(&RawSignal::text("fetch failed for /api/items"));

        let summary = context.get_error_summary();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.recent_count, 2);
        assert_eq!(summary.critical_count, 1);

        context.resolve_error(&first.id).unwrap();
        assert_eq!(context.get_error_summary().critical_count, 0);
        assert_eq!(context.clear_resolved_errors(), 1);
        assert_eq!(context.errors().len(), 1);

        assert!(matches!(
            context.resolve_error(&first.id),
            Err(ResilienceError::ErrorNotFound(_))
        ));
    }

    #[test]
    fn test_registered_mitigation_runs_on_tick() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let context = ResilienceContext::builder(ResilienceConfig::default())
            .mitigation(ErrorKind::ResourcePressure, move |_: &ClassifiedError| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build()
            .unwrap();

        context.report_signal(&RawSignal::memory_usage(90.0));
        context.prevention().tick();
        context.prevention().tick();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_admin_resets() {
        let (context, _) = test_context();
        let breaker = context.guard("payments", Some(CircuitBreakerConfig::new(1, Duration::from_secs(30))));
        let _: Result<(), CallError<&str>> = breaker.execute(|| async { Err("declined") }).await;
        assert_eq!(context.get_health().status, HealthStatus::Critical);

        context.reset_breaker("payments").unwrap();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert!(matches!(
            context.reset_breaker("unknown"),
            Err(ResilienceError::BreakerNotFound(_))
        ));
        assert_eq!(context.reset_all_breakers(), 1);
    }

    #[tokio::test]
    async fn test_events_are_published() {
        let (context, _) = test_context();
        let mut events = context.subscribe();

        context.report_signal(&RawSignal::text("ChunkLoadError: loading chunk 4 failed"));
        match events.recv().await.unwrap() {
            ResilienceEvent::ErrorRecorded { kind, occurrences, .. } => {
                assert_eq!(kind, ErrorKind::TransientIo);
                assert_eq!(occurrences, 1);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_lifecycle() {
        let (context, _) = test_context();

        context.start_scheduler().unwrap();
        assert!(context.is_scheduler_running());
        assert!(matches!(
            context.start_scheduler(),
            Err(ResilienceError::SchedulerAlreadyRunning)
        ));

        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert!(context.latest_health().is_some());

        context.shutdown().await;
        assert!(!context.is_scheduler_running());
        // Shutting down twice is harmless
        context.shutdown().await;
    }
}
