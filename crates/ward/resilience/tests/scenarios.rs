//! End-to-end behaviour of a resilience context.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use ward_resilience::{
    CallError, CircuitBreakerConfig, ManualClock, ResilienceConfig, ResilienceContext,
    RetryConfig, THRESHOLD_SOURCE_PREFIX,
};
use ward_types::{
    CircuitState, ClassifiedError, ErrorKind, HealthStatus, RawSignal, ResilienceEvent, Severity,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn context_with_clock() -> (ResilienceContext, ManualClock) {
    init_tracing();
    let clock = ManualClock::starting_now();
    let context = ResilienceContext::builder(ResilienceConfig::default())
        .clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    (context, clock)
}

async fn failing(context: &ResilienceContext, name: &str) -> Result<(), CallError<String>> {
    context
        .guard(name, None)
        .execute(|| async { Err("upstream returned 503".to_string()) })
        .await
}

#[test]
fn identical_signals_fold_into_one_entry() {
    let (context, _) = context_with_clock();

    for _ in 0..3 {
        context.report_signal(&RawSignal::text("404 for /api/widgets"));
    }

    let errors = context.errors();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].occurrences, 3);
    assert_eq!(errors[0].kind, ErrorKind::TransientIo);
    assert_eq!(errors[0].source, "/api/widgets");
}

#[test]
fn repeated_signal_breaches_transient_threshold() {
    let (context, _) = context_with_clock();
    let window = Duration::from_secs(60);

    for _ in 0..4 {
        context.report_signal(&RawSignal::text("404 for /api/widgets"));
    }
    assert!(context
        .ledger()
        .check_thresholds(&context.config().ledger.thresholds, window)
        .is_empty());

    context.report_signal(&RawSignal::text("404 for /api/widgets"));

    let counts = context.ledger().count_by_kind(window);
    assert_eq!(counts.get(&ErrorKind::TransientIo), Some(&1));
    assert_eq!(
        context
            .ledger()
            .check_thresholds(&context.config().ledger.thresholds, window),
        vec![ErrorKind::TransientIo]
    );

    let synthetic: Vec<ClassifiedError> = context
        .errors()
        .into_iter()
        .filter(|e| e.source.starts_with(THRESHOLD_SOURCE_PREFIX))
        .collect();
    assert_eq!(synthetic.len(), 1);
    assert_eq!(synthetic[0].kind, ErrorKind::InvariantViolation);
    assert_eq!(synthetic[0].severity, Severity::Critical);
    assert_eq!(synthetic[0].source, "threshold:transient-io");
}

#[test]
fn threshold_counts_only_the_window() {
    let (context, clock) = context_with_clock();

    for _ in 0..4 {
        context.report_signal(&RawSignal::text("404 for /api/widgets"));
    }
    clock.advance(Duration::from_secs(61));
    context.report_signal(&RawSignal::text("404 for /api/widgets"));

    assert!(context
        .errors()
        .iter()
        .all(|e| !e.source.starts_with(THRESHOLD_SOURCE_PREFIX)));
}

#[tokio::test]
async fn breaker_opens_on_third_consecutive_failure() {
    let (context, _) = context_with_clock();
    let breaker = context.guard(
        "catalog",
        Some(CircuitBreakerConfig::new(3, Duration::from_secs(30))),
    );

    let _ = failing(&context, "catalog").await;
    let _ = failing(&context, "catalog").await;
    let _ = context
        .guard("catalog", None)
        .execute(|| async { Ok::<_, String>(()) })
        .await;

    // The success reset the count; three fresh failures are needed
    let _ = failing(&context, "catalog").await;
    let _ = failing(&context, "catalog").await;
    assert_eq!(breaker.state(), CircuitState::Closed);

    let _ = failing(&context, "catalog").await;
    assert_eq!(breaker.state(), CircuitState::Open);
}

#[tokio::test]
async fn half_open_allows_one_trial() {
    let (context, clock) = context_with_clock();
    let breaker = context.guard(
        "search",
        Some(CircuitBreakerConfig::new(1, Duration::from_secs(30))),
    );

    let _ = failing(&context, "search").await;
    let first_open = breaker.opened_at().unwrap();

    // Trial fails: open again, timestamped at the trial
    clock.advance(Duration::from_secs(30));
    let trial = failing(&context, "search").await;
    assert!(matches!(trial, Err(CallError::Operation(_))));
    assert_eq!(breaker.state(), CircuitState::Open);
    assert_eq!(
        breaker.opened_at().unwrap() - first_open,
        chrono::Duration::seconds(30)
    );

    // Trial succeeds: closed
    clock.advance(Duration::from_secs(30));
    let invocations = AtomicUsize::new(0);
    breaker
        .execute(|| {
            invocations.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        })
        .await
        .unwrap();
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test(start_paused = true)]
async fn retry_exhaustion_makes_four_attempts() {
    let (context, _) = context_with_clock();
    let config = RetryConfig::new(
        3,
        Duration::from_millis(1000),
        Duration::from_millis(10_000),
        2.0,
    );
    let mut attempts = Vec::new();
    let start = Instant::now();

    let result: Result<(), CallError<&str>> = context
        .execute_with_retry(
            || {
                attempts.push(start.elapsed().as_millis() as u64);
                async { Err("connection reset") }
            },
            &config,
            None,
        )
        .await;

    assert!(matches!(result, Err(CallError::Operation("connection reset"))));
    assert_eq!(attempts.len(), 4);

    let gaps: Vec<u64> = attempts.windows(2).map(|w| w[1] - w[0]).collect();
    for (gap, expected) in gaps.iter().zip([1000u64, 2000, 4000]) {
        assert!(*gap >= expected && *gap <= expected + 2, "gap {}ms", gap);
    }
}

#[tokio::test(start_paused = true)]
async fn protected_call_failures_escalate_like_signals() {
    let (context, _) = context_with_clock();
    let config = RetryConfig::new(
        9,
        Duration::from_millis(10),
        Duration::from_millis(100),
        2.0,
    );

    let result: Result<(), CallError<&str>> = context
        .execute_with_retry(|| async { Err("connection refused") }, &config, None)
        .await;
    assert!(result.is_err());

    assert_eq!(
        context.ledger().check_thresholds(
            &context.config().ledger.thresholds,
            context.config().ledger.threshold_window,
        ),
        vec![ErrorKind::TransientIo]
    );

    let synthetic: Vec<ClassifiedError> = context
        .errors()
        .into_iter()
        .filter(|e| e.source.starts_with(THRESHOLD_SOURCE_PREFIX))
        .collect();
    assert_eq!(synthetic.len(), 1);
    assert_eq!(synthetic[0].source, "threshold:transient-io");
    assert_eq!(synthetic[0].severity, Severity::Critical);
    assert_eq!(context.get_error_summary().critical_count, 1);
}

#[tokio::test]
async fn open_breaker_forces_critical() {
    let (context, clock) = context_with_clock();
    context.guard(
        "payments",
        Some(CircuitBreakerConfig::new(1, Duration::from_secs(300))),
    );
    let _ = failing(&context, "payments").await;

    // Let the failure age out of the error-rate window
    clock.advance(Duration::from_secs(120));

    let health = context.get_health();
    assert_eq!(health.error_rate_last_minute, 0);
    assert_eq!(health.open_circuits, 1);
    assert_eq!(health.status, HealthStatus::Critical);
}

#[test]
fn mitigation_runs_once_per_entry() {
    init_tracing();
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let context = ResilienceContext::builder(ResilienceConfig::default())
        .mitigation(ErrorKind::ResourcePressure, move |_: &ClassifiedError| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .build()
        .unwrap();

    context.report_signal(&RawSignal::memory_usage(91.0));
    context.prevention().tick();
    context.prevention().tick();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn payments_breaker_recovers_after_timeout() {
    let (context, clock) = context_with_clock();
    let breaker = context.guard(
        "payments",
        Some(CircuitBreakerConfig::new(1, Duration::from_millis(100))),
    );

    let first = failing(&context, "payments").await;
    assert!(matches!(first, Err(CallError::Operation(_))));
    assert_eq!(breaker.state(), CircuitState::Open);

    let invoked = AtomicUsize::new(0);
    let second = breaker
        .execute(|| {
            invoked.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(()) }
        })
        .await;
    match second {
        Err(CallError::CircuitOpen(e)) => assert_eq!(e.breaker, "payments"),
        other => panic!("expected circuit open, got {:?}", other),
    }
    assert_eq!(invoked.load(Ordering::SeqCst), 0);

    clock.advance(Duration::from_millis(150));
    breaker
        .execute(|| async { Ok::<_, String>(()) })
        .await
        .unwrap();
    assert_eq!(breaker.state(), CircuitState::Closed);
}

#[tokio::test]
async fn breaker_transitions_are_published() {
    let (context, clock) = context_with_clock();
    let mut events = context.subscribe();
    context.guard(
        "ledger-sync",
        Some(CircuitBreakerConfig::new(1, Duration::from_secs(1))),
    );

    let _ = failing(&context, "ledger-sync").await;
    clock.advance(Duration::from_secs(2));
    context
        .guard("ledger-sync", None)
        .execute(|| async { Ok::<_, String>(()) })
        .await
        .unwrap();

    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ResilienceEvent::BreakerTransition { from, to, .. } = event {
            transitions.push((from, to));
        }
    }
    assert_eq!(
        transitions,
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

#[test]
fn malformed_signals_never_fail() {
    let (context, _) = context_with_clock();

    let recorded = context
        .report_signal(&RawSignal::json(serde_json::Value::Null))
        .unwrap();
    assert_eq!(recorded.kind, ErrorKind::InvariantViolation);
    assert_eq!(recorded.severity, Severity::Medium);

    let recorded = context
        .report_signal(&RawSignal::memory_usage(f64::NAN))
        .unwrap();
    assert_eq!(recorded.kind, ErrorKind::InvariantViolation);
}
