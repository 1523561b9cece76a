//! Executors nested around each other.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant};

use resilience_kit::resilience::{
    CircuitBreaker, CircuitBreakerOptions, ConstantBackoff, Retry, RetryOptions, RetryOutcome,
    State, Timeout, TimeoutOptions, TimeoutOutcome,
};
use resilience_kit::{CallError, CallResult, Context};

mod common;
use common::{DependencyError, FlakyDependency, RecordingInstrumentation, RecordingLogger};

struct Stack {
    breaker: CircuitBreaker,
    retry: Retry,
    timeout: Timeout,
    metrics: Arc<RecordingInstrumentation>,
    logger: Arc<RecordingLogger>,
}

fn stack(max_retries: u32, time_limit: Duration) -> Stack {
    let metrics = Arc::new(RecordingInstrumentation::default());
    let logger = Arc::new(RecordingLogger::default());
    Stack {
        breaker: CircuitBreaker::new(
            CircuitBreakerOptions::new("ledger", 0.5, Duration::from_secs(5))
                .with_instrumentation(metrics.clone())
                .with_logger(logger.clone()),
        ),
        retry: Retry::new(
            RetryOptions::new("ledger", max_retries)
                .with_instrumentation(metrics.clone())
                .with_logger(logger.clone()),
        ),
        timeout: Timeout::new(
            TimeoutOptions::new("ledger", time_limit)
                .with_instrumentation(metrics.clone())
                .with_logger(logger.clone()),
        ),
        metrics,
        logger,
    }
}

async fn slow_call(invocations: &std::sync::atomic::AtomicU32) -> CallResult<&'static str> {
    invocations.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
    time::sleep(Duration::from_secs(1)).await;
    Ok("late")
}

#[tokio::test(start_paused = true)]
async fn test_breaker_retry_timeout_against_a_hanging_dependency() {
    let s = stack(2, Duration::from_millis(100));
    let ctx = Context::background();
    let invocations = std::sync::atomic::AtomicU32::new(0);

    let started = Instant::now();
    let err = s
        .breaker
        .execute(&ctx, || {
            s.retry
                .execute(&ctx, || s.timeout.execute(&ctx, |_| slow_call(&invocations)))
        })
        .await
        .unwrap_err();

    assert!(err.is_deadline_exceeded());
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert!(started.elapsed() < Duration::from_millis(400));
    assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(s.metrics.timeout_outcomes(), vec![TimeoutOutcome::TimedOut; 3]);
    assert_eq!(
        s.metrics.retry_calls(),
        vec![("ledger".to_string(), 3, RetryOutcome::FailedWithRetry)]
    );
    assert_eq!(s.logger.count("warn", "Retrying call."), 2);
    assert_eq!(s.logger.count("error", "Call timed out."), 3);

    // One failure out of one call trips a 0.5 threshold.
    assert_eq!(s.breaker.state(), State::Open);
    assert_eq!(s.logger.count("alert", "Circuit breaker opened."), 1);

    let err = s
        .breaker
        .execute(&ctx, || {
            s.retry
                .execute(&ctx, || s.timeout.execute(&ctx, |_| slow_call(&invocations)))
        })
        .await
        .unwrap_err();
    assert!(err.is_circuit_open());
    assert_eq!(invocations.load(std::sync::atomic::Ordering::SeqCst), 3);
    assert_eq!(
        s.metrics.breaker_calls(),
        vec![
            Some("context deadline exceeded".to_string()),
            Some("circuit breaker 'ledger' is open".to_string()),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_through_half_open() {
    let s = stack(0, Duration::from_secs(1));
    let ctx = Context::background();
    let broken = FlakyDependency::new(1);

    let err = s.breaker.execute(&ctx, || broken.call()).await.unwrap_err();
    assert_eq!(err.downcast_ref::<DependencyError>(), Some(&DependencyError("unavailable")));
    assert_eq!(s.metrics.gauge_state(), Some("open"));

    time::advance(Duration::from_secs(5)).await;
    assert_eq!(s.metrics.gauge_state(), Some("half-open"));

    let value = s.breaker.execute(&ctx, || broken.call()).await.unwrap();
    assert_eq!(value, 2);
    assert_eq!(s.breaker.state(), State::Closed);
    assert_eq!(s.breaker.counts(), Default::default());

    let fields: Vec<String> = s
        .logger
        .events()
        .into_iter()
        .filter(|e| e.message == "Circuit breaker state transition.")
        .map(|e| e.fields)
        .collect();
    assert_eq!(
        fields,
        vec![
            "circuit_breaker=ledger from_state=closed to_state=open",
            "circuit_breaker=ledger from_state=open to_state=half-open",
            "circuit_breaker=ledger from_state=half-open to_state=closed",
        ]
    );
    assert_eq!(s.logger.count("info", "Circuit breaker closed."), 1);
}

#[tokio::test(start_paused = true)]
async fn test_retry_around_breaker_can_skip_rejections() {
    let metrics = Arc::new(RecordingInstrumentation::default());
    let breaker = CircuitBreaker::new(CircuitBreakerOptions::new("search", 0.5, Duration::from_secs(60)));
    let retry = Retry::new(
        RetryOptions::new("search", 5)
            .with_backoff(ConstantBackoff::new(Duration::from_millis(10)))
            .with_predicate(|err: &CallError| !err.is_rejected() && !err.is_cancelled())
            .with_instrumentation(metrics.clone()),
    );
    let ctx = Context::background();
    let dependency = FlakyDependency::new(u32::MAX);

    let err = retry
        .execute(&ctx, || breaker.execute(&ctx, || dependency.call()))
        .await
        .unwrap_err();

    // The first failure opens the breaker; the retry then sees a rejection and stops.
    assert!(err.is_circuit_open());
    assert_eq!(dependency.invocations(), 1);
    assert_eq!(
        metrics.retry_calls(),
        vec![("search".to_string(), 2, RetryOutcome::FailedWithoutRetry)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_outer_timeout_bounds_retry_backoff() {
    let metrics = Arc::new(RecordingInstrumentation::default());
    let timeout = Timeout::new(
        TimeoutOptions::new("export", Duration::from_secs(1)).with_instrumentation(metrics.clone()),
    );
    let retry = Retry::new(
        RetryOptions::new("export", 10).with_backoff(ConstantBackoff::new(Duration::from_millis(400))),
    );
    let ctx = Context::background();
    let dependency = FlakyDependency::new(u32::MAX);
    let (retry, dependency) = (&retry, &dependency);

    let started = Instant::now();
    let err = timeout
        .execute(&ctx, |call_ctx| async move {
            retry.execute(&call_ctx, || dependency.call()).await
        })
        .await
        .unwrap_err();

    assert!(err.is_deadline_exceeded());
    assert_eq!(started.elapsed(), Duration::from_secs(1));
    assert_eq!(dependency.invocations(), 3);
    assert_eq!(metrics.timeout_outcomes(), vec![TimeoutOutcome::TimedOut]);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_caller_is_not_counted_by_breaker() {
    let s = stack(3, Duration::from_secs(1));
    let (ctx, cancel) = Context::background().with_cancel();
    cancel.cancel();
    let dependency = FlakyDependency::new(0);

    let err = s
        .breaker
        .execute(&ctx, || s.retry.execute(&ctx, || dependency.call()))
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(dependency.invocations(), 0);
    assert_eq!(s.breaker.counts(), Default::default());
    assert_eq!(s.breaker.state(), State::Closed);
}
