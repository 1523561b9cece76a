//! Retry logic.
//!
//! # Responsibilities
//! - Re-invoke a unit of work until it succeeds, a failure is not
//!   retryable, or `max_retries` retries have been spent
//! - Wait between attempts according to the configured backoff
//! - Report one outcome per call with the number of invocations made
//!
//! # Design Decisions
//! - Attempts of one call are strictly sequential
//! - Cancellation is never retried unless a custom predicate says so
//! - Exhaustion surfaces the last observed error, not a synthetic one
//! - Backoff waits end early when the caller's context ends
//!
//! Retried work should be idempotent; the executor cannot check that.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::error::{CallError, CallResult};
use crate::observability::{Instrumentation, Logger};
use crate::resilience::backoff::BackOff;

/// Decides whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&CallError) -> bool + Send + Sync>;

/// Classification of a retried call, for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetryOutcome {
    Success,
    FailedWithRetry,
    FailedWithoutRetry,
}

impl RetryOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryOutcome::Success => "successful",
            RetryOutcome::FailedWithRetry => "failed-with-retry",
            RetryOutcome::FailedWithoutRetry => "failed-without-retry",
        }
    }
}

impl fmt::Display for RetryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry policy.
#[derive(Clone, Default)]
pub struct RetryOptions {
    /// Policy identity for reporting.
    pub name: String,
    /// Retries after the first attempt; total attempts = `max_retries + 1`.
    pub max_retries: u32,
    /// Wait schedule; `None` retries immediately.
    pub backoff: Option<Arc<dyn BackOff>>,
    /// Overrides the default "retry unless cancelled" policy.
    pub predicate: Option<RetryPredicate>,
    pub instrumentation: Option<Arc<dyn Instrumentation>>,
    pub logger: Option<Arc<dyn Logger>>,
}

impl RetryOptions {
    pub fn new(name: impl Into<String>, max_retries: u32) -> Self {
        Self {
            name: name.into(),
            max_retries,
            ..Default::default()
        }
    }

    pub fn with_backoff(mut self, backoff: impl BackOff + 'static) -> Self {
        self.backoff = Some(Arc::new(backoff));
        self
    }

    pub fn with_predicate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&CallError) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    pub fn with_instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = Some(instrumentation);
        self
    }

    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = Some(logger);
        self
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("name", &self.name)
            .field("max_retries", &self.max_retries)
            .field("backoff", &self.backoff)
            .field("predicate", &self.predicate.is_some())
            .field("instrumentation", &self.instrumentation.is_some())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// Default predicate: everything but cancellation is retryable.
pub fn retry_unless_cancelled(err: &CallError) -> bool {
    !err.is_cancelled()
}

/// Re-invokes failing calls.
#[derive(Debug)]
pub struct Retry {
    opts: RetryOptions,
}

impl Retry {
    pub fn new(opts: RetryOptions) -> Self {
        Self { opts }
    }

    pub fn name(&self) -> &str {
        &self.opts.name
    }

    pub fn max_retries(&self) -> u32 {
        self.opts.max_retries
    }

    /// Invoke `work` up to `max_retries + 1` times.
    pub async fn execute<F, Fut, T>(&self, ctx: &Context, mut work: F) -> CallResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if attempt > 0 {
                self.record_retry(attempt);
                if let Err(err) = self.back_off(ctx, attempt).await {
                    self.record_aborted(attempt, &err);
                    return Err(err);
                }
            }

            tracing::trace!(retry = %self.opts.name, attempt, "Invoking attempt");
            let err = match work().await {
                Ok(value) => {
                    self.record_success(attempt);
                    return Ok(value);
                }
                Err(err) => err,
            };

            if !self.should_retry(&err) {
                self.record_failure(attempt, &err);
                return Err(err);
            }
            if attempt >= self.opts.max_retries {
                self.record_exhausted(&err);
                return Err(err);
            }
            attempt += 1;
        }
    }

    async fn back_off(&self, ctx: &Context, attempt: u32) -> CallResult<()> {
        let delay = self
            .opts
            .backoff
            .as_ref()
            .map(|backoff| backoff.next(attempt))
            .unwrap_or_default();
        ctx.sleep(delay).await
    }

    fn should_retry(&self, err: &CallError) -> bool {
        match &self.opts.predicate {
            Some(predicate) => predicate(err),
            None => retry_unless_cancelled(err),
        }
    }

    fn record_retry(&self, attempt: u32) {
        if let Some(logger) = &self.opts.logger {
            logger.warn("Retrying call.", &[("retry", &self.opts.name), ("attempt", &attempt)]);
        }
    }

    fn record_success(&self, attempt: u32) {
        if let Some(instrumentation) = &self.opts.instrumentation {
            instrumentation.record_retry_call(&self.opts.name, attempt.saturating_add(1), RetryOutcome::Success);
        }
    }

    fn record_failure(&self, attempt: u32, err: &CallError) {
        let attempts = attempt.saturating_add(1);
        if let Some(instrumentation) = &self.opts.instrumentation {
            instrumentation.record_retry_call(&self.opts.name, attempts, RetryOutcome::FailedWithoutRetry);
        }
        if let Some(logger) = &self.opts.logger {
            logger.error(
                "Call failed and will not be retried.",
                &[("retry", &self.opts.name), ("attempts", &attempts), ("error", err)],
            );
        }
    }

    /// The context ended while waiting for retry `attempt`.
    fn record_aborted(&self, attempt: u32, err: &CallError) {
        if let Some(instrumentation) = &self.opts.instrumentation {
            instrumentation.record_retry_call(&self.opts.name, attempt, RetryOutcome::FailedWithoutRetry);
        }
        if let Some(logger) = &self.opts.logger {
            logger.error(
                "Retry aborted because the context ended.",
                &[("retry", &self.opts.name), ("attempts", &attempt), ("error", err)],
            );
        }
    }

    fn record_exhausted(&self, err: &CallError) {
        let attempts = self.opts.max_retries.saturating_add(1);
        if let Some(logger) = &self.opts.logger {
            logger.error(
                "All retry attempts failed.",
                &[("retry", &self.opts.name), ("attempts", &attempts), ("error", err)],
            );
        }
        if let Some(instrumentation) = &self.opts.instrumentation {
            instrumentation.record_retry_call(&self.opts.name, attempts, RetryOutcome::FailedWithRetry);
        }
    }
}
