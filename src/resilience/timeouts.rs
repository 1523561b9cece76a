//! Timeout enforcement.
//!
//! # Responsibilities
//! - Bound one call's execution time with a derived deadline
//! - Classify every call as successful, failed or timed out
//! - Report the outcome to instrumentation and the logger
//!
//! # Design Decisions
//! - The work receives the derived context and may observe it cooperatively
//! - At the deadline the work future is dropped at its current await point;
//!   blocking code inside it is not interrupted
//! - The work's own error is returned as-is; only an expired deadline
//!   yields `DeadlineExceeded`

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::{CallError, CallResult};
use crate::observability::{Instrumentation, Logger};

/// Classification of a timed call, for reporting only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimeoutOutcome {
    Success,
    Failed,
    TimedOut,
}

impl TimeoutOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeoutOutcome::Success => "successful",
            TimeoutOutcome::Failed => "failed",
            TimeoutOutcome::TimedOut => "timed-out",
        }
    }
}

impl fmt::Display for TimeoutOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timeout policy.
#[derive(Clone)]
pub struct TimeoutOptions {
    /// Policy identity for reporting.
    pub name: String,
    pub time_limit: Duration,
    pub instrumentation: Option<Arc<dyn Instrumentation>>,
    pub logger: Option<Arc<dyn Logger>>,
}

impl TimeoutOptions {
    pub fn new(name: impl Into<String>, time_limit: Duration) -> Self {
        Self {
            name: name.into(),
            time_limit,
            instrumentation: None,
            logger: None,
        }
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

impl fmt::Debug for TimeoutOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutOptions")
            .field("name", &self.name)
            .field("time_limit", &self.time_limit)
            .field("instrumentation", &self.instrumentation.is_some())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// Runs calls under a deadline.
#[derive(Debug)]
pub struct Timeout {
    opts: TimeoutOptions,
}

impl Timeout {
    pub fn new(opts: TimeoutOptions) -> Self {
        Self { opts }
    }

    pub fn name(&self) -> &str {
        &self.opts.name
    }

    pub fn time_limit(&self) -> Duration {
        self.opts.time_limit
    }

    /// Run `work` with a context that expires after the time limit.
    pub async fn execute<F, Fut, T>(&self, ctx: &Context, work: F) -> CallResult<T>
    where
        F: FnOnce(Context) -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let (child, _release) = ctx.with_timeout(self.opts.time_limit);

        let result = child.run(work(child.clone())).await.and_then(|result| result);

        match &result {
            Ok(_) => self.record_success(),
            Err(err) if err.is_deadline_exceeded() => self.record_timeout(),
            Err(err) => self.record_failure(err),
        }
        result
    }

    fn record_success(&self) {
        if let Some(instrumentation) = &self.opts.instrumentation {
            instrumentation.record_timeout_call(&self.opts.name, TimeoutOutcome::Success);
        }
    }

    fn record_timeout(&self) {
        if let Some(logger) = &self.opts.logger {
            let limit_ms = self.opts.time_limit.as_millis();
            logger.error(
                "Call timed out.",
                &[("timeout", &self.opts.name), ("time_limit_ms", &limit_ms)],
            );
        }
        if let Some(instrumentation) = &self.opts.instrumentation {
            instrumentation.record_timeout_call(&self.opts.name, TimeoutOutcome::TimedOut);
        }
    }

    fn record_failure(&self, err: &CallError) {
        if let Some(logger) = &self.opts.logger {
            logger.error(
                "Timed call failed for a non-timeout reason.",
                &[("timeout", &self.opts.name), ("error", err)],
            );
        }
        if let Some(instrumentation) = &self.opts.instrumentation {
            instrumentation.record_timeout_call(&self.opts.name, TimeoutOutcome::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::time;

    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<TimeoutOutcome>>,
        errors: Mutex<Vec<String>>,
    }

    impl Instrumentation for Recorder {
        fn record_timeout_call(&self, name: &str, outcome: TimeoutOutcome) {
            assert_eq!(name, "db");
            self.outcomes.lock().unwrap().push(outcome);
        }
    }

    impl Logger for Recorder {
        fn error(&self, message: &str, _fields: &[crate::observability::Field<'_>]) {
            self.errors.lock().unwrap().push(message.to_string());
        }
    }

    fn timeout_with(recorder: &Arc<Recorder>, limit: Duration) -> Timeout {
        Timeout::new(
            TimeoutOptions::new("db", limit)
                .with_instrumentation(recorder.clone())
                .with_logger(recorder.clone()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_passes_result_through() {
        let recorder = Arc::new(Recorder::default());
        let timeout = timeout_with(&recorder, Duration::from_millis(100));

        let res = timeout
            .execute(&Context::background(), |_ctx| async { Ok::<_, CallError>(42) })
            .await;

        assert_eq!(res.ok(), Some(42));
        assert_eq!(*recorder.outcomes.lock().unwrap(), vec![TimeoutOutcome::Success]);
        assert!(recorder.errors.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_cooperative_work_times_out() {
        let recorder = Arc::new(Recorder::default());
        let timeout = timeout_with(&recorder, Duration::from_millis(10));
        let started = time::Instant::now();

        let res = timeout
            .execute(&Context::background(), |_ctx| async {
                time::sleep(Duration::from_millis(50)).await;
                Ok::<_, CallError>("late")
            })
            .await;

        assert!(matches!(res, Err(CallError::DeadlineExceeded)));
        assert!(started.elapsed() >= Duration::from_millis(10));
        assert!(started.elapsed() < Duration::from_millis(50));
        assert_eq!(*recorder.outcomes.lock().unwrap(), vec![TimeoutOutcome::TimedOut]);
        assert_eq!(*recorder.errors.lock().unwrap(), vec!["Call timed out.".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unbounded_time_limit_never_fires() {
        let recorder = Arc::new(Recorder::default());
        let timeout = timeout_with(&recorder, Duration::MAX);

        let res = timeout
            .execute(&Context::background(), |ctx| async move {
                assert!(ctx.deadline().is_none());
                time::sleep(Duration::from_secs(86_400)).await;
                Ok::<_, CallError>(1)
            })
            .await;

        assert_eq!(res.ok(), Some(1));
        assert_eq!(*recorder.outcomes.lock().unwrap(), vec![TimeoutOutcome::Success]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooperative_work_sees_deadline() {
        let timeout = Timeout::new(TimeoutOptions::new("db", Duration::from_millis(10)));

        let res: CallResult<()> = timeout
            .execute(&Context::background(), |ctx| async move {
                assert!(ctx.deadline().is_some());
                Err(ctx.done().await)
            })
            .await;

        assert!(res.is_err_and(|e| e.is_deadline_exceeded()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_work_error_is_not_replaced() {
        let recorder = Arc::new(Recorder::default());
        let timeout = timeout_with(&recorder, Duration::from_secs(1));

        let res: CallResult<()> = timeout
            .execute(&Context::background(), |_ctx| async {
                Err(CallError::failed("connection refused"))
            })
            .await;

        let err = res.unwrap_err();
        assert_eq!(err.to_string(), "connection refused");
        assert_eq!(*recorder.outcomes.lock().unwrap(), vec![TimeoutOutcome::Failed]);
        assert_eq!(recorder.errors.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_parent_cancellation_is_a_failure() {
        let recorder = Arc::new(Recorder::default());
        let timeout = timeout_with(&recorder, Duration::from_secs(5));
        let (ctx, handle) = Context::background().with_cancel();
        handle.cancel();

        let res: CallResult<()> = timeout
            .execute(&ctx, |child| async move { Err(child.done().await) })
            .await;

        assert!(res.is_err_and(|e| e.is_cancelled()));
        assert_eq!(*recorder.outcomes.lock().unwrap(), vec![TimeoutOutcome::Failed]);
    }

    #[tokio::test]
    async fn test_derived_context_released_after_call() {
        let timeout = Timeout::new(TimeoutOptions::new("db", Duration::from_secs(60)));
        let mut captured = None;

        let _ = timeout
            .execute(&Context::background(), |ctx| {
                captured = Some(ctx);
                async { Ok::<_, CallError>(()) }
            })
            .await;

        assert!(captured.is_some_and(|ctx| ctx.err().is_some_and(|e| e.is_cancelled())));
    }
}
