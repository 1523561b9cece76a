//! Circuit breaker for dependency protection.
//!
//! # Responsibilities
//! - Gate calls through the closed/open/half-open state machine
//! - Feed every admitted call's result into the rolling counters
//! - Log state transitions and report calls and state to instrumentation
//!
//! # Design Decisions
//! - Trips on failure rate, not on a failure count
//! - Fail fast while open; rejected calls are not counted as failures
//! - An admitted call that never completes (dropped or panicked) counts
//!   as a failure, so half-open probe slots cannot leak
//! - Logging happens outside the state lock

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::context::Context;
use crate::error::{CallError, CallResult};
use crate::observability::{Instrumentation, Logger, StateSupplier};
use crate::resilience::state::{Admission, Counts, Settings, State, StateMachine, Transition};

/// Default period after which closed-state counters are cleared.
pub const DEFAULT_RESET_INTERVAL: Duration = Duration::from_secs(60);

/// Circuit breaker policy.
#[derive(Clone)]
pub struct CircuitBreakerOptions {
    /// Policy identity for reporting.
    pub name: String,
    /// Failure fraction in `[0, 1]` at which a closed breaker opens.
    pub failure_rate_threshold: f64,
    /// Time spent open before probing.
    pub wait_open: Duration,
    /// Closed-state counter reset period; zero disables resets.
    pub reset_interval: Duration,
    /// Probe calls admitted while half-open.
    pub half_open_max_requests: u32,
    pub instrumentation: Option<Arc<dyn Instrumentation>>,
    pub logger: Option<Arc<dyn Logger>>,
}

impl CircuitBreakerOptions {
    pub fn new(name: impl Into<String>, failure_rate_threshold: f64, wait_open: Duration) -> Self {
        Self {
            name: name.into(),
            failure_rate_threshold,
            wait_open,
            reset_interval: DEFAULT_RESET_INTERVAL,
            half_open_max_requests: 1,
            instrumentation: None,
            logger: None,
        }
    }

    pub fn with_reset_interval(mut self, reset_interval: Duration) -> Self {
        self.reset_interval = reset_interval;
        self
    }

    pub fn with_half_open_max_requests(mut self, max: u32) -> Self {
        self.half_open_max_requests = max;
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

impl fmt::Debug for CircuitBreakerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerOptions")
            .field("name", &self.name)
            .field("failure_rate_threshold", &self.failure_rate_threshold)
            .field("wait_open", &self.wait_open)
            .field("reset_interval", &self.reset_interval)
            .field("half_open_max_requests", &self.half_open_max_requests)
            .field("instrumentation", &self.instrumentation.is_some())
            .field("logger", &self.logger.is_some())
            .finish()
    }
}

/// State shared with the gauge supplier.
struct Shared {
    machine: StateMachine,
    logger: Option<Arc<dyn Logger>>,
}

impl Shared {
    fn state(&self) -> State {
        let (state, transitions) = self.machine.state();
        self.log_transitions(&transitions);
        state
    }

    fn log_transitions(&self, transitions: &[Transition]) {
        let Some(logger) = &self.logger else {
            return;
        };
        let name = &self.machine.settings().name;
        for (from, to) in transitions {
            logger.info(
                "Circuit breaker state transition.",
                &[("circuit_breaker", name), ("from_state", from), ("to_state", to)],
            );
            if *from == State::Closed && *to == State::Open {
                logger.circuit_breaker_open("Circuit breaker opened.", &[("circuit_breaker", name)]);
            } else if *to == State::Closed {
                logger.info("Circuit breaker closed.", &[("circuit_breaker", name)]);
            }
        }
    }
}

/// Rejects calls to a failing dependency until it recovers.
pub struct CircuitBreaker {
    shared: Arc<Shared>,
    instrumentation: Option<Arc<dyn Instrumentation>>,
    gauge: Option<StateSupplier>,
}

impl CircuitBreaker {
    pub fn new(opts: CircuitBreakerOptions) -> Self {
        let machine = StateMachine::new(Settings {
            name: Arc::from(opts.name.as_str()),
            failure_rate_threshold: opts.failure_rate_threshold,
            wait_open: opts.wait_open,
            reset_interval: opts.reset_interval,
            half_open_max_requests: opts.half_open_max_requests.max(1),
        });
        let shared = Arc::new(Shared {
            machine,
            logger: opts.logger,
        });

        let gauge = opts.instrumentation.as_ref().map(|instrumentation| {
            let supplied = Arc::downgrade(&shared);
            // Clones kept past the breaker's drop read as closed.
            let supplier: StateSupplier = Arc::new(move || match supplied.upgrade() {
                Some(shared) => shared.state().as_str(),
                None => State::Closed.as_str(),
            });
            instrumentation.register_circuit_breaker_state_gauge(&opts.name, supplier.clone());
            supplier
        });

        Self {
            shared,
            instrumentation: opts.instrumentation,
            gauge,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.machine.settings().name
    }

    /// Current state; an expired open wait moves the breaker to half-open.
    pub fn state(&self) -> State {
        self.shared.state()
    }

    /// Snapshot of the current generation's counters.
    pub fn counts(&self) -> Counts {
        self.shared.machine.counts()
    }

    /// Run `work` if the breaker admits it.
    ///
    /// Returns `CircuitOpen`/`TooManyRequests` without invoking `work` when
    /// rejected, and the context's error if it has already ended.
    pub async fn execute<F, Fut, T>(&self, ctx: &Context, work: F) -> CallResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let result = match ctx.err() {
            // An ended caller is reported but never admitted.
            Some(err) => Err(err),
            None => self.admit_and_run(work).await,
        };

        if let Some(instrumentation) = &self.instrumentation {
            instrumentation.record_circuit_breaker_call(self.name(), result.as_ref().err());
        }
        result
    }

    async fn admit_and_run<F, Fut, T>(&self, work: F) -> CallResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = CallResult<T>>,
    {
        let (admitted, transitions) = self.shared.machine.before_call();
        self.shared.log_transitions(&transitions);
        let admission = admitted?;

        let mut call = AdmittedCall::new(&self.shared, admission);
        let result = work().await;
        call.complete(result.is_ok());
        result
    }
}

impl Drop for CircuitBreaker {
    fn drop(&mut self) {
        if let (Some(instrumentation), Some(gauge)) = (&self.instrumentation, &self.gauge) {
            instrumentation.unregister_circuit_breaker_state_gauge(self.name(), gauge);
        }
    }
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.name())
            .field("settings", self.shared.machine.settings())
            .finish()
    }
}

/// Reports an admitted call's result exactly once; a call dropped before
/// completing is reported as a failure.
struct AdmittedCall<'a> {
    shared: &'a Shared,
    admission: Option<Admission>,
}

impl<'a> AdmittedCall<'a> {
    fn new(shared: &'a Shared, admission: Admission) -> Self {
        Self {
            shared,
            admission: Some(admission),
        }
    }

    fn complete(&mut self, success: bool) {
        if let Some(admission) = self.admission.take() {
            let transitions = self.shared.machine.after_call(admission, success);
            self.shared.log_transitions(&transitions);
        }
    }
}

impl Drop for AdmittedCall<'_> {
    fn drop(&mut self) {
        self.complete(false);
    }
}
