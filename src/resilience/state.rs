//! Circuit breaker state machine.
//!
//! # States
//! - Closed: calls pass through, outcomes are counted
//! - Open: calls are rejected without running
//! - HalfOpen: a limited number of probe calls are admitted
//!
//! # State Transitions
//! ```text
//! Closed → Open: failures / (successes + failures) >= threshold, on a failure
//! Open → HalfOpen: wait_open elapsed (checked lazily on the next access)
//! HalfOpen → Closed: half_open_max_requests consecutive probe successes
//! HalfOpen → Open: any probe failure
//! ```
//!
//! Counters belong to a generation. A new generation starts on every
//! transition and every `reset_interval` while closed; results of calls
//! admitted in an older generation are dropped.

use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

use crate::error::CallError;

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

impl State {
    pub const ALL: [State; 3] = [State::Closed, State::Open, State::HalfOpen];

    pub fn as_str(&self) -> &'static str {
        match self {
            State::Closed => "closed",
            State::Open => "open",
            State::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rolling counters of the current generation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counts {
    /// Calls admitted.
    pub requests: u32,
    pub total_successes: u32,
    pub total_failures: u32,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

impl Counts {
    fn on_request(&mut self) {
        self.requests = self.requests.saturating_add(1);
    }

    fn on_success(&mut self) {
        self.total_successes = self.total_successes.saturating_add(1);
        self.consecutive_successes = self.consecutive_successes.saturating_add(1);
        self.consecutive_failures = 0;
    }

    fn on_failure(&mut self) {
        self.total_failures = self.total_failures.saturating_add(1);
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.consecutive_successes = 0;
    }

    /// Failure fraction of completed calls, `None` before any completed.
    pub fn failure_rate(&self) -> Option<f64> {
        let total = u64::from(self.total_successes) + u64::from(self.total_failures);
        if total == 0 {
            return None;
        }
        Some(self.total_failures as f64 / total as f64)
    }
}

/// Tuning of a state machine.
#[derive(Debug, Clone)]
pub(crate) struct Settings {
    pub name: std::sync::Arc<str>,
    pub failure_rate_threshold: f64,
    pub wait_open: Duration,
    /// Zero disables periodic resets while closed.
    pub reset_interval: Duration,
    pub half_open_max_requests: u32,
}

/// A state change, reported after the lock is released.
pub(crate) type Transition = (State, State);

/// Ticket for an admitted call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Admission {
    generation: u64,
}

struct Inner {
    state: State,
    generation: u64,
    counts: Counts,
    /// End of the current generation: reset time while closed, end of wait while open.
    expiry: Option<Instant>,
}

pub(crate) struct StateMachine {
    settings: Settings,
    inner: Mutex<Inner>,
}

impl StateMachine {
    pub fn new(settings: Settings) -> Self {
        let now = Instant::now();
        let mut inner = Inner {
            state: State::Closed,
            generation: 0,
            counts: Counts::default(),
            expiry: None,
        };
        inner.expiry = Self::expiry_for(&settings, State::Closed, now);
        Self {
            settings,
            inner: Mutex::new(inner),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current state, applying any time-based transition that is due.
    pub fn state(&self) -> (State, Vec<Transition>) {
        let mut transitions = Vec::new();
        let mut inner = self.lock();
        let state = self.current_state(&mut inner, Instant::now(), &mut transitions);
        (state, transitions)
    }

    pub fn counts(&self) -> Counts {
        self.lock().counts
    }

    /// Admit a call or reject it according to the current state.
    pub fn before_call(&self) -> (Result<Admission, CallError>, Vec<Transition>) {
        let mut transitions = Vec::new();
        let mut inner = self.lock();
        let state = self.current_state(&mut inner, Instant::now(), &mut transitions);

        let admitted = match state {
            State::Open => Err(CallError::CircuitOpen {
                name: self.settings.name.clone(),
            }),
            State::HalfOpen if inner.counts.requests >= self.settings.half_open_max_requests => {
                Err(CallError::TooManyRequests {
                    name: self.settings.name.clone(),
                })
            }
            _ => {
                inner.counts.on_request();
                Ok(Admission {
                    generation: inner.generation,
                })
            }
        };
        (admitted, transitions)
    }

    /// Feed the result of an admitted call into the counters.
    pub fn after_call(&self, admission: Admission, success: bool) -> Vec<Transition> {
        let mut transitions = Vec::new();
        let mut inner = self.lock();
        let now = Instant::now();
        let state = self.current_state(&mut inner, now, &mut transitions);
        if inner.generation != admission.generation {
            tracing::trace!(breaker = %self.settings.name, "Dropping result from a previous generation");
            return transitions;
        }

        if success {
            self.on_success(&mut inner, state, now, &mut transitions);
        } else {
            self.on_failure(&mut inner, state, now, &mut transitions);
        }
        transitions
    }

    fn on_success(&self, inner: &mut Inner, state: State, now: Instant, transitions: &mut Vec<Transition>) {
        match state {
            State::Closed => inner.counts.on_success(),
            State::HalfOpen => {
                inner.counts.on_success();
                if inner.counts.consecutive_successes >= self.settings.half_open_max_requests {
                    self.set_state(inner, State::Closed, now, transitions);
                }
            }
            State::Open => {}
        }
    }

    fn on_failure(&self, inner: &mut Inner, state: State, now: Instant, transitions: &mut Vec<Transition>) {
        match state {
            State::Closed => {
                inner.counts.on_failure();
                if self.ready_to_trip(&inner.counts) {
                    self.set_state(inner, State::Open, now, transitions);
                }
            }
            State::HalfOpen => self.set_state(inner, State::Open, now, transitions),
            State::Open => {}
        }
    }

    fn ready_to_trip(&self, counts: &Counts) -> bool {
        counts
            .failure_rate()
            .is_some_and(|rate| rate >= self.settings.failure_rate_threshold)
    }

    fn current_state(&self, inner: &mut Inner, now: Instant, transitions: &mut Vec<Transition>) -> State {
        match (inner.state, inner.expiry) {
            (State::Closed, Some(expiry)) if expiry <= now => {
                tracing::debug!(breaker = %self.settings.name, "Resetting circuit breaker counters");
                self.new_generation(inner, now);
            }
            (State::Open, Some(expiry)) if expiry <= now => {
                self.set_state(inner, State::HalfOpen, now, transitions);
            }
            _ => {}
        }
        inner.state
    }

    fn set_state(&self, inner: &mut Inner, to: State, now: Instant, transitions: &mut Vec<Transition>) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        self.new_generation(inner, now);
        transitions.push((from, to));
    }

    fn new_generation(&self, inner: &mut Inner, now: Instant) {
        inner.generation = inner.generation.wrapping_add(1);
        inner.counts = Counts::default();
        inner.expiry = Self::expiry_for(&self.settings, inner.state, now);
    }

    fn expiry_for(settings: &Settings, state: State, now: Instant) -> Option<Instant> {
        match state {
            State::Closed if !settings.reset_interval.is_zero() => now.checked_add(settings.reset_interval),
            State::Open => now.checked_add(settings.wait_open),
            _ => None,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
