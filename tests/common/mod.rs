//! Shared doubles for integration tests.

#![allow(dead_code)]

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use resilience_kit::observability::logging::DisplayFields;
use resilience_kit::observability::{Field, Instrumentation, Logger, StateSupplier};
use resilience_kit::resilience::{RetryOutcome, TimeoutOutcome};
use resilience_kit::{CallError, CallResult};

/// A log event as seen by `RecordingLogger`.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEvent {
    pub level: &'static str,
    pub message: String,
    pub fields: String,
}

/// Logger that keeps every event.
#[derive(Default)]
pub struct RecordingLogger {
    events: Mutex<Vec<LogEvent>>,
}

impl RecordingLogger {
    pub fn events(&self) -> Vec<LogEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, level: &str, message: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| e.level == level && e.message == message)
            .count()
    }

    fn push(&self, level: &'static str, message: &str, fields: &[Field<'_>]) {
        self.events.lock().unwrap().push(LogEvent {
            level,
            message: message.to_string(),
            fields: DisplayFields(fields).to_string(),
        });
    }
}

impl Logger for RecordingLogger {
    fn info(&self, message: &str, fields: &[Field<'_>]) {
        self.push("info", message, fields);
    }

    fn warn(&self, message: &str, fields: &[Field<'_>]) {
        self.push("warn", message, fields);
    }

    fn error(&self, message: &str, fields: &[Field<'_>]) {
        self.push("error", message, fields);
    }

    fn circuit_breaker_open(&self, message: &str, fields: &[Field<'_>]) {
        self.push("alert", message, fields);
    }
}

/// Instrumentation that keeps every report.
#[derive(Default)]
pub struct RecordingInstrumentation {
    pub retry_calls: Mutex<Vec<(String, u32, RetryOutcome)>>,
    pub timeout_calls: Mutex<Vec<(String, TimeoutOutcome)>>,
    pub breaker_calls: Mutex<Vec<(String, Option<String>)>>,
    pub gauges: Mutex<Vec<(String, StateSupplier)>>,
}

impl RecordingInstrumentation {
    pub fn retry_calls(&self) -> Vec<(String, u32, RetryOutcome)> {
        self.retry_calls.lock().unwrap().clone()
    }

    pub fn timeout_outcomes(&self) -> Vec<TimeoutOutcome> {
        self.timeout_calls.lock().unwrap().iter().map(|(_, o)| *o).collect()
    }

    /// Breaker reports as `None` for success or the error's display text.
    pub fn breaker_calls(&self) -> Vec<Option<String>> {
        self.breaker_calls.lock().unwrap().iter().map(|(_, e)| e.clone()).collect()
    }

    /// Current value of the first registered gauge supplier.
    pub fn gauge_state(&self) -> Option<&'static str> {
        self.gauges.lock().unwrap().first().map(|(_, supplier)| supplier())
    }
}

impl Instrumentation for RecordingInstrumentation {
    fn record_retry_call(&self, name: &str, attempts: u32, outcome: RetryOutcome) {
        self.retry_calls.lock().unwrap().push((name.to_string(), attempts, outcome));
    }

    fn record_timeout_call(&self, name: &str, outcome: TimeoutOutcome) {
        self.timeout_calls.lock().unwrap().push((name.to_string(), outcome));
    }

    fn record_circuit_breaker_call(&self, name: &str, error: Option<&CallError>) {
        self.breaker_calls
            .lock()
            .unwrap()
            .push((name.to_string(), error.map(ToString::to_string)));
    }

    fn register_circuit_breaker_state_gauge(&self, name: &str, supplier: StateSupplier) {
        self.gauges.lock().unwrap().push((name.to_string(), supplier));
    }
}

/// Error type returned by the test dependencies.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyError(pub &'static str);

impl fmt::Display for DependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dependency error: {}", self.0)
    }
}

impl std::error::Error for DependencyError {}

/// Dependency that fails its first `failures` invocations, then succeeds.
pub struct FlakyDependency {
    failures: u32,
    invocations: AtomicU32,
}

impl FlakyDependency {
    pub fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            failures,
            invocations: AtomicU32::new(0),
        })
    }

    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }

    pub async fn call(&self) -> CallResult<u32> {
        let n = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        if n <= self.failures {
            Err(CallError::failed(DependencyError("unavailable")))
        } else {
            Ok(n)
        }
    }
}
