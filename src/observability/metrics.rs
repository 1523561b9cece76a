//! Metrics collection.
//!
//! # Responsibilities
//! - Define the `Instrumentation` collaborator the executors report through
//! - Provide an implementation on the `metrics` facade
//! - Publish circuit breaker state gauges on demand or periodically
//!
//! # Metrics
//! - `resilience_retry_calls_total` (counter): retry calls by name, outcome
//! - `resilience_retry_attempts` (histogram): invocations per retry call
//! - `resilience_timeout_calls_total` (counter): timed calls by name, outcome
//! - `resilience_circuit_breaker_calls_total` (counter): by name, result
//! - `resilience_circuit_breaker_state` (gauge): 1 for the current state, 0 otherwise
//!
//! # Design Decisions
//! - No exporter is installed here; the embedding service owns the recorder
//! - Reporting is fire-and-forget and never fails a call

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time;

use crate::context::Context;
use crate::error::CallError;
use crate::resilience::retries::RetryOutcome;
use crate::resilience::state::State;
use crate::resilience::timeouts::TimeoutOutcome;

/// Reports the current state name of a circuit breaker.
pub type StateSupplier = Arc<dyn Fn() -> &'static str + Send + Sync>;

/// Metric sink used by the executors.
pub trait Instrumentation: Send + Sync {
    fn record_retry_call(&self, _name: &str, _attempts: u32, _outcome: RetryOutcome) {}

    fn record_timeout_call(&self, _name: &str, _outcome: TimeoutOutcome) {}

    /// `error` is `None` for a successful call.
    fn record_circuit_breaker_call(&self, _name: &str, _error: Option<&CallError>) {}

    /// Called once when a breaker is constructed.
    fn register_circuit_breaker_state_gauge(&self, _name: &str, _supplier: StateSupplier) {}

    /// Called when the breaker that registered `supplier` is dropped.
    fn unregister_circuit_breaker_state_gauge(&self, _name: &str, _supplier: &StateSupplier) {}
}

/// `Instrumentation` backed by the `metrics` crate.
#[derive(Default)]
pub struct MetricsInstrumentation {
    state_suppliers: DashMap<String, StateSupplier>,
}

impl MetricsInstrumentation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of breakers whose state is published.
    pub fn registered_breakers(&self) -> usize {
        self.state_suppliers.len()
    }

    /// Set the state gauge of every registered breaker.
    pub fn publish_state_gauges(&self) {
        for entry in self.state_suppliers.iter() {
            let current = (entry.value())();
            set_state_gauge(entry.key(), Some(current));
        }
    }

    /// Publish state gauges every `every` until `ctx` ends.
    pub fn spawn_state_gauge_refresher(self: Arc<Self>, every: Duration, ctx: Context) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(every);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.publish_state_gauges(),
                    _ = ctx.done() => {
                        tracing::debug!("State gauge refresher stopping");
                        break;
                    }
                }
            }
        })
    }
}

impl Instrumentation for MetricsInstrumentation {
    fn record_retry_call(&self, name: &str, attempts: u32, outcome: RetryOutcome) {
        metrics::counter!(
            "resilience_retry_calls_total",
            "name" => name.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
        metrics::histogram!(
            "resilience_retry_attempts",
            "name" => name.to_string(),
            "outcome" => outcome.as_str()
        )
        .record(attempts as f64);
    }

    fn record_timeout_call(&self, name: &str, outcome: TimeoutOutcome) {
        metrics::counter!(
            "resilience_timeout_calls_total",
            "name" => name.to_string(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    fn record_circuit_breaker_call(&self, name: &str, error: Option<&CallError>) {
        let result = match error {
            None => "success",
            Some(err) if err.is_rejected() => "rejected",
            Some(_) => "failure",
        };
        metrics::counter!(
            "resilience_circuit_breaker_calls_total",
            "name" => name.to_string(),
            "result" => result
        )
        .increment(1);
    }

    fn register_circuit_breaker_state_gauge(&self, name: &str, supplier: StateSupplier) {
        if self.state_suppliers.insert(name.to_string(), supplier).is_some() {
            tracing::debug!(breaker = %name, "Replaced circuit breaker state supplier");
        }
    }

    fn unregister_circuit_breaker_state_gauge(&self, name: &str, supplier: &StateSupplier) {
        // A newer breaker may have replaced the supplier under the same name.
        let removed = self
            .state_suppliers
            .remove_if(name, |_, registered| Arc::ptr_eq(registered, supplier));
        if removed.is_some() {
            set_state_gauge(name, None);
        }
    }
}

/// One series per state: 1 for `current`, 0 for the rest (all 0 once gone).
fn set_state_gauge(name: &str, current: Option<&str>) {
    for state in State::ALL {
        let value = if Some(state.as_str()) == current { 1.0 } else { 0.0 };
        metrics::gauge!(
            "resilience_circuit_breaker_state",
            "name" => name.to_string(),
            "state" => state.as_str()
        )
        .set(value);
    }
}
