//! Structured logging.
//!
//! # Responsibilities
//! - Define the `Logger` collaborator the executors report through
//! - Provide a `tracing`-backed implementation
//! - Initialize a subscriber for binaries and tests
//!
//! # Design Decisions
//! - Every method has a no-op default; implementers override what they route
//! - Executors hold `Option<Arc<dyn Logger>>`; `None` logs nothing
//! - Fields are borrowed `Display` values, rendered only if an event is emitted

use std::fmt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A structured key/value pair attached to a log event.
pub type Field<'a> = (&'static str, &'a dyn fmt::Display);

/// Leveled event sink used by the executors.
pub trait Logger: Send + Sync {
    fn info(&self, _message: &str, _fields: &[Field<'_>]) {}

    fn warn(&self, _message: &str, _fields: &[Field<'_>]) {}

    fn error(&self, _message: &str, _fields: &[Field<'_>]) {}

    /// Alert-level event raised when a breaker trips from closed to open.
    fn circuit_breaker_open(&self, _message: &str, _fields: &[Field<'_>]) {}
}

/// `Logger` that forwards to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn info(&self, message: &str, fields: &[Field<'_>]) {
        tracing::info!(target: "resilience_kit", fields = %DisplayFields(fields), "{}", message);
    }

    fn warn(&self, message: &str, fields: &[Field<'_>]) {
        tracing::warn!(target: "resilience_kit", fields = %DisplayFields(fields), "{}", message);
    }

    fn error(&self, message: &str, fields: &[Field<'_>]) {
        tracing::error!(target: "resilience_kit", fields = %DisplayFields(fields), "{}", message);
    }

    fn circuit_breaker_open(&self, message: &str, fields: &[Field<'_>]) {
        tracing::error!(
            target: "resilience_kit",
            alert = "circuit_breaker_open",
            fields = %DisplayFields(fields),
            "{}",
            message
        );
    }
}

/// Renders fields as `key=value` pairs separated by spaces.
pub struct DisplayFields<'a, 'b>(pub &'a [Field<'b>]);

impl fmt::Display for DisplayFields<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{}={}", key, value)?;
        }
        Ok(())
    }
}

/// Install a global fmt subscriber filtered by `RUST_LOG`, falling back to
/// `default_directive`.
pub fn init_logging(default_directive: &str) -> Result<(), tracing_subscriber::util::TryInitError> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_directive.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
}
