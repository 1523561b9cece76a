//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Executors produce:
//!     → logging.rs (Logger: warn/error/info/circuit_breaker_open events)
//!     → metrics.rs (Instrumentation: call outcomes, breaker state gauges)
//!
//! Consumers:
//!     → TracingLogger (tracing subscriber of the embedding service)
//!     → MetricsInstrumentation (metrics recorder of the embedding service)
//! ```
//!
//! # Design Decisions
//! - Both collaborators are optional; absence is a silent no-op
//! - Collaborator calls never block or fail the guarded call

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, Field, Logger, TracingLogger};
pub use metrics::{Instrumentation, MetricsInstrumentation, StateSupplier};
