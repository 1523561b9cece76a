//! Resilience toolkit for outbound calls.
//!
//! Wraps any asynchronous unit of work in a retry, a circuit breaker or a
//! timeout, and builds one shared set of these per named policy.

pub mod config;
pub mod context;
pub mod error;
pub mod observability;
pub mod resilience;

pub use config::schema::ResilienceConfig;
pub use context::Context;
pub use error::{BoxError, CallError, CallResult};
pub use resilience::{CircuitBreaker, ResilienceKit, Retry, Timeout};
