//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call, nested by the caller, e.g.:
//!     → circuit_breaker.rs (reject fast while the dependency is failing)
//!     → retries.rs (re-invoke retryable failures, waiting per backoff.rs)
//!     → timeouts.rs (bound each attempt with a deadline)
//!     → unit of work
//!
//! kit.rs builds each executor once per policy set and shares it.
//! ```
//!
//! # Design Decisions
//! - Every executor has the same shape: `execute(&ctx, work) -> CallResult<T>`
//! - No fixed nesting order; composition is up to the caller
//! - Executors are `Send + Sync` and meant to be shared by all callers of
//!   one dependency
//! - Reporting goes through optional collaborators and never alters results

pub mod backoff;
pub mod circuit_breaker;
pub mod kit;
pub mod retries;
pub mod state;
pub mod timeouts;

pub use backoff::{BackOff, ConstantBackoff, ExponentialBackoff, JitteredBackoff};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerOptions, DEFAULT_RESET_INTERVAL};
pub use kit::{Collaborators, ResilienceKit, ResilienceKitOptions};
pub use retries::{retry_unless_cancelled, Retry, RetryOptions, RetryOutcome, RetryPredicate};
pub use state::{Counts, State};
pub use timeouts::{Timeout, TimeoutOptions, TimeoutOutcome};
