//! Error taxonomy shared by every executor.
//!
//! # Design Decisions
//! - One error type flows through all executors so they nest freely
//! - The unit of work's own error is carried verbatim in `Failed`
//! - Deadline, cancellation and breaker rejections are distinct variants,
//!   so callers classify a failure by inspecting the error alone

use std::error::Error as StdError;
use std::sync::Arc;
use thiserror::Error;

/// Boxed error produced by a unit of work.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Errors returned by a guarded call.
#[derive(Debug, Error)]
pub enum CallError {
    /// The caller's context was cancelled.
    #[error("context canceled")]
    Cancelled,

    /// The context deadline passed before the call finished.
    #[error("context deadline exceeded")]
    DeadlineExceeded,

    /// The circuit breaker is open; the work was not invoked.
    #[error("circuit breaker '{name}' is open")]
    CircuitOpen { name: Arc<str> },

    /// The circuit breaker is half-open and its probe slots are taken.
    #[error("circuit breaker '{name}' is half-open and not accepting more calls")]
    TooManyRequests { name: Arc<str> },

    /// The unit of work failed with its own error.
    #[error("{0}")]
    Failed(#[source] BoxError),
}

/// Result type for guarded calls.
pub type CallResult<T> = Result<T, CallError>;

impl CallError {
    /// Wrap a work error (or a plain message).
    pub fn failed<E>(err: E) -> Self
    where
        E: Into<BoxError>,
    {
        CallError::Failed(err.into())
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, CallError::Cancelled)
    }

    pub fn is_deadline_exceeded(&self) -> bool {
        matches!(self, CallError::DeadlineExceeded)
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen { .. })
    }

    /// True when a circuit breaker refused the call without invoking it.
    pub fn is_rejected(&self) -> bool {
        matches!(
            self,
            CallError::CircuitOpen { .. } | CallError::TooManyRequests { .. }
        )
    }

    /// Access the work's own error as a concrete type.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        match self {
            CallError::Failed(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }
}
