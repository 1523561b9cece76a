//! Call context: cancellation and deadline propagation.
//!
//! # Responsibilities
//! - Carry a cancellation signal from the caller down to the unit of work
//! - Carry an optional deadline, tightened (never loosened) by children
//! - Race futures and sleeps against both
//!
//! # Design Decisions
//! - Cancellation uses `CancellationToken`; child tokens follow their parent
//! - Deadlines use Tokio's clock so paused-time tests control them
//! - A context is a cheap clone; it holds no resources of its own

use std::future::Future;
use std::time::Duration;
use tokio::time::{self, Instant};
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::CallError;

/// Cancellation and deadline scope for a call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a child that can be cancelled independently of the parent.
    pub fn with_cancel(&self) -> (Context, CancellationToken) {
        let token = self.token.child_token();
        let child = Context {
            token: token.clone(),
            deadline: self.deadline,
        };
        (child, token)
    }

    /// Derive a child whose deadline is at most `limit` from now.
    ///
    /// Dropping the returned guard releases the child.
    pub fn with_timeout(&self, limit: Duration) -> (Context, DropGuard) {
        // A limit past the clock's range leaves the parent deadline in place.
        let deadline = match (self.deadline, Instant::now().checked_add(limit)) {
            (Some(parent), Some(candidate)) => Some(parent.min(candidate)),
            (parent, None) => parent,
            (None, candidate) => candidate,
        };
        let token = self.token.child_token();
        let child = Context {
            token: token.clone(),
            deadline,
        };
        (child, token.drop_guard())
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Why the context ended, or `None` while it is still live.
    pub fn err(&self) -> Option<CallError> {
        if self.token.is_cancelled() {
            return Some(CallError::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CallError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolve once the context ends.
    pub async fn done(&self) -> CallError {
        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = self.token.cancelled() => CallError::Cancelled,
                _ = time::sleep_until(deadline) => CallError::DeadlineExceeded,
            },
            None => {
                self.token.cancelled().await;
                CallError::Cancelled
            }
        }
    }

    /// Drive `fut` until it completes or the context ends.
    ///
    /// When both are ready in the same poll the future's output wins.
    pub async fn run<F>(&self, fut: F) -> Result<F::Output, CallError>
    where
        F: Future,
    {
        tokio::select! {
            biased;
            output = fut => Ok(output),
            err = self.done() => Err(err),
        }
    }

    /// Sleep for `duration` unless the context ends first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), CallError> {
        if let Some(err) = self.err() {
            return Err(err);
        }
        if duration.is_zero() {
            return Ok(());
        }
        self.run(time::sleep(duration)).await
    }
}
