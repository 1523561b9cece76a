//! Backoff strategies for retries.
//!
//! A strategy maps the 1-based retry attempt to the wait before it.

use rand::Rng;
use std::fmt::Debug;
use std::time::Duration;

/// Wait schedule between retry attempts.
pub trait BackOff: Debug + Send + Sync {
    /// Wait before retry `attempt` (1 = first retry).
    fn next(&self, attempt: u32) -> Duration;
}

/// Same wait before every retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantBackoff {
    delay: Duration,
}

impl ConstantBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackOff for ConstantBackoff {
    fn next(&self, _attempt: u32) -> Duration {
        self.delay
    }
}

/// `initial` plus `base_secs ^ (attempt - 1)` whole seconds.
///
/// The growth term exponentiates the base's seconds value; it is not a
/// multiplier on `initial`. The first retry waits exactly `initial`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExponentialBackoff {
    initial: Duration,
    base: Duration,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, base: Duration) -> Self {
        Self { initial, base }
    }
}

impl BackOff for ExponentialBackoff {
    fn next(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return self.initial;
        }
        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let growth = self.base.as_secs_f64().powi(exponent);
        // `as` saturates: NaN -> 0, +inf -> u64::MAX
        let growth = Duration::from_secs(growth as u64);
        self.initial.saturating_add(growth)
    }
}

/// Adds up to `ratio` of random extra delay on top of another strategy.
#[derive(Debug, Clone)]
pub struct JitteredBackoff<B> {
    inner: B,
    ratio: f64,
}

impl<B: BackOff> JitteredBackoff<B> {
    pub const DEFAULT_RATIO: f64 = 0.1;

    pub fn new(inner: B) -> Self {
        Self::with_ratio(inner, Self::DEFAULT_RATIO)
    }

    /// `ratio` is clamped to `[0, 1]`.
    pub fn with_ratio(inner: B, ratio: f64) -> Self {
        let ratio = if ratio.is_finite() { ratio.clamp(0.0, 1.0) } else { 0.0 };
        Self { inner, ratio }
    }
}

impl<B: BackOff> BackOff for JitteredBackoff<B> {
    fn next(&self, attempt: u32) -> Duration {
        let delay = self.inner.next(attempt);
        let jitter_range =
            Duration::try_from_secs_f64(delay.as_secs_f64() * self.ratio).unwrap_or(Duration::ZERO);
        if jitter_range.is_zero() {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(Duration::ZERO..jitter_range);
        delay.saturating_add(jitter)
    }
}
