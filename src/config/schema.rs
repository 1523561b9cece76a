//! Configuration schema definitions.
//!
//! This module defines the policy set a kit is built from. All types derive
//! Serde traits for deserialization from config files; durations are given
//! in milliseconds.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::resilience::{
    BackOff, CircuitBreakerOptions, ConstantBackoff, ExponentialBackoff, JitteredBackoff,
    ResilienceKitOptions, RetryOptions, TimeoutOptions,
};

/// Root configuration for one named policy set.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Name used by every section that does not set its own.
    pub name: String,

    /// Retry policy.
    pub retry: RetryConfig,

    /// Circuit breaker policy.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Timeout policy.
    pub timeout: TimeoutConfig,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            timeout: TimeoutConfig::default(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Overrides the top-level name.
    pub name: Option<String>,

    /// Retries after the first attempt.
    pub max_retries: u32,

    /// Wait between attempts.
    pub backoff: BackoffConfig,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            name: None,
            max_retries: 3,
            backoff: BackoffConfig::default(),
        }
    }
}

/// Backoff strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Retry immediately.
    None,
    /// Fixed `delay_ms` before every retry.
    Constant,
    /// `initial_ms` plus `base_ms`-seconds raised to the retry number minus one.
    #[default]
    Exponential,
}

/// Backoff configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub kind: BackoffKind,

    /// Delay for `constant`.
    pub delay_ms: u64,

    /// First retry delay for `exponential`.
    pub initial_ms: u64,

    /// Exponentiated base for `exponential`.
    pub base_ms: u64,

    /// Optional random extra delay as a fraction of the computed delay.
    pub jitter_ratio: Option<f64>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            kind: BackoffKind::Exponential,
            delay_ms: 500,
            initial_ms: 100,
            base_ms: 2000,
            jitter_ratio: None,
        }
    }
}

impl BackoffConfig {
    /// Build the configured strategy; `None` for `kind = "none"`.
    pub fn build(&self) -> Option<Arc<dyn BackOff>> {
        match (self.kind, self.jitter_ratio) {
            (BackoffKind::None, _) => None,
            (BackoffKind::Constant, None) => Some(Arc::new(self.constant())),
            (BackoffKind::Constant, Some(ratio)) => {
                Some(Arc::new(JitteredBackoff::with_ratio(self.constant(), ratio)))
            }
            (BackoffKind::Exponential, None) => Some(Arc::new(self.exponential())),
            (BackoffKind::Exponential, Some(ratio)) => {
                Some(Arc::new(JitteredBackoff::with_ratio(self.exponential(), ratio)))
            }
        }
    }

    fn constant(&self) -> ConstantBackoff {
        ConstantBackoff::new(Duration::from_millis(self.delay_ms))
    }

    fn exponential(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(
            Duration::from_millis(self.initial_ms),
            Duration::from_millis(self.base_ms),
        )
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Overrides the top-level name.
    pub name: Option<String>,

    /// Failure fraction in [0, 1] that opens the breaker.
    pub failure_rate_threshold: f64,

    /// Time spent open before probing, in milliseconds.
    pub wait_open_ms: u64,

    /// Closed-state counter reset period in milliseconds (0 = never).
    pub reset_interval_ms: u64,

    /// Probe calls admitted while half-open.
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            name: None,
            failure_rate_threshold: 0.5,
            wait_open_ms: 30_000,
            reset_interval_ms: 60_000,
            half_open_max_requests: 1,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Overrides the top-level name.
    pub name: Option<String>,

    /// Time limit per call in milliseconds.
    pub time_limit_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            name: None,
            time_limit_ms: 1_000,
        }
    }
}

impl ResilienceConfig {
    pub fn retry_name(&self) -> &str {
        self.retry.name.as_deref().unwrap_or(&self.name)
    }

    pub fn circuit_breaker_name(&self) -> &str {
        self.circuit_breaker.name.as_deref().unwrap_or(&self.name)
    }

    pub fn timeout_name(&self) -> &str {
        self.timeout.name.as_deref().unwrap_or(&self.name)
    }

    /// Executor options without collaborators attached.
    pub fn kit_options(&self) -> ResilienceKitOptions {
        let mut retry = RetryOptions::new(self.retry_name(), self.retry.max_retries);
        retry.backoff = self.retry.backoff.build();

        let cb = &self.circuit_breaker;
        let circuit_breaker = CircuitBreakerOptions::new(
            self.circuit_breaker_name(),
            cb.failure_rate_threshold,
            Duration::from_millis(cb.wait_open_ms),
        )
        .with_reset_interval(Duration::from_millis(cb.reset_interval_ms))
        .with_half_open_max_requests(cb.half_open_max_requests);

        let timeout = TimeoutOptions::new(
            self.timeout_name(),
            Duration::from_millis(self.timeout.time_limit_ms),
        );

        ResilienceKitOptions {
            retry,
            circuit_breaker,
            timeout,
        }
    }
}
