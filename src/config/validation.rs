//! Semantic validation of a parsed configuration.
//!
//! Serde checks shape and types; this checks values. All problems are
//! collected so one run reports everything.

use thiserror::Error;

use crate::config::schema::ResilienceConfig;

/// A single invalid configuration value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("{section}: name must not be empty")]
    EmptyName { section: &'static str },

    #[error("circuit_breaker.failure_rate_threshold must be within [0, 1], got {0}")]
    ThresholdOutOfRange(f64),

    #[error("circuit_breaker.wait_open_ms must be greater than zero")]
    ZeroWaitOpen,

    #[error("circuit_breaker.half_open_max_requests must be greater than zero")]
    ZeroHalfOpenRequests,

    #[error("timeout.time_limit_ms must be greater than zero")]
    ZeroTimeLimit,

    #[error("retry.backoff.jitter_ratio must be within [0, 1], got {0}")]
    JitterOutOfRange(f64),
}

/// Check every value of `config`.
pub fn validate_config(config: &ResilienceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    for (section, name) in [
        ("retry", config.retry_name()),
        ("circuit_breaker", config.circuit_breaker_name()),
        ("timeout", config.timeout_name()),
    ] {
        if name.trim().is_empty() {
            errors.push(ValidationError::EmptyName { section });
        }
    }

    let threshold = config.circuit_breaker.failure_rate_threshold;
    if !(0.0..=1.0).contains(&threshold) {
        errors.push(ValidationError::ThresholdOutOfRange(threshold));
    }
    if config.circuit_breaker.wait_open_ms == 0 {
        errors.push(ValidationError::ZeroWaitOpen);
    }
    if config.circuit_breaker.half_open_max_requests == 0 {
        errors.push(ValidationError::ZeroHalfOpenRequests);
    }
    if config.timeout.time_limit_ms == 0 {
        errors.push(ValidationError::ZeroTimeLimit);
    }
    if let Some(ratio) = config.retry.backoff.jitter_ratio {
        if !(0.0..=1.0).contains(&ratio) {
            errors.push(ValidationError::JitterOutOfRange(ratio));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
