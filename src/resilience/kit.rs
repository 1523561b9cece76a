//! Lazily built, shared executors for one named policy set.
//!
//! Each accessor constructs its executor on first use and returns the same
//! instance for the lifetime of the kit, also under concurrent first access.

use std::fmt;
use std::sync::{Arc, OnceLock};

use crate::config::ResilienceConfig;
use crate::observability::{Instrumentation, Logger};
use crate::resilience::circuit_breaker::{CircuitBreaker, CircuitBreakerOptions};
use crate::resilience::retries::{Retry, RetryOptions};
use crate::resilience::timeouts::{Timeout, TimeoutOptions};

/// Options for every executor a kit can build.
#[derive(Debug, Clone)]
pub struct ResilienceKitOptions {
    pub retry: RetryOptions,
    pub circuit_breaker: CircuitBreakerOptions,
    pub timeout: TimeoutOptions,
}

/// Logger and instrumentation shared by every executor of a kit.
#[derive(Clone, Default)]
pub struct Collaborators {
    pub logger: Option<Arc<dyn Logger>>,
    pub instrumentation: Option<Arc<dyn Instrumentation>>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("logger", &self.logger.is_some())
            .field("instrumentation", &self.instrumentation.is_some())
            .finish()
    }
}

impl ResilienceKitOptions {
    /// Attach the same collaborators to all three executors.
    pub fn with_collaborators(mut self, collaborators: Collaborators) -> Self {
        let Collaborators {
            logger,
            instrumentation,
        } = collaborators;
        self.retry.logger = logger.clone();
        self.retry.instrumentation = instrumentation.clone();
        self.circuit_breaker.logger = logger.clone();
        self.circuit_breaker.instrumentation = instrumentation.clone();
        self.timeout.logger = logger;
        self.timeout.instrumentation = instrumentation;
        self
    }
}

/// One retry, circuit breaker and timeout, built at most once each.
#[derive(Debug)]
pub struct ResilienceKit {
    opts: ResilienceKitOptions,
    retry: OnceLock<Retry>,
    circuit_breaker: OnceLock<CircuitBreaker>,
    timeout: OnceLock<Timeout>,
}

impl ResilienceKit {
    pub fn new(opts: ResilienceKitOptions) -> Self {
        Self {
            opts,
            retry: OnceLock::new(),
            circuit_breaker: OnceLock::new(),
            timeout: OnceLock::new(),
        }
    }

    /// Kit for a validated configuration.
    pub fn from_config(config: &ResilienceConfig, collaborators: Collaborators) -> Self {
        Self::new(config.kit_options().with_collaborators(collaborators))
    }

    pub fn options(&self) -> &ResilienceKitOptions {
        &self.opts
    }

    pub fn retry(&self) -> &Retry {
        self.retry.get_or_init(|| {
            tracing::debug!(retry = %self.opts.retry.name, "Building retry executor");
            Retry::new(self.opts.retry.clone())
        })
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        self.circuit_breaker.get_or_init(|| {
            tracing::debug!(circuit_breaker = %self.opts.circuit_breaker.name, "Building circuit breaker");
            CircuitBreaker::new(self.opts.circuit_breaker.clone())
        })
    }

    pub fn timeout(&self) -> &Timeout {
        self.timeout.get_or_init(|| {
            tracing::debug!(timeout = %self.opts.timeout.name, "Building timeout executor");
            Timeout::new(self.opts.timeout.clone())
        })
    }
}
