//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated)
//!     → ResilienceKit::from_config (executor options + collaborators)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Wiring the kit into a service stays with the embedding service

pub mod loader;
pub mod schema;
pub mod validation;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{BackoffConfig, BackoffKind, CircuitBreakerConfig, ResilienceConfig, RetryConfig, TimeoutConfig};
pub use validation::{validate_config, ValidationError};
