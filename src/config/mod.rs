//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GuardConfig (validated)
//!     → ResilientInvoker::new / ResilientInvoker::apply_config
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → update sent over mpsc
//!     → invoker applies rate limit / cache / retry / audit sections in place
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Section validators are shared with the invoker's runtime update methods

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuditConfig, CacheConfig, GuardConfig, LogFormat, ObservabilityConfig, RateLimitConfig,
    RetryConfig, ServiceConfig, TimeoutConfig,
};
pub use validation::ValidationError;
