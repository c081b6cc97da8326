//! Resilient outbound calls to third-party services.
//!
//! Every call goes through a [`ResilientInvoker`] that serves cached reads,
//! paces calls with a token bucket, retries transient failures with backoff
//! and records each step in an in-memory audit trail.

pub mod audit;
pub mod cache;
pub mod clients;
pub mod config;
pub mod error;
pub mod invoker;
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use config::schema::GuardConfig;
pub use error::{FailureKind, InvokeError, InvokeResult, RemoteFailure};
pub use invoker::{RequestDescriptor, ResilientInvoker};
pub use lifecycle::Shutdown;
