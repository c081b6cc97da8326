//! Service clients.
//!
//! # Data Flow
//! ```text
//! typed client (compute.rs)
//!     → rest.rs (URL join, auth header, GET/POST/DELETE descriptors)
//!     → ResilientInvoker::execute (cache, permits, retries, audit)
//!     → reqwest → response classification → serde_json::Value
//!     → typed client decodes into domain structs
//! ```
//!
//! # Design Decisions
//! - Only GETs are cacheable; the cache key is path plus sorted query
//! - HTTP status mapping lives here, retry decisions stay in the invoker
//! - Clients never own the invoker; they share an `Arc` so several clients can
//!   draw from one rate budget

pub mod compute;
pub mod rest;

use thiserror::Error;

use crate::error::InvokeError;

pub use compute::{ComputeClient, CreatePod, GpuAvailability, GpuProvider, Pod, PodStatus};
pub use rest::RestClient;

/// Errors surfaced by service clients.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The resilient call itself failed.
    #[error(transparent)]
    Invoke(#[from] InvokeError),

    /// The call succeeded but the payload did not have the expected shape.
    #[error("unexpected '{operation}' response: {source}")]
    Decode {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("invalid base URL '{url}' for service '{service}': {source}")]
    BaseUrl {
        service: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid path '{path}': {source}")]
    Path {
        path: String,
        #[source]
        source: url::ParseError,
    },

    #[error("failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
