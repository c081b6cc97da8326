//! Outcome classification and the error taxonomy surfaced by the invoker.
//!
//! # Data Flow
//! ```text
//! remote call
//!     → RemoteFailure (kind + optional status / server backoff hint)
//!     → RetryPolicy classifies kind (total match, no string matching)
//!     → InvokeError returned to the service client
//! ```

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Kind of failure reported by a remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Request rejected locally or by the provider as malformed.
    Validation,
    /// Credentials missing, expired or insufficient (401/403).
    Authentication,
    /// Provider asked us to slow down (429).
    RateLimited,
    /// Request timed out at the transport or provider (408).
    Timeout,
    /// Connection-level failure, nothing was answered.
    Network,
    /// 5xx-class response.
    Server,
    /// 4xx-class response not covered by a more specific kind.
    Client,
    /// Response arrived but could not be decoded.
    Decode,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::Authentication => "authentication",
            FailureKind::RateLimited => "rate_limited",
            FailureKind::Timeout => "timeout",
            FailureKind::Network => "network",
            FailureKind::Server => "server",
            FailureKind::Client => "client",
            FailureKind::Decode => "decode",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure returned by a caller-supplied remote call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{kind} failure{}: {message}", .status.map(|s| format!(" (status {})", s)).unwrap_or_default())]
pub struct RemoteFailure {
    pub kind: FailureKind,
    /// HTTP-style status code, when the provider answered.
    pub status: Option<u16>,
    pub message: String,
    /// Backoff stated by the server (e.g. `Retry-After`).
    pub retry_after: Option<Duration>,
}

impl RemoteFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
            retry_after: None,
        }
    }

    /// Classify an HTTP status code into a failure.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => FailureKind::Authentication,
            408 => FailureKind::Timeout,
            422 => FailureKind::Validation,
            429 => FailureKind::RateLimited,
            500..=599 => FailureKind::Server,
            _ => FailureKind::Client,
        };
        Self {
            kind,
            status: Some(status),
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Timeout, message)
    }

    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self {
            kind: FailureKind::RateLimited,
            status: Some(429),
            message: "rate limit exceeded".to_string(),
            retry_after,
        }
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }
}

/// Errors returned by [`crate::invoker::ResilientInvoker::execute`].
#[derive(Debug, Clone, Error)]
pub enum InvokeError {
    /// The request descriptor was malformed. Never retried.
    #[error("invalid request: {0}")]
    Validation(String),

    /// No permit could be obtained within the remaining call budget.
    #[error("rate limited for '{operation}', next permit in {retry_after:?}")]
    RateLimited {
        operation: String,
        retry_after: Duration,
    },

    /// A non-retryable failure, surfaced unchanged.
    #[error("'{operation}' failed: {source}")]
    Terminal {
        operation: String,
        #[source]
        source: RemoteFailure,
    },

    /// Every allowed attempt failed; `last` is the final underlying failure.
    #[error("'{operation}' failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: RemoteFailure,
    },

    /// Cancellation was observed at a suspension point or during the call.
    #[error("'{operation}' cancelled")]
    Cancelled { operation: String },

    /// The per-call timeout budget ran out.
    #[error("'{operation}' exceeded its {budget:?} budget")]
    DeadlineExceeded { operation: String, budget: Duration },
}

impl InvokeError {
    /// The remote failure this error was caused by, if any.
    pub fn root_failure(&self) -> Option<&RemoteFailure> {
        match self {
            InvokeError::Terminal { source, .. } => Some(source),
            InvokeError::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, InvokeError::Cancelled { .. })
    }

    /// Short tag used in audit details and metric labels.
    pub fn tag(&self) -> &'static str {
        match self {
            InvokeError::Validation(_) => "validation",
            InvokeError::RateLimited { .. } => "rate_limited",
            InvokeError::Terminal { .. } => "terminal",
            InvokeError::RetriesExhausted { .. } => "retries_exhausted",
            InvokeError::Cancelled { .. } => "cancelled",
            InvokeError::DeadlineExceeded { .. } => "deadline_exceeded",
        }
    }
}

/// Result type for invoker operations.
pub type InvokeResult<T> = Result<T, InvokeError>;
