//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound call:
//!     → token_bucket.rs (permit or suggested wait)
//!     → timeouts.rs (per-call budget across waits and attempts)
//!     → On failure: retries.rs (classify, decide, compute delay)
//!         → backoff.rs (constant / linear / exponential + jitter)
//! ```
//!
//! # Design Decisions
//! - Nothing here sleeps; the invoker owns every suspension point
//! - A server-stated backoff overrides the computed delay
//! - Jittered backoff prevents synchronized retry storms

pub mod backoff;
pub mod retries;
pub mod timeouts;
pub mod token_bucket;

pub use backoff::BackoffStrategy;
pub use retries::{Disposition, GiveUpReason, RetryDecision, RetryPolicy};
pub use timeouts::Deadline;
pub use token_bucket::{RateLimitStatus, TokenBucket};
