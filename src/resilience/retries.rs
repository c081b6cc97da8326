//! Retry logic.
//!
//! # Responsibilities
//! - Classify a remote failure as retryable or terminal
//! - Compute the delay before the next attempt
//! - Stop once `max_attempts` attempts have been made
//!
//! # Design Decisions
//! - Classification is a total match over `FailureKind`; statuses only matter
//!   for `Server` / `Client` failures
//! - Network failures and timeouts are always retryable
//! - A server-stated backoff wins over the computed delay, up to
//!   `max_server_backoff`

use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::error::{FailureKind, RemoteFailure};
use crate::resilience::backoff::{apply_jitter, calculate_backoff, BackoffStrategy};

/// Whether a failure may be retried at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Retryable,
    Terminal,
}

/// Why the policy stopped retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The failure is not retryable.
    Terminal,
    /// `max_attempts` attempts have been made.
    Exhausted,
}

/// Outcome of [`RetryPolicy::should_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry(Duration),
    GiveUp(GiveUpReason),
}

/// Retry policy for one invoker.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub strategy: BackoffStrategy,
    pub jitter: bool,
    pub retryable_statuses: BTreeSet<u16>,
    /// Ceiling on `Retry-After` hints.
    pub max_server_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            strategy: config.strategy,
            jitter: config.jitter,
            retryable_statuses: config.retryable_statuses.iter().copied().collect(),
            max_server_backoff: Duration::from_secs(config.max_retry_after_secs),
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::from_config(&RetryConfig::default())
        }
    }

    pub fn classify(&self, failure: &RemoteFailure) -> Disposition {
        let retryable = match failure.kind {
            FailureKind::Network | FailureKind::Timeout | FailureKind::RateLimited => true,
            FailureKind::Server | FailureKind::Client => failure
                .status
                .is_some_and(|status| self.retryable_statuses.contains(&status)),
            FailureKind::Validation | FailureKind::Authentication | FailureKind::Decode => false,
        };
        if retryable {
            Disposition::Retryable
        } else {
            Disposition::Terminal
        }
    }

    /// Delay after failed attempt `attempt`, before jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        calculate_backoff(self.strategy, attempt, self.base_delay, self.max_delay)
    }

    /// Decide what to do after attempt number `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32, failure: &RemoteFailure) -> RetryDecision {
        if self.classify(failure) == Disposition::Terminal {
            return RetryDecision::GiveUp(GiveUpReason::Terminal);
        }
        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp(GiveUpReason::Exhausted);
        }

        if let Some(hint) = failure.retry_after {
            return RetryDecision::Retry(hint.min(self.max_server_backoff));
        }

        let delay = self.delay_for(attempt);
        if self.jitter {
            RetryDecision::Retry(apply_jitter(delay))
        } else {
            RetryDecision::Retry(delay)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}
