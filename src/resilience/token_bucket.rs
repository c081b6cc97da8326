//! Token bucket rate limiter.
//!
//! The bucket never sleeps. `acquire` either grants the permit or reports how
//! long the caller has to wait before asking again; suspending is the caller's
//! job (see `invoker::executor`).

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

struct BucketState {
    enabled: bool,
    capacity: f64,
    refill_rate: f64,
    tokens: f64,
    last_refill: Instant,
}

impl BucketState {
    fn refill(&mut self, now: Instant) {
        // `now` may lag behind when callers pass explicit instants
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_rate).min(self.capacity);
        if now > self.last_refill {
            self.last_refill = now;
        }
    }

    fn wait_for(&self, cost: f64) -> Duration {
        if self.tokens >= cost {
            return Duration::ZERO;
        }
        let deficit = cost - self.tokens;
        // tiny validated rates can push the wait past Duration::MAX
        Duration::try_from_secs_f64(deficit / self.refill_rate).unwrap_or(Duration::MAX)
    }
}

/// Snapshot of the bucket for introspection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub tokens_available: f64,
    pub capacity: f64,
    pub refill_rate: f64,
}

/// A token bucket shared by every caller of one invoker.
pub struct TokenBucket {
    state: Mutex<BucketState>,
    changed: Notify,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(refill_rate: f64, capacity: f64) -> Self {
        Self {
            state: Mutex::new(BucketState {
                enabled: true,
                capacity,
                refill_rate,
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            changed: Notify::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        let bucket = Self::new(config.requests_per_second, f64::from(config.burst_size));
        bucket.lock().enabled = config.enabled;
        bucket
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BucketState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Try to take `cost` tokens now.
    ///
    /// Returns `Duration::ZERO` when granted, otherwise the time until enough
    /// tokens will have refilled. Nothing is reserved on a refusal.
    pub fn acquire(&self, cost: u32) -> Duration {
        self.acquire_at(cost, Instant::now())
    }

    /// [`acquire`](Self::acquire) evaluated at an explicit instant.
    pub fn acquire_at(&self, cost: u32, now: Instant) -> Duration {
        let cost = f64::from(cost);
        let mut state = self.lock();
        if !state.enabled {
            return Duration::ZERO;
        }

        state.refill(now);
        let wait = state.wait_for(cost);
        if wait.is_zero() {
            state.tokens -= cost;
        }
        wait
    }

    /// How long until `cost` tokens are available, without consuming any.
    pub fn suggested_wait(&self, cost: u32) -> Duration {
        let mut state = self.lock();
        if !state.enabled {
            return Duration::ZERO;
        }
        state.refill(Instant::now());
        state.wait_for(f64::from(cost))
    }

    /// Apply a new rate and capacity immediately.
    ///
    /// Tokens accrued so far are settled at the old rate first, then clamped
    /// to the new capacity. Waiters registered through
    /// [`changed`](Self::changed) are woken to re-check.
    pub fn update_limit(&self, refill_rate: f64, capacity: f64) {
        self.reconfigure(refill_rate, capacity, None);
    }

    pub fn apply_config(&self, config: &RateLimitConfig) {
        self.reconfigure(
            config.requests_per_second,
            f64::from(config.burst_size),
            Some(config.enabled),
        );
    }

    fn reconfigure(&self, refill_rate: f64, capacity: f64, enabled: Option<bool>) {
        {
            let mut state = self.lock();
            state.refill(Instant::now());
            state.refill_rate = refill_rate;
            state.capacity = capacity;
            state.tokens = state.tokens.min(capacity);
            if let Some(enabled) = enabled {
                state.enabled = enabled;
            }

            tracing::info!(
                refill_rate,
                capacity,
                enabled = state.enabled,
                tokens = state.tokens,
                "Rate limit updated"
            );
        }
        self.changed.notify_waiters();
    }

    /// Resolves on the next reconfiguration.
    ///
    /// Call `enable` on the pinned future before `acquire` so an update that
    /// lands in between is not missed.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    pub fn capacity(&self) -> f64 {
        self.lock().capacity
    }

    pub fn status(&self) -> RateLimitStatus {
        let mut state = self.lock();
        state.refill(Instant::now());
        RateLimitStatus {
            enabled: state.enabled,
            tokens_available: state.tokens,
            capacity: state.capacity,
            refill_rate: state.refill_rate,
        }
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TokenBucket")
            .field("capacity", &state.capacity)
            .field("refill_rate", &state.refill_rate)
            .field("tokens", &state.tokens)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_wait() {
        let bucket = TokenBucket::new(1.0, 5.0);
        let now = Instant::now();

        for _ in 0..5 {
            assert_eq!(bucket.acquire_at(1, now), Duration::ZERO);
        }
        let wait = bucket.acquire_at(1, now);
        assert!((wait.as_secs_f64() - 1.0).abs() < 1e-6, "wait was {:?}", wait);

        // one second later exactly one permit is back
        let later = now + Duration::from_secs(1);
        assert_eq!(bucket.acquire_at(1, later), Duration::ZERO);
        assert!(bucket.acquire_at(1, later) > Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokens_stay_within_bounds() {
        let bucket = TokenBucket::new(3.0, 4.0);
        let start = Instant::now();

        for step in 0..200u64 {
            let now = start + Duration::from_millis(step * 37);
            let _ = bucket.acquire_at((step % 3 + 1) as u32, now);
            let state = bucket.lock();
            assert!(state.tokens >= 0.0);
            assert!(state.tokens <= state.capacity);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_refusal_consumes_nothing() {
        let bucket = TokenBucket::new(1.0, 2.0);
        let now = Instant::now();
        assert_eq!(bucket.acquire_at(2, now), Duration::ZERO);
        let first = bucket.acquire_at(1, now);
        let second = bucket.acquire_at(1, now);
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_limit_clamps_tokens() {
        let bucket = TokenBucket::new(1.0, 10.0);
        bucket.update_limit(5.0, 3.0);

        let status = bucket.status();
        assert_eq!(status.capacity, 3.0);
        assert_eq!(status.refill_rate, 5.0);
        assert!(status.tokens_available <= 3.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_bucket_always_grants() {
        let bucket = TokenBucket::from_config(&RateLimitConfig {
            enabled: false,
            requests_per_second: 1.0,
            burst_size: 1,
        });
        for _ in 0..10 {
            assert_eq!(bucket.acquire(1), Duration::ZERO);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_tiny_rate_saturates_wait() {
        let bucket = TokenBucket::from_config(&RateLimitConfig {
            enabled: true,
            requests_per_second: 1e-20,
            burst_size: 1,
        });
        assert_eq!(bucket.acquire(1), Duration::ZERO);
        assert_eq!(bucket.acquire(1), Duration::MAX);
        assert_eq!(bucket.suggested_wait(1), Duration::MAX);
        // the lock is still usable
        assert_eq!(bucket.status().capacity, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfiguration_wakes_registered_waiters() {
        let bucket = Arc::new(TokenBucket::new(0.01, 1.0));
        assert_eq!(bucket.acquire(1), Duration::ZERO);

        let waiter = {
            let bucket = bucket.clone();
            tokio::spawn(async move {
                let changed = bucket.changed();
                tokio::pin!(changed);
                changed.as_mut().enable();
                let wait = bucket.acquire(1);
                tokio::select! {
                    _ = &mut changed => bucket.acquire(1),
                    _ = tokio::time::sleep(wait) => wait,
                }
            })
        };

        tokio::time::sleep(Duration::from_secs(1)).await;
        bucket.apply_config(&RateLimitConfig {
            enabled: false,
            requests_per_second: 100.0,
            burst_size: 1,
        });
        assert_eq!(waiter.await.unwrap(), Duration::ZERO);
    }

    #[test]
    fn test_concurrent_acquire_never_over_grants() {
        let bucket = Arc::new(TokenBucket::new(0.001, 8.0));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let bucket = bucket.clone();
            handles.push(std::thread::spawn(move || bucket.acquire(1).is_zero()));
        }
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|granted| *granted)
            .count();
        assert_eq!(granted, 8);
    }
}
