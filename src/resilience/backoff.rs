//! Backoff strategies with jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Jitter spreads a delay by up to this fraction in either direction.
pub const JITTER_RATIO: f64 = 0.2;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    Constant,
    Linear,
    #[default]
    Exponential,
}

/// Delay before the attempt following failed attempt `attempt`, before jitter.
///
/// `attempt` is 1-based. Every strategy is capped at `max`.
pub fn calculate_backoff(
    strategy: BackoffStrategy,
    attempt: u32,
    base: Duration,
    max: Duration,
) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }

    let delay = match strategy {
        BackoffStrategy::Constant => base,
        BackoffStrategy::Linear => base.saturating_mul(attempt),
        BackoffStrategy::Exponential => {
            let factor = 2u32.saturating_pow(attempt - 1);
            base.saturating_mul(factor)
        }
    };

    delay.min(max)
}

/// Scale `delay` by a uniform factor in `[1 - JITTER_RATIO, 1 + JITTER_RATIO]`.
pub fn apply_jitter(delay: Duration) -> Duration {
    if delay.is_zero() {
        return delay;
    }
    let factor = rand::thread_rng().gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO));
    delay.mul_f64(factor)
}
