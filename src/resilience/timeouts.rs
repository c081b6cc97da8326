//! Per-call timeout budget.
//!
//! # Responsibilities
//! - Track the budget of one `execute` call across permit waits, retry delays
//!   and remote attempts
//! - Tell the orchestrator whether a wait still fits
//!
//! # Design Decisions
//! - Uses Tokio's clock so paused-time tests see exact budgets
//! - Timeout errors are distinct from cancellation

use std::time::Duration;

use tokio::time::Instant;

/// Deadline for a single `execute` call. Unbounded when no budget is set.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    budget: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Deadline {
    pub fn new(budget: Option<Duration>) -> Self {
        Self {
            budget,
            expires_at: budget.and_then(|b| Instant::now().checked_add(b)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(None)
    }

    pub fn budget(&self) -> Option<Duration> {
        self.budget
    }

    pub fn expires_at(&self) -> Option<Instant> {
        self.expires_at
    }

    /// Time left, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.expires_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        self.remaining().is_some_and(|r| r.is_zero())
    }

    /// Whether waiting `wait` would still leave the call inside its budget.
    pub fn allows(&self, wait: Duration) -> bool {
        self.remaining().map_or(true, |r| wait < r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_budget_consumed_by_waiting() {
        let deadline = Deadline::new(Some(Duration::from_secs(5)));
        assert!(deadline.allows(Duration::from_secs(4)));
        assert!(!deadline.allows(Duration::from_secs(5)));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(deadline.remaining(), Some(Duration::from_secs(2)));
        assert!(!deadline.allows(Duration::from_secs(4)));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(deadline.is_expired());
    }

    #[test]
    fn test_unbounded() {
        let deadline = Deadline::unbounded();
        assert!(deadline.allows(Duration::from_secs(3600)));
        assert!(!deadline.is_expired());
        assert_eq!(deadline.remaining(), None);
    }
}
