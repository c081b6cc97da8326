//! Audit record types.

use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Success,
    Failure,
    RateLimited,
    CacheHit,
}

impl AuditOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::RateLimited => "rate_limited",
            AuditOutcome::CacheHit => "cache_hit",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the audit trail. Shared as `Arc<AuditRecord>` once appended
/// and never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    /// Strictly increasing position in the log.
    pub sequence: u64,
    pub id: Uuid,
    pub operation: String,
    /// Wall-clock time of the append. Informational; ordering uses `sequence`.
    pub timestamp: SystemTime,
    pub outcome: AuditOutcome,
    /// Attempt number the record refers to, when applicable.
    pub attempt: Option<u32>,
    pub details: serde_json::Value,
}

impl AuditRecord {
    /// Whether the record marks the end of an `execute` call that failed.
    pub fn is_terminal_failure(&self) -> bool {
        self.outcome == AuditOutcome::Failure
            && self
                .details
                .get("terminal")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
    }
}
