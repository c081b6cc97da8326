//! Audit trail subsystem.
//!
//! # Data Flow
//! ```text
//! invoker step (cache hit, permit wait, attempt outcome)
//!     → log.rs (assign sequence under append lock, enforce retention)
//!     → record.rs (immutable Arc<AuditRecord>)
//!
//! ops tooling
//!     → query.rs (AuditFilter + lazy AuditQuery iterator)
//! ```
//!
//! # Design Decisions
//! - Ordering is by sequence, never by wall clock
//! - Evictions are explicit and counted, never silent
//! - The append lock is the log's own; it never serializes whole `execute` calls

pub mod log;
pub mod query;
pub mod record;

pub use log::{AuditLog, AuditStats};
pub use query::{AuditFilter, AuditQuery};
pub use record::{AuditOutcome, AuditRecord};
