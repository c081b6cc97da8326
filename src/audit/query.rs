//! Filtered, lazy traversal of the audit log.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use crate::audit::log::AuditState;
use crate::audit::record::{AuditOutcome, AuditRecord};

/// Criteria a record must satisfy to be yielded by a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuditFilter {
    pub operation: Option<String>,
    pub outcome: Option<AuditOutcome>,
    /// Inclusive lower bound on the record timestamp.
    pub since: Option<SystemTime>,
    /// Exclusive upper bound on the record timestamp.
    pub until: Option<SystemTime>,
}

impl AuditFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn since(mut self, since: SystemTime) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: SystemTime) -> Self {
        self.until = Some(until);
        self
    }

    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.operation
            .as_deref()
            .map_or(true, |op| op == record.operation)
            && self.outcome.map_or(true, |o| o == record.outcome)
            && self.since.map_or(true, |t| record.timestamp >= t)
            && self.until.map_or(true, |t| record.timestamp < t)
    }
}

/// Iterator over the records matching a filter, in sequence order.
///
/// The upper bound is fixed when the query is created, so records appended
/// later are not visited and the iteration is finite. Each step takes the log
/// lock briefly; records evicted before they are reached are skipped. Dropping
/// the iterator early has no side effects.
pub struct AuditQuery {
    shared: Arc<Mutex<AuditState>>,
    filter: AuditFilter,
    cursor: u64,
    end: u64,
}

impl AuditQuery {
    pub(crate) fn new(shared: Arc<Mutex<AuditState>>, filter: AuditFilter, end: u64) -> Self {
        Self {
            shared,
            filter,
            cursor: 0,
            end,
        }
    }
}

impl Iterator for AuditQuery {
    type Item = Arc<AuditRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor >= self.end {
            return None;
        }

        let state = self.shared.lock().unwrap_or_else(PoisonError::into_inner);
        let front = match state.records.front() {
            Some(record) => record.sequence,
            None => {
                self.cursor = self.end;
                return None;
            }
        };

        // sequences in the deque are contiguous
        let start = self.cursor.max(front);
        let mut index = usize::try_from(start - front).unwrap_or(usize::MAX);
        while let Some(record) = state.records.get(index) {
            if record.sequence >= self.end {
                break;
            }
            self.cursor = record.sequence + 1;
            if self.filter.matches(record) {
                return Some(Arc::clone(record));
            }
            index += 1;
        }

        self.cursor = self.end;
        None
    }
}

impl std::iter::FusedIterator for AuditQuery {}
