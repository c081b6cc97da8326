//! Append-only audit log with explicit, counted eviction.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::Serialize;
use uuid::Uuid;

use crate::audit::query::{AuditFilter, AuditQuery};
use crate::audit::record::{AuditOutcome, AuditRecord};
use crate::config::AuditConfig;
use crate::observability::metrics;

pub(crate) struct AuditState {
    pub(crate) records: VecDeque<Arc<AuditRecord>>,
    next_sequence: u64,
    evicted: u64,
    enabled: bool,
    max_records: Option<usize>,
    retention: Option<Duration>,
}

impl AuditState {
    fn evict_front(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.records.drain(..count);
        self.evicted += count as u64;
        metrics::record_audit_evictions(count);
    }

    fn enforce_capacity(&mut self) {
        if let Some(max) = self.max_records {
            let excess = self.records.len().saturating_sub(max);
            self.evict_front(excess);
        }
    }

    fn enforce_retention(&mut self, now: SystemTime) -> usize {
        let Some(cutoff) = self.retention.and_then(|r| now.checked_sub(r)) else {
            return 0;
        };
        let stale = self
            .records
            .iter()
            .take_while(|record| record.timestamp < cutoff)
            .count();
        self.evict_front(stale);
        stale
    }
}

/// Counters describing the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditStats {
    pub retained: usize,
    /// Records removed by capacity or age retention.
    pub evicted: u64,
    /// Sequence number of the most recent append, 0 when nothing was appended.
    pub last_sequence: u64,
}

/// Thread-safe audit log. The lock is held only for the append itself and
/// for single query steps.
#[derive(Clone)]
pub struct AuditLog {
    shared: Arc<Mutex<AuditState>>,
}

impl AuditLog {
    pub fn new(config: &AuditConfig) -> Self {
        Self {
            shared: Arc::new(Mutex::new(AuditState {
                records: VecDeque::new(),
                next_sequence: 1,
                evicted: 0,
                enabled: config.enabled,
                max_records: config.max_records,
                retention: config.retention_secs.map(Duration::from_secs),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, AuditState> {
        self.shared.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append a record. Returns `None` when auditing is disabled.
    pub fn append(
        &self,
        operation: &str,
        outcome: AuditOutcome,
        attempt: Option<u32>,
        details: serde_json::Value,
    ) -> Option<Arc<AuditRecord>> {
        let id = Uuid::new_v4();
        let mut state = self.lock();
        if !state.enabled {
            return None;
        }

        // sequence and timestamp are taken under the lock so sequence order is
        // append order
        let timestamp = SystemTime::now();
        let record = Arc::new(AuditRecord {
            sequence: state.next_sequence,
            id,
            operation: operation.to_string(),
            timestamp,
            outcome,
            attempt,
            details,
        });
        state.next_sequence += 1;
        state.records.push_back(Arc::clone(&record));
        state.enforce_capacity();
        state.enforce_retention(timestamp);
        drop(state);

        tracing::debug!(
            sequence = record.sequence,
            operation = %record.operation,
            outcome = %record.outcome,
            "Audit record appended"
        );
        Some(record)
    }

    /// Lazily iterate records matching `filter`, oldest first.
    pub fn query(&self, filter: AuditFilter) -> AuditQuery {
        let end = self.lock().next_sequence;
        AuditQuery::new(Arc::clone(&self.shared), filter, end)
    }

    /// Apply age retention now. Returns how many records were dropped.
    pub fn prune(&self) -> usize {
        self.lock().enforce_retention(SystemTime::now())
    }

    pub fn reconfigure(&self, config: &AuditConfig) {
        let mut state = self.lock();
        state.enabled = config.enabled;
        state.max_records = config.max_records;
        state.retention = config.retention_secs.map(Duration::from_secs);
        state.enforce_capacity();
        state.enforce_retention(SystemTime::now());
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> AuditStats {
        let state = self.lock();
        AuditStats {
            retained: state.records.len(),
            evicted: state.evicted,
            last_sequence: state.next_sequence - 1,
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(&AuditConfig::default())
    }
}
