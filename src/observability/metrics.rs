//! Metrics collection and exposition.
//!
//! # Metrics
//! - `guard_cache_lookups_total` (counter): cache lookups by operation, result
//! - `guard_cache_entries` (gauge): live cache entries
//! - `guard_rate_limit_wait_seconds` (histogram): permit wait per operation
//! - `guard_attempts_total` (counter): remote attempts by operation, outcome
//! - `guard_call_duration_seconds` (histogram): remote attempt latency
//! - `guard_call_failures_total` (counter): failed calls by operation, error
//! - `guard_audit_evictions_total` (counter): audit records evicted
//!
//! Recording is a no-op until a recorder is installed, so library users that
//! never call [`init_metrics`] pay only for the label formatting.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_cache_lookup(operation: &str, hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!(
        "guard_cache_lookups_total",
        "operation" => operation.to_string(),
        "result" => result
    )
    .increment(1);
}

pub fn record_cache_size(entries: usize) {
    gauge!("guard_cache_entries").set(entries as f64);
}

pub fn record_rate_limit_wait(operation: &str, wait: Duration) {
    histogram!("guard_rate_limit_wait_seconds", "operation" => operation.to_string())
        .record(wait.as_secs_f64());
}

/// One remote attempt. `outcome` is `success` or a failure kind.
pub fn record_attempt(operation: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        "guard_attempts_total",
        "operation" => operation.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("guard_call_duration_seconds", "operation" => operation.to_string())
        .record(elapsed.as_secs_f64());
}

pub fn record_call_failure(operation: &str, error: &'static str) {
    counter!(
        "guard_call_failures_total",
        "operation" => operation.to_string(),
        "error" => error
    )
    .increment(1);
}

pub fn record_audit_evictions(count: usize) {
    counter!("guard_audit_evictions_total").increment(count as u64);
}
