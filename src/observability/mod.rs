//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! invoker, cache, audit log
//!     → logging.rs (tracing events, pretty or JSON)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout / log aggregation
//!     → Prometheus scrape (optional listener)
//! ```
//!
//! # Design Decisions
//! - Operation names are the only per-call label
//! - The audit log is the durable record; logs and metrics are best effort

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::init_metrics;
