//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the guard.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::resilience::backoff::BackoffStrategy;

/// Root configuration for an outbound guard.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GuardConfig {
    /// Token bucket settings.
    pub rate_limit: RateLimitConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Audit log retention.
    pub audit: AuditConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Remote services reachable through the guard.
    pub services: Vec<ServiceConfig>,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Sustained permits per second.
    pub requests_per_second: f64,

    /// Burst capacity.
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests_per_second: 10.0,
            burst_size: 20,
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable caching of idempotent reads.
    pub enabled: bool,

    /// Default time-to-live in seconds.
    pub ttl_secs: u64,

    /// Maximum number of cached responses.
    pub max_entries: usize,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 300, // 5 minutes
            max_entries: 1000,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first one included.
    pub max_attempts: u32,

    /// Base delay in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay in milliseconds.
    pub max_delay_ms: u64,

    /// Delay growth between attempts.
    pub strategy: BackoffStrategy,

    /// Spread delays by up to ±20%.
    pub jitter: bool,

    /// Status codes worth retrying. Network failures and timeouts always are.
    pub retryable_statuses: Vec<u16>,

    /// Upper bound in seconds on a server-stated `Retry-After`.
    pub max_retry_after_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            strategy: BackoffStrategy::Exponential,
            jitter: true,
            retryable_statuses: vec![408, 429, 500, 502, 503, 504],
            max_retry_after_secs: 300,
        }
    }
}

/// Audit log retention.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Enable audit recording.
    pub enabled: bool,

    /// Keep at most this many records; oldest are evicted first.
    pub max_records: Option<usize>,

    /// Drop records older than this many seconds.
    pub retention_secs: Option<u64>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_records: Some(10_000),
            retention_secs: None,
        }
    }
}

/// Timeout configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Budget for a whole `execute` call (waits + attempts) in milliseconds.
    pub call_budget_ms: Option<u64>,

    /// Per HTTP request timeout used by service clients, in seconds.
    pub request_secs: u64,
}

impl TimeoutConfig {
    pub fn call_budget(&self) -> Option<Duration> {
        self.call_budget_ms.map(Duration::from_millis)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            call_budget_ms: None,
            request_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// A remote REST service.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service identifier for logging/audit.
    pub name: String,

    /// Base URL every path is joined onto.
    pub base_url: String,

    /// Environment variable holding the bearer API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
}
