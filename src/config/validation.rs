//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rates > 0, delays ordered, sizes non-zero)
//! - Check service definitions (unique names, parseable URLs)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Each section validates on its own so runtime updates reuse the same checks

use std::collections::HashSet;

use thiserror::Error;

use crate::config::schema::{
    AuditConfig, CacheConfig, GuardConfig, RateLimitConfig, RetryConfig, ServiceConfig,
};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("retries.base_delay_ms ({base}) exceeds retries.max_delay_ms ({max})")]
    DelayOrder { base: u64, max: u64 },

    #[error("retries.retryable_statuses contains invalid status {0}")]
    InvalidStatus(u16),

    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),

    #[error("service '{name}' has invalid base_url: {reason}")]
    InvalidServiceUrl { name: String, reason: String },

    #[error("observability.metrics_address '{0}' is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Validate a full configuration.
pub fn validate_config(config: &GuardConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    check_rate_limit(&config.rate_limit, &mut errors);
    check_cache(&config.cache, &mut errors);
    check_retries(&config.retries, &mut errors);
    check_audit(&config.audit, &mut errors);
    check_services(&config.services, &mut errors);

    if config.timeouts.request_secs == 0 {
        errors.push(ValidationError::NotPositive { field: "timeouts.request_secs" });
    }
    if config.timeouts.call_budget_ms == Some(0) {
        errors.push(ValidationError::NotPositive { field: "timeouts.call_budget_ms" });
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<std::net::SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    into_result(errors)
}

pub fn validate_rate_limit(config: &RateLimitConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_rate_limit(config, &mut errors);
    into_result(errors)
}

pub fn validate_cache(config: &CacheConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_cache(config, &mut errors);
    into_result(errors)
}

pub fn validate_retries(config: &RetryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_retries(config, &mut errors);
    into_result(errors)
}

pub fn validate_audit(config: &AuditConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    check_audit(config, &mut errors);
    into_result(errors)
}

fn into_result(errors: Vec<ValidationError>) -> Result<(), Vec<ValidationError>> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_rate_limit(config: &RateLimitConfig, errors: &mut Vec<ValidationError>) {
    if !(config.requests_per_second > 0.0) || !config.requests_per_second.is_finite() {
        errors.push(ValidationError::NotPositive { field: "rate_limit.requests_per_second" });
    }
    if config.burst_size == 0 {
        errors.push(ValidationError::NotPositive { field: "rate_limit.burst_size" });
    }
}

fn check_cache(config: &CacheConfig, errors: &mut Vec<ValidationError>) {
    if config.ttl_secs == 0 {
        errors.push(ValidationError::NotPositive { field: "cache.ttl_secs" });
    }
    if config.max_entries == 0 {
        errors.push(ValidationError::NotPositive { field: "cache.max_entries" });
    }
}

fn check_retries(config: &RetryConfig, errors: &mut Vec<ValidationError>) {
    if config.max_attempts == 0 {
        errors.push(ValidationError::NotPositive { field: "retries.max_attempts" });
    }
    if config.base_delay_ms > config.max_delay_ms {
        errors.push(ValidationError::DelayOrder {
            base: config.base_delay_ms,
            max: config.max_delay_ms,
        });
    }
    if config.max_retry_after_secs == 0 {
        errors.push(ValidationError::NotPositive { field: "retries.max_retry_after_secs" });
    }
    for status in &config.retryable_statuses {
        if !(100..=599).contains(status) {
            errors.push(ValidationError::InvalidStatus(*status));
        }
    }
}

fn check_audit(config: &AuditConfig, errors: &mut Vec<ValidationError>) {
    if config.max_records == Some(0) {
        errors.push(ValidationError::NotPositive { field: "audit.max_records" });
    }
    if config.retention_secs == Some(0) {
        errors.push(ValidationError::NotPositive { field: "audit.retention_secs" });
    }
}

fn check_services(services: &[ServiceConfig], errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for service in services {
        if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if let Err(e) = url::Url::parse(&service.base_url) {
            errors.push(ValidationError::InvalidServiceUrl {
                name: service.name.clone(),
                reason: e.to_string(),
            });
        }
    }
}
