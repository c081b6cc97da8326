//! Request descriptors handed to the invoker by service clients.

use std::time::Duration;

use crate::cache::{CacheKey, KeyPart};
use crate::error::InvokeError;

/// Describes one logical outbound call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestDescriptor {
    /// Operation tag used for audit records, metrics and the cache key.
    pub operation: String,
    /// Whether the call is an idempotent read that may be served from cache.
    pub cacheable: bool,
    /// Cache lifetime; the cache's default TTL when `None`.
    pub ttl: Option<Duration>,
    /// Ordered values identifying the request.
    pub key_parts: Vec<KeyPart>,
    /// Permits consumed per attempt.
    pub cost: u32,
    /// Budget for the whole call; the invoker default when `None`.
    pub timeout: Option<Duration>,
}

impl RequestDescriptor {
    /// A cacheable, idempotent read.
    pub fn read(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            cacheable: true,
            ttl: None,
            key_parts: Vec::new(),
            cost: 1,
            timeout: None,
        }
    }

    /// A call that must always reach the remote service.
    pub fn write(operation: impl Into<String>) -> Self {
        Self {
            cacheable: false,
            ..Self::read(operation)
        }
    }

    pub fn part(mut self, part: impl Into<KeyPart>) -> Self {
        self.key_parts.push(part.into());
        self
    }

    pub fn parts<I, P>(mut self, parts: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<KeyPart>,
    {
        self.key_parts.extend(parts.into_iter().map(Into::into));
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn cache_key(&self) -> CacheKey {
        CacheKey::derive(&self.operation, &self.key_parts)
    }

    /// Check the descriptor on its own. Limits that depend on the invoker
    /// (bucket capacity) are checked by the invoker.
    pub fn validate(&self) -> Result<(), InvokeError> {
        if self.operation.trim().is_empty() {
            return Err(InvokeError::Validation("operation name is empty".into()));
        }
        if self.cost == 0 {
            return Err(InvokeError::Validation(format!(
                "'{}' has a zero permit cost",
                self.operation
            )));
        }
        if self.cacheable && self.ttl.is_some_and(|ttl| ttl.is_zero()) {
            return Err(InvokeError::Validation(format!(
                "'{}' is cacheable with a zero TTL",
                self.operation
            )));
        }
        if self.timeout.is_some_and(|t| t.is_zero()) {
            return Err(InvokeError::Validation(format!(
                "'{}' has a zero timeout budget",
                self.operation
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builders() {
        let read = RequestDescriptor::read("get_pod")
            .part("pod-1")
            .parts(["a", "b"])
            .ttl(Duration::from_secs(5));
        assert!(read.cacheable);
        assert_eq!(read.key_parts.len(), 3);
        assert_eq!(read.cost, 1);

        let write = RequestDescriptor::write("create_pod").cost(2);
        assert!(!write.cacheable);
        assert_eq!(write.cost, 2);
        assert!(write.validate().is_ok());
    }

    #[test]
    fn test_validation() {
        assert!(RequestDescriptor::read(" ").validate().is_err());
        assert!(RequestDescriptor::read("op").cost(0).validate().is_err());
        assert!(RequestDescriptor::read("op")
            .ttl(Duration::ZERO)
            .validate()
            .is_err());
        assert!(RequestDescriptor::write("op")
            .ttl(Duration::ZERO)
            .validate()
            .is_ok());
        assert!(RequestDescriptor::read("op")
            .timeout(Duration::ZERO)
            .validate()
            .is_err());
    }

    #[test]
    fn test_cache_key_follows_parts() {
        let a = RequestDescriptor::read("get").part(1u32).cache_key();
        let b = RequestDescriptor::read("get").part(1u32).cache_key();
        let c = RequestDescriptor::read("get").part(2u32).cache_key();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
