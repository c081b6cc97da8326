//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! RequestDescriptor (operation + key parts)
//!     → key.rs (CacheKey::derive, type-tagged normalization)
//!     → store.rs (TTL check, LRU recency, eviction)
//! ```
//!
//! # Design Decisions
//! - The invoker decides what is cacheable; the cache stores whatever it is given
//! - Expiry is lazy: an expired entry is removed by the lookup that finds it
//! - A single lock guards map and recency list together

pub mod key;
pub mod store;

pub use key::{CacheKey, KeyPart};
pub use store::{CacheEntry, CacheStats, ResponseCache};
