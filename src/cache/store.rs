//! Response cache: TTL expiry plus strict LRU eviction.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lru::LruCache;
use serde::Serialize;
use tokio::time::Instant;

use crate::cache::key::CacheKey;
use crate::config::CacheConfig;
use crate::observability::metrics;

/// A cached value with its timing metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub value: V,
    pub inserted_at: Instant,
    pub expires_at: Instant,
    pub last_accessed_at: Instant,
}

impl<V> CacheEntry<V> {
    pub fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Counters for cache behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

struct CacheState<V> {
    enabled: bool,
    default_ttl: Duration,
    entries: LruCache<CacheKey, CacheEntry<V>>,
}

/// A thread-safe response cache.
///
/// One mutex guards the map and the recency list together, so `clear` and
/// eviction are atomic with respect to every `get` and `put`.
pub struct ResponseCache<V> {
    state: Mutex<CacheState<V>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

fn capacity_of(max_entries: usize) -> NonZeroUsize {
    NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN)
}

impl<V: Clone> ResponseCache<V> {
    pub fn new(max_entries: usize, default_ttl: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState {
                enabled: true,
                default_ttl,
                entries: LruCache::new(capacity_of(max_entries)),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        let cache = Self::new(config.max_entries, config.ttl());
        cache.lock().enabled = config.enabled;
        cache
    }

    fn lock(&self) -> MutexGuard<'_, CacheState<V>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().enabled
    }

    pub fn default_ttl(&self) -> Duration {
        self.lock().default_ttl
    }

    /// Look up a live entry, refreshing its recency.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &CacheKey, now: Instant) -> Option<V> {
        let mut state = self.lock();
        if !state.enabled {
            return None;
        }

        let live = state.entries.peek(key).map(|entry| entry.is_live(now));
        match live {
            Some(true) => {
                let entry = state.entries.get_mut(key)?;
                entry.last_accessed_at = now;
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.value.clone())
            }
            Some(false) => {
                state.entries.pop(key);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                metrics::record_cache_size(state.entries.len());
                None
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Insert or replace an entry, evicting the least recently accessed one
    /// when the cache is full.
    pub fn put(&self, key: CacheKey, value: V, ttl: Duration) {
        self.put_at(key, value, ttl, Instant::now());
    }

    pub fn put_at(&self, key: CacheKey, value: V, ttl: Duration, now: Instant) {
        let mut state = self.lock();
        if !state.enabled {
            return;
        }

        let entry = CacheEntry {
            value,
            inserted_at: now,
            expires_at: now + ttl,
            last_accessed_at: now,
        };
        let replacing = state.entries.contains(&key);
        if let Some((evicted, _)) = state.entries.push(key, entry) {
            if !replacing {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(key = %evicted, "Evicted least recently used cache entry");
            }
        }
        metrics::record_cache_size(state.entries.len());
    }

    /// Remove one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut state = self.lock();
        let removed = state.entries.pop(key).is_some();
        metrics::record_cache_size(state.entries.len());
        removed
    }

    /// Remove every entry atomically.
    pub fn clear(&self) {
        let mut state = self.lock();
        let dropped = state.entries.len();
        state.entries.clear();
        metrics::record_cache_size(0);
        tracing::info!(dropped, "Cache cleared");
    }

    /// Drop every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut state = self.lock();
        let expired: Vec<CacheKey> = state
            .entries
            .iter()
            .filter(|(_, entry)| !entry.is_live(now))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &expired {
            state.entries.pop(key);
        }
        self.expirations
            .fetch_add(expired.len() as u64, Ordering::Relaxed);
        metrics::record_cache_size(state.entries.len());
        expired.len()
    }

    /// Apply new settings in place. Shrinking evicts least recently used
    /// entries; disabling drops everything.
    pub fn reconfigure(&self, config: &CacheConfig) {
        let mut state = self.lock();
        let before = state.entries.len();
        state.entries.resize(capacity_of(config.max_entries));
        let shrunk = before - state.entries.len();
        if shrunk > 0 {
            self.evictions.fetch_add(shrunk as u64, Ordering::Relaxed);
        }

        state.default_ttl = config.ttl();
        state.enabled = config.enabled;
        if !config.enabled {
            state.entries.clear();
        }
        metrics::record_cache_size(state.entries.len());

        tracing::info!(
            enabled = config.enabled,
            max_entries = config.max_entries,
            ttl_secs = config.ttl_secs,
            "Cache reconfigured"
        );
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &CacheKey) -> bool {
        self.lock().entries.contains(key)
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.lock();
        CacheStats {
            entries: state.entries.len(),
            capacity: state.entries.cap().get(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
        }
    }
}
