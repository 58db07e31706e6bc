//! Small keyed cache with TTL support.
//!
//! Used for hot-path config reads (discounts, limits) that are cheap to
//! re-fetch but read on every fan-out or submission.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use fxdesk_common::{SharedClock, SystemClock};
use tracing::debug;

/// Cached entry.
#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    cached_at: DateTime<Utc>,
    ttl: Duration,
}

impl<V> CacheEntry<V> {
    fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.cached_at) < self.ttl
    }
}

/// Configuration for a TTL cache.
#[derive(Debug, Clone)]
pub struct TtlCacheConfig {
    /// Default TTL for cached values.
    pub default_ttl: Duration,
    /// Maximum number of entries.
    pub max_entries: usize,
}

impl Default for TtlCacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: fxdesk_common::constants::catalog_cache_ttl(),
            max_entries: 10_000,
        }
    }
}

/// Thread-safe cache with per-entry TTL.
pub struct TtlCache<K, V> {
    entries: DashMap<K, CacheEntry<V>>,
    /// Bumped before every invalidation.
    generation: AtomicU64,
    config: TtlCacheConfig,
    clock: SharedClock,
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    /// Create a cache with default configuration.
    pub fn new() -> Self {
        Self::with_config(TtlCacheConfig::default())
    }

    /// Create a cache with custom configuration.
    pub fn with_config(config: TtlCacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a cache that reads time from `clock`.
    pub fn with_clock(config: TtlCacheConfig, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            generation: AtomicU64::new(0),
            config,
            clock,
        }
    }

    /// Get a value if present and not expired.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();

        if let Some(entry) = self.entries.get(key) {
            if entry.is_valid(now) {
                debug!(key = ?key, "Cache hit");
                return Some(entry.value.clone());
            }
            debug!(key = ?key, "Cache entry expired");
            drop(entry);
            self.entries.remove(key);
        }

        debug!(key = ?key, "Cache miss");
        None
    }

    /// Get a value, loading and caching it on a miss.
    ///
    /// A value loaded while an invalidation ran is returned but not cached,
    /// since it may predate the write that caused the invalidation.
    pub fn get_or_insert_with(&self, key: &K, load: impl FnOnce() -> V) -> V {
        if let Some(value) = self.get(key) {
            return value;
        }

        let generation = self.generation.load(Ordering::SeqCst);
        let value = load();

        if self.entries.len() >= self.config.max_entries {
            self.evict_expired();
        }
        // The generation check and the insert happen under the entry's shard
        // lock; `invalidate` bumps the generation before it removes.
        let entry = self.entries.entry(key.clone());
        if self.generation.load(Ordering::SeqCst) == generation {
            entry.insert(CacheEntry {
                value: value.clone(),
                cached_at: self.clock.now(),
                ttl: self.config.default_ttl,
            });
        } else {
            debug!(key = ?key, "Loaded value raced an invalidation, not cached");
        }
        value
    }

    /// Insert a value with the default TTL.
    pub fn insert(&self, key: K, value: V) {
        self.insert_with_ttl(key, value, self.config.default_ttl);
    }

    /// Insert a value with a custom TTL.
    pub fn insert_with_ttl(&self, key: K, value: V, ttl: Duration) {
        if self.entries.len() >= self.config.max_entries {
            self.evict_expired();
        }

        self.entries.insert(
            key,
            CacheEntry {
                value,
                cached_at: self.clock.now(),
                ttl,
            },
        );
    }

    /// Drop one entry.
    pub fn invalidate(&self, key: &K) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        if self.entries.remove(key).is_some() {
            debug!(key = ?key, "Cache entry invalidated");
        }
    }

    /// Drop all entries.
    pub fn clear(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Evict expired entries.
    pub fn evict_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, entry| entry.is_valid(now));
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        let now = self.clock.now();
        let total = self.entries.len();
        let valid = self.entries.iter().filter(|e| e.is_valid(now)).count();

        CacheStats {
            total_entries: total,
            valid_entries: valid,
            expired_entries: total - valid,
        }
    }
}

impl<K, V> Default for TtlCache<K, V>
where
    K: Eq + Hash + Clone + Debug,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    pub expired_entries: usize,
}
