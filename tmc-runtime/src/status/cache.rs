//! Aggregated-status TTL cache (C7, §4.7): avoids re-running aggregation
//! for a key more often than its entries' TTL.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tmc_core::client::Gvr;
use tmc_core::model::{AggregatedStatus, AggregationStrategy};

const DEFAULT_TTL: Duration = Duration::from_secs(30);

/// Namespace/name pair identifying the resource a cached aggregation covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespacedName {
    pub namespace: String,
    pub name: String,
}

impl NamespacedName {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        NamespacedName { namespace: namespace.into(), name: name.into() }
    }
}

/// The cache key: `{GVR, NamespacedName, AggregationHash}`, so aggregations
/// of the same resource under different strategies or source sets never
/// collide on one entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    gvr: Gvr,
    resource: NamespacedName,
    aggregation_hash: String,
}

impl CacheKey {
    /// Builds a key, folding `strategy` and `sources` into the
    /// `AggregationHash = SHA-256(strategy ∥ sources…)` component.
    pub fn new(gvr: Gvr, resource: NamespacedName, strategy: AggregationStrategy, sources: &[String]) -> Self {
        CacheKey { gvr, resource, aggregation_hash: aggregation_hash(strategy, sources) }
    }
}

fn aggregation_hash(strategy: AggregationStrategy, sources: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{strategy:?}").as_bytes());
    for source in sources {
        hasher.update(b"\0");
        hasher.update(source.as_bytes());
    }
    hex::encode(hasher.finalize())
}

struct Entry {
    status: AggregatedStatus,
    inserted_at: Instant,
    last_accessed: Instant,
}

/// Running counters for cache effectiveness, exposed via metrics (C11).
#[derive(Debug, Default, Clone, Copy)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    /// `hits / (hits + misses)`, or `0.0` with no lookups yet.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// A time-to-live cache of [`AggregatedStatus`] keyed by [`CacheKey`].
/// §8 invariant 6: an entry is never returned past its TTL.
pub struct StatusCache {
    ttl: Duration,
    entries: RwLock<HashMap<CacheKey, Entry>>,
    stats: RwLock<CacheStats>,
}

impl Default for StatusCache {
    fn default() -> Self {
        StatusCache::new(DEFAULT_TTL)
    }
}

impl StatusCache {
    /// A cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        StatusCache { ttl, entries: RwLock::new(HashMap::new()), stats: RwLock::new(CacheStats::default()) }
    }

    /// Inserts or replaces the cached status for `key`. The stored value is
    /// a deep copy, independent of the caller's `status` afterward (§4.7).
    pub fn put(&self, key: CacheKey, status: AggregatedStatus) {
        let now = Instant::now();
        self.entries.write().insert(key, Entry { status, inserted_at: now, last_accessed: now });
    }

    /// Returns a deep copy of the cached status for `key` if present and
    /// not expired. An expired entry is evicted as a side effect of the
    /// lookup.
    pub fn get(&self, key: &CacheKey) -> Option<AggregatedStatus> {
        let mut entries = self.entries.write();
        let Some(entry) = entries.get_mut(key) else {
            self.stats.write().misses += 1;
            return None;
        };

        if entry.inserted_at.elapsed() >= self.ttl {
            entries.remove(key);
            let mut stats = self.stats.write();
            stats.misses += 1;
            stats.evictions += 1;
            return None;
        }

        entry.last_accessed = Instant::now();
        let status = entry.status.clone();
        self.stats.write().hits += 1;
        Some(status)
    }

    /// Removes every expired entry. Intended to be driven by a periodic
    /// background task; see [`spawn_cache_cleanup_loop`](super::spawn_cache_cleanup_loop).
    pub fn cleanup_expired(&self) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| entry.inserted_at.elapsed() < self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            self.stats.write().evictions += removed as u64;
        }
        removed
    }

    /// Current cache stats snapshot.
    pub fn stats(&self) -> CacheStats {
        *self.stats.read()
    }

    /// Number of entries currently stored, including any not yet swept
    /// past their TTL.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
