//! Caching infrastructure for the recognition pipeline
//!
//! Recognition is by far the most expensive step in the pipeline, so results
//! are memoized by a content hash of the uploaded bytes. Byte-identical
//! uploads hit the cache and skip preprocessing and recognition entirely.
//!
//! Caching is strictly best-effort: nothing in here can fail a request, and
//! only fully successful extractions are ever stored.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use crate::config::CacheConfig;
use crate::extraction::ExtractedReceiptData;

/// Generic cache entry with expiration time
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    /// The cached value
    pub value: T,
    /// When this entry expires
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    /// Create a new cache entry
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    /// Check if this entry has expired
    pub fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Cache statistics
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    /// Total number of live entries
    pub entries: usize,
    /// Number of hits
    pub hits: u64,
    /// Number of misses
    pub misses: u64,
    /// Number of stores
    pub sets: u64,
    /// Number of removals, explicit or through expiry cleanup
    pub deletes: u64,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
}

impl CacheStats {
    fn recompute_hit_rate(&mut self) {
        let total_requests = self.hits + self.misses;
        if total_requests > 0 {
            self.hit_rate = self.hits as f64 / total_requests as f64;
        } else {
            self.hit_rate = 0.0;
        }
    }
}

/// Thread-safe in-memory TTL cache
///
/// Entries past their TTL count as misses and are dropped lazily by
/// `cleanup()` or on insert when the cache is full.
pub struct MemoryCache<K, V> {
    data: RwLock<HashMap<K, CacheEntry<V>>>,
    stats: RwLock<CacheStats>,
    max_entries: usize,
}

impl<K, V> MemoryCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    /// Create a new memory cache bounded to `max_entries` live entries
    pub fn new(max_entries: usize) -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            max_entries,
        }
    }

    /// Get a value, counting a hit or miss
    pub fn get(&self, key: &K) -> Option<V> {
        let data = self.data.read();
        let mut stats = self.stats.write();
        match data.get(key) {
            Some(entry) if !entry.is_expired() => {
                stats.hits += 1;
                Some(entry.value.clone())
            }
            _ => {
                stats.misses += 1;
                None
            }
        }
    }

    /// Insert a value with the given TTL
    ///
    /// When the cache is full, expired entries are dropped first; if it is
    /// still full the entry closest to expiry is evicted.
    pub fn insert(&self, key: K, value: V, ttl: Duration) {
        let mut data = self.data.write();
        let mut stats = self.stats.write();

        if data.len() >= self.max_entries && !data.contains_key(&key) {
            let before = data.len();
            data.retain(|_, entry| !entry.is_expired());
            stats.deletes += (before - data.len()) as u64;

            if data.len() >= self.max_entries {
                if let Some(oldest) = data
                    .iter()
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone())
                {
                    data.remove(&oldest);
                    stats.deletes += 1;
                }
            }
        }

        data.insert(key, CacheEntry::new(value, ttl));
        stats.sets += 1;
    }

    /// Remove a value
    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.data.write().remove(key).map(|entry| entry.value);
        if removed.is_some() {
            self.stats.write().deletes += 1;
        }
        removed
    }

    /// Drop all expired entries
    pub fn cleanup(&self) {
        let mut data = self.data.write();
        let before = data.len();
        data.retain(|_, entry| !entry.is_expired());
        let removed = before - data.len();
        if removed > 0 {
            self.stats.write().deletes += removed as u64;
            debug!("cache cleanup removed {} expired entries", removed);
        }
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        // Locks taken one at a time, in the same data-then-stats order as
        // the write paths
        let entries = self.data.read().len();
        let mut stats = self.stats.read().clone();
        stats.entries = entries;
        stats.recompute_hit_rate();
        stats
    }

    /// Clear all entries and reset counters
    pub fn clear(&self) {
        self.data.write().clear();
        *self.stats.write() = CacheStats::default();
    }

    /// Number of stored entries, including any not yet cleaned up
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the cache is empty
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

/// Specialized cache for recognition pipeline results, keyed by the content
/// hash of the uploaded image bytes
pub struct RecognitionCache {
    cache: MemoryCache<String, ExtractedReceiptData>,
    default_ttl: Duration,
}

impl RecognitionCache {
    /// Create a new recognition cache from configuration
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            cache: MemoryCache::new(config.max_entries),
            default_ttl: Duration::from_secs(config.recognition_ttl_secs),
        }
    }

    /// Look up a cached extraction by content hash
    pub fn get(&self, content_hash: &str) -> Option<ExtractedReceiptData> {
        self.cache.get(&content_hash.to_string())
    }

    /// Store a fully successful extraction under the content hash
    pub fn insert(&self, content_hash: String, data: ExtractedReceiptData) {
        self.cache.insert(content_hash, data, self.default_ttl);
    }

    /// Store with an explicit TTL
    pub fn insert_with_ttl(&self, content_hash: String, data: ExtractedReceiptData, ttl: Duration) {
        self.cache.insert(content_hash, data, ttl);
    }

    /// Drop a cached extraction
    pub fn invalidate(&self, content_hash: &str) -> Option<ExtractedReceiptData> {
        self.cache.remove(&content_hash.to_string())
    }

    /// Drop all expired entries
    pub fn cleanup(&self) {
        self.cache.cleanup();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Clear all cached extractions
    pub fn clear(&self) {
        self.cache.clear();
    }
}

/// Coordinates the in-process caches and aggregates their statistics
pub struct CacheManager {
    /// Recognition pipeline result cache
    pub recognition: RecognitionCache,
}

impl CacheManager {
    /// Create a cache manager from configuration
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            recognition: RecognitionCache::new(config),
        }
    }

    /// Drop expired entries across all caches
    pub fn cleanup_all(&self) {
        self.recognition.cleanup();
    }

    /// Clear all caches
    pub fn clear_all(&self) {
        self.recognition.clear();
    }
}

/// Aggregated statistics across the process caches
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheManagerStats {
    /// Total hits across all caches
    pub hits: u64,
    /// Total misses across all caches
    pub misses: u64,
    /// Total stores across all caches
    pub sets: u64,
    /// Total removals across all caches
    pub deletes: u64,
    /// Aggregate hit rate
    pub hit_rate: f64,
    /// Statistics per named cache
    pub per_cache_breakdown: HashMap<String, CacheStats>,
}

impl CacheManagerStats {
    /// Build aggregate statistics from named per-cache stats
    pub fn from_parts(parts: Vec<(&str, CacheStats)>) -> Self {
        let mut aggregate = Self::default();
        for (name, stats) in parts {
            aggregate.hits += stats.hits;
            aggregate.misses += stats.misses;
            aggregate.sets += stats.sets;
            aggregate.deletes += stats.deletes;
            aggregate.per_cache_breakdown.insert(name.to_string(), stats);
        }
        let total_requests = aggregate.hits + aggregate.misses;
        if total_requests > 0 {
            aggregate.hit_rate = aggregate.hits as f64 / total_requests as f64;
        }
        aggregate
    }
}
