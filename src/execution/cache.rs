//! Memoized responses for cache stages.
//!
//! Each cache node owns one [`ResultCache`]. Entries are keyed by a
//! fingerprint of everything that shapes the upstream output plus the quality
//! it was rendered at. The default policy keeps a single slot: a cache node
//! sits at one position in one chain and serves one request shape in steady
//! state. A bounded LRU can be configured for nodes that serve several shapes.

use crate::execution::request::{FilterResponse, Quality};
use lru::LruCache;
use parking_lot::Mutex;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

/// A cache key combining the input fingerprint with the render quality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Hash of upstream parameter state and request shape.
    pub fingerprint: u64,
    /// Quality the entry was rendered at.
    pub quality: Quality,
}

impl CacheKey {
    pub fn new(fingerprint: u64, quality: Quality) -> Self {
        Self {
            fingerprint,
            quality,
        }
    }
}

/// Eviction policy of a cache node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Keep only the most recent entry.
    #[default]
    SingleSlot,
    /// Keep up to `capacity` entries, least recently used evicted first.
    Lru { capacity: usize },
}

/// Cached entry with metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The memoized response.
    pub response: FilterResponse,
    /// When the entry was created.
    pub created_at: Instant,
    /// How long the original computation took.
    pub computation_time: Duration,
    /// Approximate memory size in bytes.
    pub memory_size: usize,
}

impl CacheEntry {
    /// Create a new cache entry.
    pub fn new(response: FilterResponse, computation_time: Duration) -> Self {
        let memory_size = estimate_memory_size(&response);
        Self {
            response,
            created_at: Instant::now(),
            computation_time,
            memory_size,
        }
    }
}

fn estimate_memory_size(response: &FilterResponse) -> usize {
    let mut size = std::mem::size_of::<FilterResponse>();
    if let Some(img) = response.image() {
        size += img.estimated_memory_size();
    }
    if let Some(img) = response.image8() {
        size += img.estimated_memory_size();
    }
    size
}

/// Cache statistics.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries evicted by the policy.
    pub evictions: u64,
    /// Number of times the cache was emptied by an upstream change.
    pub invalidations: u64,
    /// Total time saved by cache hits.
    pub time_saved: Duration,
}

impl CacheStats {
    /// Calculate hit ratio.
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

enum Slots {
    Single(Option<(CacheKey, CacheEntry)>),
    Lru(LruCache<CacheKey, CacheEntry>),
}

impl Slots {
    fn new(policy: CachePolicy) -> Self {
        match policy {
            CachePolicy::SingleSlot => Slots::Single(None),
            CachePolicy::Lru { capacity } => {
                let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
                Slots::Lru(LruCache::new(capacity))
            }
        }
    }

    fn get(&mut self, key: &CacheKey) -> Option<&CacheEntry> {
        match self {
            Slots::Single(slot) => slot.as_ref().filter(|(k, _)| k == key).map(|(_, e)| e),
            Slots::Lru(cache) => cache.get(key),
        }
    }

    /// Insert, returning the number of evicted entries.
    fn put(&mut self, key: CacheKey, entry: CacheEntry) -> u64 {
        match self {
            Slots::Single(slot) => {
                let evicted = matches!(slot, Some((k, _)) if *k != key);
                *slot = Some((key, entry));
                evicted as u64
            }
            Slots::Lru(cache) => {
                // A full render supersedes the quick one for the same input
                if key.quality == Quality::Full {
                    cache.pop(&CacheKey::new(key.fingerprint, Quality::Quick));
                }
                match cache.push(key, entry) {
                    Some((old, _)) if old != key => 1,
                    _ => 0,
                }
            }
        }
    }

    fn clear(&mut self) -> usize {
        match self {
            Slots::Single(slot) => slot.take().map(|_| 1).unwrap_or(0),
            Slots::Lru(cache) => {
                let n = cache.len();
                cache.clear();
                n
            }
        }
    }

    fn len(&self) -> usize {
        match self {
            Slots::Single(slot) => slot.is_some() as usize,
            Slots::Lru(cache) => cache.len(),
        }
    }

    fn memory_usage(&self) -> usize {
        match self {
            Slots::Single(slot) => slot.as_ref().map(|(_, e)| e.memory_size).unwrap_or(0),
            Slots::Lru(cache) => cache.iter().map(|(_, e)| e.memory_size).sum(),
        }
    }
}

struct Inner {
    slots: Slots,
    stats: CacheStats,
    last_full_time: Option<Duration>,
}

/// Thread-safe response cache owned by one cache node.
pub struct ResultCache {
    policy: CachePolicy,
    inner: Mutex<Inner>,
}

impl ResultCache {
    /// Create an empty cache with the given policy.
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            inner: Mutex::new(Inner {
                slots: Slots::new(policy),
                stats: CacheStats::default(),
                last_full_time: None,
            }),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    /// Get a memoized response for `fingerprint`.
    ///
    /// A quick request is also satisfied by a full-quality entry; a full
    /// request never accepts a quick one.
    pub fn get(&self, fingerprint: u64, quality: Quality) -> Option<FilterResponse> {
        let mut inner = self.inner.lock();
        let mut candidates = vec![CacheKey::new(fingerprint, Quality::Full)];
        if quality == Quality::Quick {
            candidates.push(CacheKey::new(fingerprint, Quality::Quick));
        }

        let mut found = None;
        for key in &candidates {
            if let Some(entry) = inner.slots.get(key) {
                found = Some((entry.response.clone(), entry.computation_time));
                break;
            }
        }

        match found {
            Some((response, saved)) => {
                inner.stats.hits += 1;
                inner.stats.time_saved += saved;
                Some(response)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Store a response. Responses without an image are never stored.
    pub fn put(&self, key: CacheKey, response: FilterResponse, computation_time: Duration) -> bool {
        if !response.has_image() {
            return false;
        }
        let mut inner = self.inner.lock();
        if key.quality == Quality::Full {
            inner.last_full_time = Some(computation_time);
        }
        let evicted = inner.slots.put(key, CacheEntry::new(response, computation_time));
        inner.stats.evictions += evicted;
        true
    }

    /// Drop every entry. Returns how many were dropped.
    pub fn invalidate(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.slots.clear();
        if dropped > 0 {
            inner.stats.invalidations += 1;
        }
        dropped
    }

    /// Duration of the most recent full-quality computation.
    pub fn last_full_time(&self) -> Option<Duration> {
        self.inner.lock().last_full_time
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }

    /// Get current memory usage in bytes.
    pub fn memory_usage(&self) -> usize {
        self.inner.lock().slots.memory_usage()
    }

    /// Get number of cached entries.
    pub fn len(&self) -> usize {
        self.inner.lock().slots.len()
    }

    /// Check if cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(CachePolicy::SingleSlot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::image::Image16;

    fn response(value: u16) -> FilterResponse {
        FilterResponse::from_image(Image16::from_fn(2, 2, 3, |_, _, px| px.fill(value)))
    }

    #[test]
    fn test_put_get() {
        let cache = ResultCache::default();
        cache.put(CacheKey::new(7, Quality::Full), response(3), Duration::from_millis(10));

        let hit = cache.get(7, Quality::Full).unwrap();
        assert_eq!(hit.image().unwrap().pixel(0, 0), &[3, 3, 3]);
        assert!(cache.get(8, Quality::Full).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.time_saved, Duration::from_millis(10));
    }

    #[test]
    fn test_quick_request_accepts_full_entry() {
        let cache = ResultCache::default();
        cache.put(CacheKey::new(1, Quality::Full), response(1), Duration::ZERO);
        assert!(cache.get(1, Quality::Quick).is_some());
    }

    #[test]
    fn test_full_request_rejects_quick_entry() {
        let cache = ResultCache::default();
        cache.put(CacheKey::new(1, Quality::Quick), response(1), Duration::ZERO);
        assert!(cache.get(1, Quality::Full).is_none());
        assert!(cache.get(1, Quality::Quick).is_some());
    }

    #[test]
    fn test_never_stores_empty_response() {
        let cache = ResultCache::default();
        assert!(!cache.put(CacheKey::new(1, Quality::Full), FilterResponse::empty(), Duration::ZERO));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_single_slot_replaces() {
        let cache = ResultCache::default();
        cache.put(CacheKey::new(1, Quality::Full), response(1), Duration::ZERO);
        cache.put(CacheKey::new(2, Quality::Full), response(2), Duration::ZERO);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(1, Quality::Full).is_none());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_keeps_several_shapes() {
        let cache = ResultCache::new(CachePolicy::Lru { capacity: 2 });
        cache.put(CacheKey::new(1, Quality::Full), response(1), Duration::ZERO);
        cache.put(CacheKey::new(2, Quality::Full), response(2), Duration::ZERO);
        assert!(cache.get(1, Quality::Full).is_some());
        cache.put(CacheKey::new(3, Quality::Full), response(3), Duration::ZERO);

        // 2 was least recently used
        assert!(cache.get(2, Quality::Full).is_none());
        assert!(cache.get(1, Quality::Full).is_some());
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_lru_full_supersedes_quick() {
        let cache = ResultCache::new(CachePolicy::Lru { capacity: 4 });
        cache.put(CacheKey::new(1, Quality::Quick), response(1), Duration::ZERO);
        cache.put(CacheKey::new(1, Quality::Full), response(2), Duration::ZERO);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_counts() {
        let cache = ResultCache::default();
        assert_eq!(cache.invalidate(), 0);
        cache.put(CacheKey::new(1, Quality::Full), response(1), Duration::from_millis(4));
        assert_eq!(cache.invalidate(), 1);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().invalidations, 1);
        assert_eq!(cache.last_full_time(), Some(Duration::from_millis(4)));
    }
}
