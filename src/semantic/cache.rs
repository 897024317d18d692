//! Bounded cache of query embeddings.
//!
//! Repeated queries skip the provider call. Least recently used entries are
//! evicted once `capacity` is reached; a capacity of 0 disables caching.

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use lru::LruCache;

pub struct QueryCache {
    entries: Option<Mutex<LruCache<String, Vec<f32>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|m| m.lock().ok().map(|c| c.cap().get()))
            .unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries
            .as_ref()
            .and_then(|m| m.lock().ok().map(|c| c.len()))
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    pub fn hit_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }

    pub fn get(&self, query: &str) -> Option<Vec<f32>> {
        let entries = self.entries.as_ref()?;
        let found = entries.lock().ok()?.get(query).cloned();

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    pub fn put(&self, query: &str, vector: Vec<f32>) {
        if let Some(mut entries) = self.entries.as_ref().and_then(|m| m.lock().ok()) {
            entries.put(query.to_string(), vector);
        }
    }

    pub fn clear(&self) {
        if let Some(mut entries) = self.entries.as_ref().and_then(|m| m.lock().ok()) {
            entries.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_after_put() {
        let cache = QueryCache::new(4);
        assert_eq!(cache.get("q"), None);
        cache.put("q", vec![1.0, 2.0]);
        assert_eq!(cache.get("q"), Some(vec![1.0, 2.0]));
        assert_eq!(cache.hit_stats(), (1, 1));
    }

    #[test]
    fn test_evicts_least_recently_used() {
        let cache = QueryCache::new(2);
        cache.put("a", vec![1.0]);
        cache.put("b", vec![2.0]);
        // touch "a" so "b" becomes the eviction candidate
        assert!(cache.get("a").is_some());
        cache.put("c", vec![3.0]);

        assert_eq!(cache.len(), 2);
        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("c").is_some());
    }

    #[test]
    fn test_zero_capacity_disables() {
        let cache = QueryCache::new(0);
        cache.put("a", vec![1.0]);
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.capacity(), 0);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear() {
        let cache = QueryCache::new(3);
        cache.put("a", vec![1.0]);
        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), 3);
    }
}
