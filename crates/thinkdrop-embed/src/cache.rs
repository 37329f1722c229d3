use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use lru::LruCache;
use serde::Serialize;

/// Cache key: lowercased, trimmed, truncated to 200 chars. Near-duplicate
/// submissions of the same text hit the same entry.
pub fn cache_key(text: &str) -> String {
    text.trim().to_lowercase().chars().take(200).collect()
}

struct CacheEntry {
    vector: Vec<f32>,
    inserted_at: Instant,
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub total_requests: u64,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.hits as f64 / self.total_requests as f64
        }
    }
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    hits: u64,
    misses: u64,
}

/// Thread-safe LRU cache with per-entry TTL for computed embeddings.
pub struct EmbeddingCache {
    inner: Mutex<CacheInner>,
    ttl: Duration,
    capacity: usize,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(CacheInner {
                entries: LruCache::new(
                    NonZeroUsize::new(capacity).expect("capacity clamped to at least 1"),
                ),
                hits: 0,
                misses: 0,
            }),
            ttl,
            capacity,
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = cache_key(text);
        let mut inner = self.inner.lock().expect("embedding cache lock poisoned");

        let expired = matches!(
            inner.entries.get(&key),
            Some(entry) if entry.inserted_at.elapsed() > self.ttl
        );
        if expired {
            inner.entries.pop(&key);
        }

        match inner.entries.get(&key) {
            Some(entry) => {
                let vector = entry.vector.clone();
                inner.hits += 1;
                Some(vector)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    pub fn put(&self, text: &str, vector: Vec<f32>) {
        let key = cache_key(text);
        let mut inner = self.inner.lock().expect("embedding cache lock poisoned");
        inner.entries.put(
            key,
            CacheEntry {
                vector,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().expect("embedding cache lock poisoned");
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            total_requests: inner.hits + inner.misses,
            size: inner.entries.len(),
            capacity: self.capacity,
        }
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("embedding cache lock poisoned");
        inner.entries.clear();
        inner.hits = 0;
        inner.misses = 0;
    }
}
