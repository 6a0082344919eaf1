//! Result cache: LRU eviction plus a TTL, keyed by the normalized
//! query and its parameters (spec §4.G).

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// A cached entry and when it was inserted.
struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

/// Build the cache key from a normalized query plus whatever
/// parameters affect the result set (profile, limit, fusion strategy).
/// Normalizing (lowercase, collapsed whitespace) means `"React Hooks"`
/// and `"react   hooks"` share an entry.
pub fn cache_key(profile: &str, query: &str, limit: usize, strategy: &str) -> String {
    let normalized: String = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    format!("{profile}\u{1}{normalized}\u{1}{limit}\u{1}{strategy}")
}

/// Thread-safe LRU+TTL cache. Callers compute a key with `cache_key`
/// and store whatever result type they like.
pub struct ResultCache<V> {
    inner: Mutex<LruCache<String, Entry<V>>>,
    ttl: Duration,
    evictions: std::sync::atomic::AtomicU64,
}

impl<V: Clone> ResultCache<V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner: Mutex::new(LruCache::new(capacity)), ttl, evictions: std::sync::atomic::AtomicU64::new(0) }
    }

    /// Fetch a live (non-expired) entry, promoting it in the LRU order.
    pub fn get(&self, key: &str) -> Option<V> {
        let mut guard = self.inner.lock().unwrap();
        if let Some(entry) = guard.get(key) {
            if entry.inserted_at.elapsed() <= self.ttl {
                return Some(entry.value.clone());
            }
        }
        if guard.pop(key).is_some() {
            self.evictions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
        None
    }

    pub fn put(&self, key: String, value: V) {
        let mut guard = self.inner.lock().unwrap();
        if guard.put(key, Entry { value, inserted_at: Instant::now() }).is_some() {
            self.evictions.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        }
    }

    /// Drop every cached entry, e.g. after a write invalidates results.
    pub fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(std::sync::atomic::Ordering::Relaxed)
    }
}
