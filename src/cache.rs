//! Bounded LRU caching (evicts only past capacity, refreshes recency on both
//! `get` and `put`) plus the two process-wide singletons: a token-counter
//! cache and the BM25 index LRU. Both singletons expose `clear()`.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::{Mutex, OnceLock};

use lru::LruCache;

pub struct BoundedCache<K: Hash + Eq, V> {
    inner: LruCache<K, V>,
}

impl<K: Hash + Eq, V> BoundedCache<K, V> {
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self { inner: LruCache::new(cap) }
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn put(&mut self, key: K, value: V) {
        self.inner.put(key, value);
    }

    pub fn clear(&mut self) {
        self.inner.clear();
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

const DEFAULT_TOKEN_CACHE_CAPACITY: usize = 10_000;

/// Caches the estimated token count for a chunk's content, keyed by its
/// sha — recomputing this is cheap here (a character-count heuristic) but
/// this cache is kept as a process-wide singleton, so the
/// same slot exists for implementations with a real (expensive) tokenizer.
static TOKEN_COUNTER_CACHE: OnceLock<Mutex<BoundedCache<String, usize>>> = OnceLock::new();

pub fn token_counter_cache() -> &'static Mutex<BoundedCache<String, usize>> {
    TOKEN_COUNTER_CACHE.get_or_init(|| Mutex::new(BoundedCache::new(DEFAULT_TOKEN_CACHE_CAPACITY)))
}

pub fn clear_token_counter_cache() {
    token_counter_cache().lock().expect("token counter cache mutex poisoned").clear();
}

/// The BM25-index LRU, keyed by `(basePath, providerName,
/// dimensions)`. Capacity is set once at first access from
/// `EngineConfig::max_bm25_cache`; later calls to `bm25_cache` with a
/// different capacity are no-ops, matching a process-wide singleton.
static BM25_CACHE: OnceLock<Mutex<crate::bm25::Bm25Cache>> = OnceLock::new();

pub fn bm25_cache(default_capacity: usize) -> &'static Mutex<crate::bm25::Bm25Cache> {
    BM25_CACHE.get_or_init(|| Mutex::new(crate::bm25::Bm25Cache::new(default_capacity)))
}

pub fn clear_bm25_cache() {
    if let Some(cache) = BM25_CACHE.get() {
        cache.lock().expect("bm25 cache mutex poisoned").clear();
    }
}

/// Caches a query's embedded vector keyed by `(query, provider, dimensions)`
/// so that a long-lived caller (a search session spanning multiple
/// identical queries) issues at most one `generate_embedding` call per
/// distinct query. Not one of the two process-wide singletons — owned by
/// whichever caller holds a search session open.
pub struct QueryVectorCache {
    inner: Mutex<BoundedCache<(String, String, usize), Vec<f32>>>,
}

impl QueryVectorCache {
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(BoundedCache::new(capacity)) }
    }

    pub async fn get_or_embed<F, Fut>(&self, query: &str, provider: &str, dimensions: usize, embed: F) -> crate::error::Result<Vec<f32>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::error::Result<Vec<f32>>>,
    {
        let key = (query.to_string(), provider.to_string(), dimensions);
        if let Some(cached) = self.inner.lock().expect("query vector cache mutex poisoned").get(&key) {
            return Ok(cached.clone());
        }
        let vector = embed().await?;
        self.inner.lock().expect("query vector cache mutex poisoned").put(key, vector.clone());
        Ok(vector)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_only_past_capacity() {
        let mut cache: BoundedCache<&str, i32> = BoundedCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        assert_eq!(cache.len(), 2);
        cache.put("c", 3);
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&"a").is_none());
    }

    #[test]
    fn get_refreshes_recency() {
        let mut cache: BoundedCache<&str, i32> = BoundedCache::new(2);
        cache.put("a", 1);
        cache.put("b", 2);
        cache.get(&"a");
        cache.put("c", 3);
        assert!(cache.get(&"a").is_some());
        assert!(cache.get(&"b").is_none());
    }

    #[test]
    fn clear_empties_the_cache() {
        let mut cache: BoundedCache<&str, i32> = BoundedCache::new(4);
        cache.put("a", 1);
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn identical_queries_reuse_the_cached_vector() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let calls = AtomicUsize::new(0);
        let cache = QueryVectorCache::new(8);

        for _ in 0..2 {
            cache
                .get_or_embed("helloWorld function", "mock", 32, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1.0; 32])
                })
                .await
                .unwrap();
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
