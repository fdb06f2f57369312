//! Result cache keyed by request fingerprint
//!
//! Entries are immutable once written. A forced recomputation replaces the
//! entry; nothing else changes it. At most one computation per fingerprint is
//! in flight: concurrent callers for the same key wait for the first and then
//! see its entry as a cache hit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::CacheConfig;
use crate::llm::GenerationRequest;

/// Stable hash of a generation request
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// SHA-256 over the canonical JSON of endpoint, prompts and model parameters
    pub fn of(request: &GenerationRequest) -> Self {
        // serde_json maps are ordered, so key order is stable
        let canonical = serde_json::json!({
            "endpoint": request.endpoint,
            "system_prompt": request.system_prompt,
            "prompt": request.prompt,
            "params": {
                "temperature": request.params.temperature,
                "max_tokens": request.params.max_tokens,
            },
        });
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string().as_bytes());
        let fp = Self(format!("{:x}", hasher.finalize()));
        debug!(endpoint = %request.endpoint, fingerprint = %fp.short(), "Fingerprint::of: computed");
        fp
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 hex digits, for logs
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key/value store behind the cache
pub trait KvStore<K, V>: Send {
    /// Look up a value (may update recency)
    fn get(&mut self, key: &K) -> Option<V>;

    /// Insert or replace a value
    fn put(&mut self, key: K, value: V);

    /// Remove a value, returning whether it existed
    fn delete(&mut self, key: &K) -> bool;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Unbounded in-memory store
#[derive(Debug, Default)]
pub struct MemoryStore<K, V> {
    entries: HashMap<K, V>,
}

impl<K, V> MemoryStore<K, V> {
    pub fn new() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<K: Eq + Hash + Send, V: Clone + Send> KvStore<K, V> for MemoryStore<K, V> {
    fn get(&mut self, key: &K) -> Option<V> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    fn delete(&mut self, key: &K) -> bool {
        self.entries.remove(key).is_some()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Bounded store evicting the least recently used entry
pub struct LruStore<K: Hash + Eq, V> {
    entries: lru::LruCache<K, V>,
}

impl<K: Hash + Eq, V> LruStore<K, V> {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: lru::LruCache::new(capacity),
        }
    }
}

impl<K: Eq + Hash + Send, V: Clone + Send> KvStore<K, V> for LruStore<K, V> {
    fn get(&mut self, key: &K) -> Option<V> {
        self.entries.get(key).cloned()
    }

    fn put(&mut self, key: K, value: V) {
        self.entries.put(key, value);
    }

    fn delete(&mut self, key: &K) -> bool {
        self.entries.pop(key).is_some()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// One cached result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub value: Value,
    pub cached_at: DateTime<Utc>,
}

/// Statistics for status reporting
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
}

impl CacheStats {
    /// Calculate cache hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Outcome of a cache lookup
#[derive(Debug, Clone, PartialEq)]
pub struct Cached {
    pub value: Value,
    pub from_cache: bool,
}

type Store = Box<dyn KvStore<Fingerprint, CacheEntry>>;

/// Content-addressed result cache with single-flight computation
pub struct ResultCache {
    store: Mutex<Store>,
    inflight: Mutex<HashMap<Fingerprint, Arc<Mutex<()>>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
}

impl ResultCache {
    pub fn new(store: Store) -> Self {
        Self {
            store: Mutex::new(store),
            inflight: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
        }
    }

    /// Unbounded cache
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryStore::new()))
    }

    /// Cache from configuration: LRU when a capacity is set
    pub fn from_config(config: &CacheConfig) -> Self {
        match config.capacity.and_then(NonZeroUsize::new) {
            Some(capacity) => {
                debug!(%capacity, "ResultCache::from_config: lru store");
                Self::new(Box::new(LruStore::new(capacity)))
            }
            None => {
                debug!("ResultCache::from_config: memory store");
                Self::in_memory()
            }
        }
    }

    /// Look up an entry without computing
    pub async fn get(&self, fp: &Fingerprint) -> Option<CacheEntry> {
        self.store.lock().await.get(fp)
    }

    /// Return the cached value or run `compute` exactly once for this key
    ///
    /// With `bypass` the entry is recomputed and replaced. A failed
    /// computation writes nothing.
    pub async fn get_or_compute<F, Fut, E>(&self, fp: &Fingerprint, bypass: bool, compute: F) -> Result<Cached, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        debug!(fingerprint = %fp.short(), bypass, "get_or_compute: called");
        if !bypass && let Some(hit) = self.hit(fp).await {
            return Ok(hit);
        }

        let key_lock = {
            let mut inflight = self.inflight.lock().await;
            inflight.entry(fp.clone()).or_default().clone()
        };
        let guard = key_lock.lock().await;

        // Another caller may have filled the entry while we waited
        if !bypass && let Some(hit) = self.hit(fp).await {
            drop(guard);
            self.release(fp, key_lock).await;
            return Ok(hit);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let result = compute().await;

        if let Ok(value) = &result {
            let entry = CacheEntry {
                value: value.clone(),
                cached_at: Utc::now(),
            };
            self.store.lock().await.put(fp.clone(), entry);
            self.writes.fetch_add(1, Ordering::Relaxed);
            debug!(fingerprint = %fp.short(), "get_or_compute: entry written");
        }

        drop(guard);
        self.release(fp, key_lock).await;

        result.map(|value| Cached {
            value,
            from_cache: false,
        })
    }

    async fn hit(&self, fp: &Fingerprint) -> Option<Cached> {
        let entry = self.store.lock().await.get(fp)?;
        self.hits.fetch_add(1, Ordering::Relaxed);
        info!(fingerprint = %fp.short(), "cache hit");
        Some(Cached {
            value: entry.value,
            from_cache: true,
        })
    }

    /// Drop the per-key lock once no other caller holds it
    async fn release(&self, fp: &Fingerprint, key_lock: Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().await;
        drop(key_lock);
        if inflight.get(fp).is_some_and(|l| Arc::strong_count(l) == 1) {
            inflight.remove(fp);
        }
    }

    /// Remove an entry
    pub async fn invalidate(&self, fp: &Fingerprint) -> bool {
        self.store.lock().await.delete(fp)
    }

    pub async fn len(&self) -> usize {
        self.store.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::in_memory()
    }
}
