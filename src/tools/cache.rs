//! Result Cache
//!
//! Time-bounded memoization of successful tool results. Keys are derived from
//! the operation name plus a canonical JSON rendering of the parameters, so
//! field order never changes the key. Only `Ok` values are stored.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Default time-to-live for cached results (5 minutes)
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default interval of the background sweeper
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Deterministic cache key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive a key from an operation name and its parameters
    ///
    /// Object keys are sorted recursively before hashing; array order is
    /// significant.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error when `params` has no JSON form, for
    /// example a map with non-string keys or a non UTF-8 path.
    ///
    /// # Example
    ///
    /// ```
    /// use serde_json::json;
    /// use toolwarden::tools::CacheKey;
    ///
    /// let a = CacheKey::derive("npm view", &json!({"package": "left-pad", "json": true}))?;
    /// let b = CacheKey::derive("npm view", &json!({"json": true, "package": "left-pad"}))?;
    /// assert_eq!(a, b);
    /// # Ok::<(), serde_json::Error>(())
    /// ```
    pub fn derive(operation: &str, params: &impl Serialize) -> Result<Self, serde_json::Error> {
        let value = serde_json::to_value(params)?;
        let mut canonical = String::new();
        write_canonical(&value, &mut canonical);

        let mut hasher = Sha256::new();
        hasher.update(operation.as_bytes());
        hasher.update([0u8]);
        hasher.update(canonical.as_bytes());
        Ok(Self(format!("{:x}", hasher.finalize())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (k, v)) in entries.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(k.clone()).to_string());
                out.push(':');
                write_canonical(v, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

/// Cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// In-memory TTL cache
///
/// Cloning shares the same storage. Two concurrent misses on the same key
/// may both run their producer; the later insert wins.
#[derive(Debug)]
pub struct ResultCache<T> {
    entries: Arc<RwLock<HashMap<CacheKey, CacheEntry<T>>>>,
    ttl: Duration,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl<T> Clone for ResultCache<T> {
    fn clone(&self) -> Self {
        Self {
            entries: Arc::clone(&self.entries),
            ttl: self.ttl,
            hits: Arc::clone(&self.hits),
            misses: Arc::clone(&self.misses),
        }
    }
}

impl<T: Clone + Send + Sync + 'static> Default for ResultCache<T> {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl<T: Clone + Send + Sync + 'static> ResultCache<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            ttl,
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Fresh value for `key`, if any
    ///
    /// An expired entry is removed on the way out.
    pub async fn get(&self, key: &CacheKey) -> Option<T> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > now => return Some(entry.value.clone()),
                Some(_) => {}
                None => return None,
            }
        }

        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|e| e.expires_at <= now) {
            trace!(key = %key, "Evicting expired cache entry");
            entries.remove(key);
        }
        None
    }

    /// Store `value` under `key` with the cache's TTL
    pub async fn insert(&self, key: CacheKey, value: T) {
        let expires_at = Instant::now() + self.ttl;
        self.entries
            .write()
            .await
            .insert(key, CacheEntry { value, expires_at });
    }

    /// Return the cached value for `key`, or run `producer` and cache its
    /// success
    ///
    /// Errors from `producer` are returned unchanged and never stored.
    pub async fn with_cache<F, Fut, E>(&self, key: CacheKey, producer: F) -> Result<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(&key).await {
            self.hits.fetch_add(1, Ordering::Relaxed);
            debug!(key = %key, "Cache hit");
            return Ok(value);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        debug!(key = %key, "Cache miss");
        let value = producer().await?;
        self.insert(key, value.clone()).await;
        Ok(value)
    }

    /// Drop one entry; returns whether it existed
    pub async fn invalidate(&self, key: &CacheKey) -> bool {
        self.entries.write().await.remove(key).is_some()
    }

    /// Drop every entry
    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }

    /// Remove all expired entries, returning how many were removed
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "Swept expired cache entries");
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.entries.read().await.len(),
        }
    }

    /// Spawn a task that sweeps every `interval`
    ///
    /// The caller owns the handle and should abort it on shutdown.
    pub fn start_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                cache.sweep().await;
            }
        })
    }
}
