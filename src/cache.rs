//! TTL cache for idempotent API reads.
//!
//! Research tools hit the same endpoints repeatedly within a session (and
//! across concurrent sub-forecasts), so idempotent reads are cached under a
//! `(function, canonicalized arguments)` key. Entries expire on read once
//! past their TTL; when the cache is full the oldest insertion is evicted.
//! Hit/miss counts are tracked for the session summary.
//!
//! Defaults: 5-minute TTL for platform metadata, search and Wikipedia reads;
//! the Wayback availability cache uses 24 hours (availability rarely
//! changes).

use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Default TTL for cached API reads.
pub const DEFAULT_TTL: Duration = Duration::from_secs(300);

/// Default maximum number of entries before eviction kicks in.
pub const DEFAULT_MAX_SIZE: usize = 1024;

struct Entry {
    value: Value,
    inserted_at: Instant,
    ttl: Duration,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.inserted_at) >= self.ttl
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub size: usize,
}

impl CacheStats {
    /// Fraction of lookups that hit, or 0.0 before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

struct Inner {
    entries: HashMap<String, Entry>,
    hits: u64,
    misses: u64,
}

/// Async TTL cache with oldest-insertion eviction.
pub struct TtlCache {
    inner: Mutex<Inner>,
    default_ttl: Duration,
    max_size: usize,
}

impl TtlCache {
    /// Create a cache with the given default TTL and max size.
    pub fn new(default_ttl: Duration, max_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                hits: 0,
                misses: 0,
            }),
            default_ttl,
            max_size,
        }
    }

    /// Look up a key. Expired entries count as misses and are removed.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => {
                let value = entry.value.clone();
                inner.hits += 1;
                Some(value)
            }
            Some(_) => {
                inner.entries.remove(key);
                inner.misses += 1;
                None
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Insert a value with the default TTL.
    pub async fn set(&self, key: impl Into<String>, value: Value) {
        self.set_with_ttl(key, value, self.default_ttl).await;
    }

    /// Insert a value with an explicit TTL.
    pub async fn set_with_ttl(&self, key: impl Into<String>, value: Value, ttl: Duration) {
        let key = key.into();
        let mut inner = self.inner.lock().await;

        if inner.entries.len() >= self.max_size && !inner.entries.contains_key(&key) {
            // Evict the oldest insertion to stay within bounds.
            if let Some(oldest) = inner
                .entries
                .iter()
                .min_by_key(|(_, e)| e.inserted_at)
                .map(|(k, _)| k.clone())
            {
                inner.entries.remove(&oldest);
            }
        }

        inner.entries.insert(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
                ttl,
            },
        );
    }

    /// Fetch-through: return the cached value for `key`, or run `fetch`,
    /// store its result under `ttl`, and return it. Errors are not cached.
    pub async fn get_or_insert_with<F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        fetch: F,
    ) -> crate::Result<Value>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = crate::Result<Value>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.set_with_ttl(key, value.clone(), ttl).await;
        Ok(value)
    }

    /// Remove all entries. Stats are preserved.
    pub async fn clear(&self) {
        self.inner.lock().await.entries.clear();
    }

    /// Snapshot of hit/miss/size counters.
    pub async fn stats(&self) -> CacheStats {
        let inner = self.inner.lock().await;
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            size: inner.entries.len(),
        }
    }
}

impl Default for TtlCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL, DEFAULT_MAX_SIZE)
    }
}

/// Build a cache key from a function name and its canonicalized arguments.
///
/// Object keys are serialized in sorted order (serde_json maps preserve
/// insertion order, so the arguments are normalized first) to make the key
/// independent of argument ordering at the call site.
pub fn cache_key(function: &str, args: &Value) -> String {
    format!("{}:{}", function, canonical_json(args))
}

fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", k, canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}
