//! In-memory LRU+TTL cache, grounded in the original's `MemoryCache`
//! (move-to-back on hit, evict-oldest-on-insert past capacity).

use crate::cache::{Cache, CacheEntry, CacheStats, Result};
use crate::result::ResultValue;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    puts: u64,
    evictions: u64,
    expired_removals: u64,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, CacheEntry>,
    /// Insertion/access order, oldest at the front. Re-inserted on every
    /// hit so eviction always drops the least-recently-used key.
    order: VecDeque<String>,
    counters: Counters,
}

/// Ordered map keyed by fingerprint; `max_size` bounds the number of live
/// entries, evicting the oldest on overflow.
#[derive(Debug)]
pub struct MemoryCache {
    max_size: usize,
    default_ttl_seconds: Option<i64>,
    inner: Mutex<Inner>,
}

impl MemoryCache {
    #[must_use]
    pub fn new(max_size: usize, default_ttl_seconds: Option<i64>) -> Self {
        Self {
            max_size,
            default_ttl_seconds,
            inner: Mutex::new(Inner::default()),
        }
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(1000, None)
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");

        let Some(entry) = inner.entries.get(key) else {
            inner.counters.misses += 1;
            return Ok(None);
        };

        if entry.is_expired() {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            inner.counters.expired_removals += 1;
            inner.counters.misses += 1;
            return Ok(None);
        }

        let found = entry.clone();
        inner.order.retain(|k| k != key);
        inner.order.push_back(key.to_string());
        inner.counters.hits += 1;
        Ok(Some(found))
    }

    async fn put(&self, key: &str, result: ResultValue, ttl_seconds: Option<i64>) -> Result<()> {
        if !result.success {
            return Ok(());
        }

        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let effective_ttl = ttl_seconds.or(self.default_ttl_seconds);
        let entry = CacheEntry::new(result, effective_ttl);

        if inner.entries.contains_key(key) {
            inner.order.retain(|k| k != key);
        }
        inner.entries.insert(key.to_string(), entry);
        inner.order.push_back(key.to_string());

        while inner.entries.len() > self.max_size {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            inner.entries.remove(&oldest);
            inner.counters.evictions += 1;
        }

        inner.counters.puts += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.order.retain(|k| k != key);
        Ok(inner.entries.remove(key).is_some())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        inner.entries.clear();
        inner.order.clear();
        inner.counters = Counters::default();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let inner = self.inner.lock().expect("cache mutex poisoned");
        Ok(CacheStats {
            backend: "memory".to_string(),
            size: inner.entries.len(),
            max_size: Some(self.max_size),
            hits: inner.counters.hits,
            misses: inner.counters.misses,
            puts: inner.counters.puts,
            evictions: inner.counters.evictions,
            expired_removals: inner.counters.expired_removals,
        })
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let mut inner = self.inner.lock().expect("cache mutex poisoned");
        let expired: Vec<String> = inner
            .entries
            .iter()
            .filter(|(_, entry)| entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect();

        for key in &expired {
            inner.entries.remove(key);
            inner.order.retain(|k| k != key);
            inner.counters.expired_removals += 1;
        }

        Ok(expired.len())
    }
}
