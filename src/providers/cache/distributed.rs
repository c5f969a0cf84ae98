//! HTTP-backed distributed cache, modeled on the original's `redis_cache.py`
//! but speaking to a generic key/value HTTP service via `reqwest` rather
//! than a hard dependency on a Redis client (no example repo in the
//! retrieval pack carries one). Entries are stored at `{base_url}/{prefix}{key}`
//! with `PUT`/`GET`/`DELETE`; server-side TTL, if the backend honors it, is
//! passed as a header — read failures are treated as a miss, never a fatal
//! error.

use crate::cache::{Cache, CacheEntry, CacheStats, Result, SerializationSnafu};
use crate::result::ResultValue;
use async_trait::async_trait;
use reqwest::Client;
use snafu::prelude::*;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters are process-local: the server itself owns durability and
/// cross-instance sharing, this struct only tracks what this client saw.
#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    puts: AtomicU64,
}

/// Talks to a remote key/value store over HTTP. Shares cached artifacts
/// across engine instances; does not share scheduling state (out of
/// scope per spec.md's Non-goals).
#[derive(Debug)]
pub struct DistributedCache {
    base_url: String,
    prefix: String,
    client: Client,
    counters: Counters,
}

impl DistributedCache {
    #[must_use]
    pub fn new(base_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            prefix: prefix.into(),
            client: Client::new(),
            counters: Counters::default(),
        }
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}{}", self.base_url.trim_end_matches('/'), self.prefix, key)
    }
}

#[async_trait]
impl Cache for DistributedCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let response = match self.client.get(self.url_for(key)).send().await {
            Ok(response) => response,
            Err(_) => {
                // Backend I/O failures must never propagate into task
                // execution: treat as a miss.
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return Ok(None);
            }
        };

        if !response.status().is_success() {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let Ok(bytes) = response.bytes().await else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let Ok(entry) = serde_json::from_slice::<CacheEntry>(&bytes) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        if entry.is_expired() {
            let _ = self.delete(key).await;
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(entry))
    }

    async fn put(&self, key: &str, result: ResultValue, ttl_seconds: Option<i64>) -> Result<()> {
        if !result.success {
            return Ok(());
        }

        let entry = CacheEntry::new(result, ttl_seconds);
        let body = serde_json::to_vec(&entry).context(SerializationSnafu)?;

        let mut request = self.client.put(self.url_for(key)).body(body);
        if let Some(ttl) = ttl_seconds {
            request = request.header("X-Cache-TTL-Seconds", ttl.to_string());
        }

        // Backend errors are logged by the caller via the `Backend` variant
        // being absent here on purpose: a failed store degrades to a
        // no-op, not a fatal error.
        if request.send().await.is_ok() {
            self.counters.puts.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let response = self
            .client
            .delete(self.url_for(key))
            .send()
            .await
            .ok();
        Ok(response.is_some_and(|r| r.status().is_success()))
    }

    async fn clear(&self) -> Result<()> {
        let _ = self
            .client
            .delete(format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                self.prefix.trim_end_matches('/')
            ))
            .send()
            .await;
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        Ok(CacheStats {
            backend: "distributed".to_string(),
            size: 0,
            max_size: None,
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            puts: self.counters.puts.load(Ordering::Relaxed),
            evictions: 0,
            expired_removals: 0,
        })
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        // The server owns TTL enforcement for entries it accepted with a
        // TTL header; this client has no bulk-scan endpoint to drive.
        Ok(0)
    }
}
