//! File-backed cache: one file per key, written atomically via a
//! write-to-temp-then-rename, with corrupt files treated as a miss and
//! removed.

use crate::cache::{Cache, CacheEntry, CacheStats, Error, IoSnafu, Result, SerializationSnafu};
use crate::result::ResultValue;
use async_trait::async_trait;
use snafu::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct Counters {
    hits: u64,
    misses: u64,
    puts: u64,
    expired_removals: u64,
}

/// Stores each entry as `<dir>/<key>.cache`. Counters are process-local:
/// the backend itself holds no durability guarantee beyond the files.
#[derive(Debug)]
pub struct FileCache {
    dir: PathBuf,
    counters: Mutex<Counters>,
}

impl FileCache {
    /// Create (or reuse) `dir` as the cache's storage directory.
    pub fn new(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            counters: Mutex::new(Counters::default()),
        })
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.cache"))
    }

    fn tmp_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.cache.tmp"))
    }

    async fn read_entry(&self, path: &Path) -> Result<Option<CacheEntry>> {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(Error::Io { source }),
        };

        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => Ok(Some(entry)),
            Err(_) => {
                // Corrupt file: remove it and treat as a miss rather than
                // surfacing a deserialization error.
                let _ = tokio::fs::remove_file(path).await;
                Ok(None)
            }
        }
    }
}

#[async_trait]
impl Cache for FileCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>> {
        let path = self.entry_path(key);
        let Some(entry) = self.read_entry(&path).await? else {
            self.counters.lock().expect("cache mutex poisoned").misses += 1;
            return Ok(None);
        };

        if entry.is_expired() {
            let _ = tokio::fs::remove_file(&path).await;
            let mut counters = self.counters.lock().expect("cache mutex poisoned");
            counters.expired_removals += 1;
            counters.misses += 1;
            return Ok(None);
        }

        self.counters.lock().expect("cache mutex poisoned").hits += 1;
        Ok(Some(entry))
    }

    async fn put(&self, key: &str, result: ResultValue, ttl_seconds: Option<i64>) -> Result<()> {
        if !result.success {
            return Ok(());
        }

        let entry = CacheEntry::new(result, ttl_seconds);
        let bytes = serde_json::to_vec(&entry).context(SerializationSnafu)?;

        let tmp = self.tmp_path(key);
        tokio::fs::write(&tmp, &bytes)
            .await
            .context(IoSnafu)?;
        tokio::fs::rename(&tmp, self.entry_path(key))
            .await
            .context(IoSnafu)?;

        self.counters.lock().expect("cache mutex poisoned").puts += 1;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        match tokio::fs::remove_file(self.entry_path(key)).await {
            Ok(()) => Ok(true),
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(Error::Io { source }),
        }
    }

    async fn clear(&self) -> Result<()> {
        let mut read_dir = tokio::fs::read_dir(&self.dir).await.context(IoSnafu)?;
        while let Some(entry) = read_dir.next_entry().await.context(IoSnafu)? {
            if entry.path().extension().is_some_and(|ext| ext == "cache") {
                let _ = tokio::fs::remove_file(entry.path()).await;
            }
        }
        *self.counters.lock().expect("cache mutex poisoned") = Counters::default();
        Ok(())
    }

    async fn stats(&self) -> Result<CacheStats> {
        let mut size = 0usize;
        let mut read_dir = tokio::fs::read_dir(&self.dir).await.context(IoSnafu)?;
        while let Some(entry) = read_dir.next_entry().await.context(IoSnafu)? {
            if entry.path().extension().is_some_and(|ext| ext == "cache") {
                size += 1;
            }
        }

        let counters = self.counters.lock().expect("cache mutex poisoned");
        Ok(CacheStats {
            backend: "file".to_string(),
            size,
            max_size: None,
            hits: counters.hits,
            misses: counters.misses,
            puts: counters.puts,
            evictions: 0,
            expired_removals: counters.expired_removals,
        })
    }

    async fn cleanup_expired(&self) -> Result<usize> {
        let mut removed = 0usize;
        let mut read_dir = tokio::fs::read_dir(&self.dir).await.context(IoSnafu)?;
        let mut paths = Vec::new();
        while let Some(entry) = read_dir.next_entry().await.context(IoSnafu)? {
            if entry.path().extension().is_some_and(|ext| ext == "cache") {
                paths.push(entry.path());
            }
        }

        for path in paths {
            if let Some(entry) = self.read_entry(&path).await? {
                if entry.is_expired() {
                    let _ = tokio::fs::remove_file(&path).await;
                    removed += 1;
                }
            }
        }

        self.counters
            .lock()
            .expect("cache mutex poisoned")
            .expired_removals += removed as u64;
        Ok(removed)
    }
}
