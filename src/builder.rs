//! Fluent construction of a [`Workflow`], grounded in the teacher's
//! `DurableEngineBuilder` (`examples/arminhammer-jackdaw/src/builder.rs`):
//! defaults to an in-memory cache the way the teacher defaults to
//! in-memory persistence/cache, and lets a caller swap in the file or
//! distributed backend, or a pre-populated [`Registry`], without hand-
//! wiring `Workflow::new` + `set_cache` at every call site.

use crate::cache::Cache;
use crate::config::{CacheBackend, CacheConfig, EngineConfig};
use crate::providers::cache::{DistributedCache, FileCache, MemoryCache};
use crate::registry::Registry;
use crate::workflow::Workflow;
use snafu::prelude::*;
use std::sync::Arc;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to create file cache directory: {source}"))]
    FileCacheDir { source: std::io::Error },

    #[snafu(display("file cache backend requires a directory (set cache.dir)"))]
    MissingFileCacheDir,

    #[snafu(display("distributed cache backend requires a base URL (set cache.distributed_url)"))]
    MissingDistributedUrl,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Builds a [`Workflow`] from a [`Registry`] plus optional cache wiring.
/// If no cache is ever set, `build` installs an in-memory cache with
/// defaults, mirroring the original's `Workflow.__init__` which always
/// has *some* cache object even if caching is disabled per-task.
pub struct WorkflowBuilder {
    registry: Registry,
    cache: Option<Arc<dyn Cache>>,
    max_size: usize,
    default_ttl_seconds: Option<i64>,
}

impl WorkflowBuilder {
    #[must_use]
    pub fn new(registry: Registry) -> Self {
        Self {
            registry,
            cache: None,
            max_size: 1000,
            default_ttl_seconds: None,
        }
    }

    /// Install a caller-constructed cache backend directly.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Configure the in-memory backend's capacity and default TTL, used
    /// when `build` installs the default cache.
    #[must_use]
    pub fn with_memory_cache_defaults(mut self, max_size: usize, default_ttl_seconds: Option<i64>) -> Self {
        self.max_size = max_size;
        self.default_ttl_seconds = default_ttl_seconds;
        self
    }

    /// Build from a loaded [`EngineConfig`], selecting and constructing
    /// whichever cache backend the config names.
    pub fn from_config(registry: Registry, config: &EngineConfig) -> Result<Self> {
        let cache = cache_from_config(&config.cache)?;
        let mut builder = Self::new(registry)
            .with_memory_cache_defaults(config.cache.max_size, config.cache.default_ttl_seconds);
        if let Some(cache) = cache {
            builder = builder.with_cache(cache);
        }
        Ok(builder)
    }

    #[must_use]
    pub fn build(self) -> Workflow {
        let mut workflow = Workflow::new(self.registry);
        match self.cache {
            Some(cache) => workflow.set_cache(cache),
            None => workflow.enable_memory_cache(self.max_size, self.default_ttl_seconds),
        }
        workflow
    }
}

fn cache_from_config(config: &CacheConfig) -> Result<Option<Arc<dyn Cache>>> {
    match config.backend {
        CacheBackend::None => Ok(None),
        CacheBackend::Memory => Ok(Some(Arc::new(MemoryCache::new(
            config.max_size,
            config.default_ttl_seconds,
        )))),
        CacheBackend::File => {
            let dir = config.dir.clone().context(MissingFileCacheDirSnafu)?;
            let cache = FileCache::new(dir).context(FileCacheDirSnafu)?;
            Ok(Some(Arc::new(cache)))
        }
        CacheBackend::Distributed => {
            let url = config
                .distributed_url
                .clone()
                .context(MissingDistributedUrlSnafu)?;
            Ok(Some(Arc::new(DistributedCache::new(url, "corvid:"))))
        }
    }
}
