//! Layered engine configuration: defaults, then `corvid.yaml` (current
//! directory or `~/.config/corvid/corvid.yaml`), then `CORVID__`-prefixed
//! environment variables, then CLI flags — mirroring the teacher's
//! `JackdawConfig::load` precedence chain.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which [`Cache`](crate::cache::Cache) backend the CLI wires up by
/// default when a workflow doesn't configure its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
    Distributed,
    None,
}

/// Cache-specific settings, independent of which backend is selected so
/// switching backends doesn't require touching unrelated fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Entry cap for the in-memory backend.
    #[serde(default = "CacheConfig::default_max_size")]
    pub max_size: usize,

    /// Default TTL (seconds) applied when a task doesn't set its own.
    pub default_ttl_seconds: Option<i64>,

    /// Storage directory for the file backend.
    pub dir: Option<PathBuf>,

    /// Base URL for the distributed (HTTP key/value) backend.
    pub distributed_url: Option<String>,
}

impl CacheConfig {
    fn default_max_size() -> usize {
        1000
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            max_size: Self::default_max_size(),
            default_ttl_seconds: None,
            dir: None,
            distributed_url: None,
        }
    }
}

/// Global engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub cache: CacheConfig,

    /// Default `max_concurrent` applied to a `TaskGroup` whose template
    /// doesn't specify one, per spec.md §6's `max_concurrent: 10` default.
    #[serde(default = "EngineConfig::default_max_concurrent")]
    pub default_max_concurrent: usize,

    /// Enable verbose (`debug`) tracing instead of `info`.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            default_max_concurrent: Self::default_max_concurrent(),
            verbose: false,
        }
    }
}

impl EngineConfig {
    fn default_max_concurrent() -> usize {
        10
    }

    /// Load configuration with precedence: defaults < config file <
    /// environment < (caller-applied) CLI flags. The CLI layers its own
    /// flags on top of the returned value; this only resolves file/env.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(
                config::File::with_name("corvid")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::File::with_name(&format!(
                    "{}/.config/corvid/corvid",
                    std::env::var("HOME").unwrap_or_else(|_| ".".to_string())
                ))
                .format(config::FileFormat::Yaml)
                .required(false),
            )
            .add_source(
                config::Environment::with_prefix("CORVID")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = EngineConfig::default();
        assert_eq!(config.default_max_concurrent, 10);
        assert_eq!(config.cache.backend, CacheBackend::Memory);
        assert_eq!(config.cache.max_size, 1000);
    }

    #[test]
    fn load_falls_back_to_defaults_without_a_config_file() {
        // No corvid.yaml is present in the crate root or test harness cwd,
        // and CORVID__ env vars aren't set in the test environment, so
        // this should resolve to plain defaults.
        let config = EngineConfig::load().expect("config should still resolve to defaults");
        assert_eq!(config.default_max_concurrent, 10);
    }
}
