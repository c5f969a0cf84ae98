//! The pluggable cache contract, its deterministic key fingerprint, and the
//! entry type shared by every backend in `providers::cache`.

use crate::result::ResultValue;
use crate::value;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use snafu::prelude::*;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("cache backend error: {message}"))]
    Backend { message: String },

    #[snafu(display("cache entry serialization error: {source}"))]
    Serialization { source: serde_json::Error },

    #[snafu(display("cache entry I/O error: {source}"))]
    Io { source: std::io::Error },
}

pub type Result<T> = std::result::Result<T, Error>;

/// Configuration keys excluded from the fingerprint: they govern caching
/// policy itself, not what a task computes.
const EXCLUDED_CONFIG_KEYS: &[&str] = &[
    "cache_enabled",
    "cache_ttl",
    "cache_key",
    "progress_tracking",
    "timeout",
    "max_retry",
];

/// Deterministic SHA-256 fingerprint of a task's identity, configuration
/// (minus policy keys), and (optionally) its dependency outputs.
#[must_use]
pub fn fingerprint(
    task_type: &str,
    task_name: &str,
    config: &serde_json::Value,
    dependencies: Option<&HashMap<String, serde_json::Value>>,
) -> String {
    let mut key_data = serde_json::Map::new();
    key_data.insert(
        "task_type".into(),
        serde_json::Value::String(task_type.into()),
    );
    key_data.insert(
        "task_name".into(),
        serde_json::Value::String(task_name.into()),
    );
    key_data.insert("config".into(), normalize_config(config));

    if let Some(deps) = dependencies {
        if !deps.is_empty() {
            let normalized: serde_json::Map<String, serde_json::Value> = deps
                .iter()
                .map(|(k, v)| (k.clone(), value::normalize(v)))
                .collect();
            key_data.insert(
                "dependencies".into(),
                serde_json::Value::Object(normalized),
            );
        }
    }

    // Sorted keys at every level, matching `value::normalize`'s contract,
    // so map insertion order never perturbs the hash.
    let canonical = value::normalize(&serde_json::Value::Object(key_data));
    let json_str = serde_json::to_string(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(json_str.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A fingerprint derivable from task type and config alone, without
/// dependency outputs — used for tag/type-scoped cache inspection, never
/// for the lookup path during execution.
#[must_use]
pub fn partial_fingerprint(task_type: &str, config: &serde_json::Value) -> String {
    let mut key_data = serde_json::Map::new();
    key_data.insert(
        "task_type".into(),
        serde_json::Value::String(task_type.into()),
    );
    key_data.insert("config".into(), normalize_config(config));

    let canonical = value::normalize(&serde_json::Value::Object(key_data));
    let json_str = serde_json::to_string(&canonical).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(json_str.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Derived tags for tag-based bulk invalidation. Supplemental: not part of
/// the `Cache` trait, just a helper callers may use alongside it.
#[must_use]
pub fn tags_for(
    task_type: &str,
    task_name: &str,
    dependency_names: &[String],
    config: &serde_json::Value,
) -> BTreeSet<String> {
    let mut tags = BTreeSet::new();
    tags.insert(format!("task_type:{task_type}"));
    tags.insert(format!("task_name:{task_name}"));
    for dep in dependency_names {
        tags.insert(format!("depends_on:{dep}"));
    }
    if let Some(category) = config.get("category").and_then(serde_json::Value::as_str) {
        tags.insert(format!("category:{category}"));
    }
    tags
}

fn normalize_config(config: &serde_json::Value) -> serde_json::Value {
    let Some(obj) = config.as_object() else {
        return value::normalize(config);
    };
    let filtered: serde_json::Map<String, serde_json::Value> = obj
        .iter()
        .filter(|(k, _)| !EXCLUDED_CONFIG_KEYS.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), value::normalize(v)))
        .collect();
    serde_json::Value::Object(filtered)
}

/// A stored result plus the bookkeeping needed to decide expiry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub result: ResultValue,
    pub cached_at: DateTime<Utc>,
    pub ttl_seconds: Option<i64>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(result: ResultValue, ttl_seconds: Option<i64>) -> Self {
        Self {
            result,
            cached_at: Utc::now(),
            ttl_seconds,
        }
    }

    #[must_use]
    pub fn is_expired(&self) -> bool {
        match self.ttl_seconds {
            Some(ttl) => {
                let expires_at = self.cached_at + chrono::Duration::seconds(ttl);
                Utc::now() > expires_at
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && self.result.success
    }
}

/// Backend-reported counters, returned by [`Cache::stats`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheStats {
    pub backend: String,
    pub size: usize,
    pub max_size: Option<usize>,
    pub hits: u64,
    pub misses: u64,
    pub puts: u64,
    pub evictions: u64,
    pub expired_removals: u64,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Pluggable key-addressed cache. Implementations MUST serialize their own
/// operations and MUST NOT let backend I/O failures propagate into task
/// execution — a backend error is a miss or a no-op store, logged and
/// swallowed at the call site in `task.rs`.
#[async_trait]
pub trait Cache: Send + Sync + std::fmt::Debug {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>>;
    async fn put(&self, key: &str, result: ResultValue, ttl_seconds: Option<i64>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;
    async fn clear(&self) -> Result<()>;
    async fn stats(&self) -> Result<CacheStats>;
    async fn cleanup_expired(&self) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fingerprint_is_stable_under_config_key_reordering() {
        let config_a = json!({"a": 1, "b": 2});
        let config_b = json!({"b": 2, "a": 1});
        let key_a = fingerprint("http", "fetch", &config_a, None);
        let key_b = fingerprint("http", "fetch", &config_b, None);
        assert_eq!(key_a, key_b);
    }

    #[test]
    fn fingerprint_excludes_policy_keys() {
        let with_policy = json!({"url": "x", "timeout": 5, "max_retry": 2});
        let without_policy = json!({"url": "x"});
        assert_eq!(
            fingerprint("http", "fetch", &with_policy, None),
            fingerprint("http", "fetch", &without_policy, None)
        );
    }

    #[test]
    fn fingerprint_changes_with_dependency_outputs() {
        let config = json!({"url": "x"});
        let mut deps_a = HashMap::new();
        deps_a.insert("upstream".to_string(), json!({"v": 1}));
        let mut deps_b = HashMap::new();
        deps_b.insert("upstream".to_string(), json!({"v": 2}));
        assert_ne!(
            fingerprint("http", "fetch", &config, Some(&deps_a)),
            fingerprint("http", "fetch", &config, Some(&deps_b))
        );
    }

    #[test]
    fn entry_without_ttl_never_expires() {
        let entry = CacheEntry::new(ResultValue::success(json!({})), None);
        assert!(!entry.is_expired());
    }

    #[test]
    fn entry_past_ttl_is_expired() {
        let mut entry = CacheEntry::new(ResultValue::success(json!({})), Some(1));
        entry.cached_at = Utc::now() - chrono::Duration::seconds(5);
        assert!(entry.is_expired());
    }
}
