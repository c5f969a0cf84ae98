//! Helpers for normalizing `serde_json::Value` trees.
//!
//! Both the cache key fingerprinter and the path resolver need a canonical
//! view of a JSON value: object keys in sorted order, arrays and scalars
//! passed through unchanged. This is the single place that rule lives.

use serde_json::Value;

/// Recursively sort object keys so two maps that differ only in insertion
/// order normalize to the same value.
#[must_use]
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            let normalized: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), normalize(v)))
                .collect();
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

/// Descend into `current` by a single map key, the way both the path
/// resolver and config-template substitution need to.
#[must_use]
pub fn get_field<'a>(current: &'a Value, key: &str) -> Option<&'a Value> {
    current.as_object().and_then(|obj| obj.get(key))
}

/// Render a value the way `${...}` substitution stringifies a looked-up
/// value: strings pass through bare, everything else is JSON-encoded.
#[must_use]
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
