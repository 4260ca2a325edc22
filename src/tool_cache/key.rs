//! Deterministic cache keys for tool invocations.
//!
//! Parameters are canonicalised by sorting object keys recursively (arrays
//! keep their order) and hashed with SHA-256. Two calls whose parameters
//! differ only in key order produce the same key.

use serde_json::{Map, Value, json};
use sha2::{Digest, Sha256};

/// Returns `value` with every object's keys sorted, recursively.
#[must_use]
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, nested)| (key.clone(), canonicalize(nested)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Returns the lower-case hex SHA-256 digest of a canonical value's JSON
/// text.
#[must_use]
pub fn hash_canonical(value: &Value) -> String {
    let digest = Sha256::digest(value.to_string().as_bytes());
    format!("{digest:x}")
}

/// Hashes a parameter object independently of its key order.
#[must_use]
pub fn hash_parameters(parameters: &Value) -> String {
    hash_canonical(&canonicalize(parameters))
}

/// Derives the cache key for one invocation.
#[must_use]
pub fn cache_key(server_id: &str, tool_name: &str, parameters: &Value) -> String {
    hash_canonical(&canonicalize(&json!({
        "serverId": server_id,
        "toolName": tool_name,
        "parameters": parameters,
    })))
}
