//! Canonical JSON + sha256 hashing, carried from the teacher's
//! `chem-core::hashing` module. Here it keys the freshness gate's
//! `(client_id, query)` cache rather than fingerprinting artifacts.

use serde_json::Value;
use sha2::{Digest, Sha256};

pub fn to_canonical_json(v: &Value) -> String {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().collect();
            keys.sort();
            let inner: Vec<String> = keys.into_iter().map(|k| format!("\"{}\":{}", k, to_canonical_json(&map[k]))).collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(to_canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        _ => v.to_string(),
    }
}

pub fn hash_str(s: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable key for the `(client_id, query)` freshness-gate cache.
pub fn freshness_key(client_id: &str, query: &str) -> String {
    hash_str(&format!("{client_id}\u{0}{query}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_json_orders_keys() {
        let a = serde_json::json!({"b": 1, "a": 2});
        let b = serde_json::json!({"a": 2, "b": 1});
        assert_eq!(to_canonical_json(&a), to_canonical_json(&b));
    }

    #[test]
    fn freshness_key_distinguishes_client_and_query() {
        let k1 = freshness_key("db1", "SELECT 1");
        let k2 = freshness_key("db2", "SELECT 1");
        assert_ne!(k1, k2);
    }
}
