//! Canonical JSON hashing for idempotent admission.
//!
//! The canonical form sorts object keys recursively, drops a fixed set of
//! non-semantic fields (trace identifiers and the like), and serializes with
//! no insignificant whitespace before hashing with SHA-256.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Fields dropped from the canonical form regardless of nesting depth,
/// because they carry no semantic weight for idempotency comparison.
const NON_SEMANTIC_FIELDS: &[&str] = &["trace_id", "request_id"];

/// Computes the canonical payload hash used to detect idempotency-key reuse
/// with a divergent body: `(tenant_id, idempotency_key)` uniqueness plus
/// hash-matching replay.
pub fn payload_hash(value: &Value) -> String {
    let canon = canonicalize(value);
    let bytes = serde_json::to_vec(&canon).expect("canonical value always serializes");
    let digest = Sha256::digest(&bytes);
    hex::encode(digest)
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(String, Value)> = map
                .iter()
                .filter(|(k, _)| !NON_SEMANTIC_FIELDS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), canonicalize(v)))
                .collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            let mut out = serde_json::Map::new();
            for (k, v) in sorted {
                out.insert(k, v);
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_affect_hash() {
        let a = json!({"b": 1, "a": 2});
        let b = json!({"a": 2, "b": 1});
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn trace_id_is_excluded_from_the_hash() {
        let with_trace = json!({"pack_type": "x", "trace_id": "abc123"});
        let without_trace = json!({"pack_type": "x"});
        assert_eq!(payload_hash(&with_trace), payload_hash(&without_trace));
    }

    #[test]
    fn differing_semantic_content_changes_the_hash() {
        let a = json!({"pack_type": "x"});
        let b = json!({"pack_type": "y"});
        assert_ne!(payload_hash(&a), payload_hash(&b));
    }

    #[test]
    fn nested_trace_id_is_excluded_too() {
        let a = json!({"meta": {"trace_id": "1", "profile_version": "v1"}});
        let b = json!({"meta": {"trace_id": "2", "profile_version": "v1"}});
        assert_eq!(payload_hash(&a), payload_hash(&b));
    }
}
