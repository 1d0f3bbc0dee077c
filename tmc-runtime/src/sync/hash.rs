//! Content hashing for change detection (§4.3: "Content hash for change
//! detection"). Deep-copies the object, strips transient fields, serializes
//! deterministically (sorted map keys — `serde_json::Map` with the
//! `preserve_order` feature disabled already sorts keys), and hashes with
//! SHA-256.

use sha2::{Digest, Sha256};
use tmc_core::Object;

/// Strips `metadata.resourceVersion`, `metadata.generation`,
/// `metadata.managedFields` and the entire `status` subtree from a copy of
/// `obj`, then returns its SHA-256 hex digest.
pub fn content_hash(obj: &Object) -> String {
    let mut copy = obj.deep_copy();
    copy.remove_nested(&["metadata", "resourceVersion"]);
    copy.remove_nested(&["metadata", "generation"]);
    copy.remove_nested(&["metadata", "managedFields"]);
    copy.remove_nested(&["status"]);
    // serde_json's default `Map` is a `BTreeMap` unless `preserve_order` is
    // enabled, so this serialization already has deterministic key order.
    let bytes = serde_json::to_vec(&copy).expect("Object serializes infallibly");
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strips_transient_fields_before_hashing() {
        let a = Object::from_json(json!({
            "metadata": {"name": "web", "resourceVersion": "1", "generation": 1},
            "spec": {"replicas": 3},
            "status": {"phase": "Running"}
        }))
        .unwrap();
        let b = Object::from_json(json!({
            "metadata": {"name": "web", "resourceVersion": "999", "generation": 7},
            "spec": {"replicas": 3},
            "status": {"phase": "Failed"}
        }))
        .unwrap();
        assert_eq!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn spec_change_changes_hash() {
        let a = Object::from_json(json!({"metadata": {"name": "web"}, "spec": {"replicas": 3}})).unwrap();
        let b = Object::from_json(json!({"metadata": {"name": "web"}, "spec": {"replicas": 5}})).unwrap();
        assert_ne!(content_hash(&a), content_hash(&b));
    }

    #[test]
    fn hash_is_non_empty_hex() {
        let a = Object::default();
        let h = content_hash(&a);
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
