//! `PreserveDownstreamFields` (§4.3): merges a desired (transformed) object
//! onto an existing downstream object, keeping server-managed fields that
//! the control plane must never clobber.

use serde_json::Value as Json;
use tmc_core::Object;

fn owner_ref_identity(v: &Json) -> Option<(String, String, String)> {
    let obj = v.as_object()?;
    Some((
        obj.get("apiVersion")?.as_str()?.to_string(),
        obj.get("kind")?.as_str()?.to_string(),
        obj.get("name")?.as_str()?.to_string(),
    ))
}

fn merge_owner_references(existing: &[Json], desired: &[Json]) -> Vec<Json> {
    let mut merged: Vec<Json> = Vec::new();
    let mut seen = std::collections::HashSet::new();
    // desired wins on collision, so insert desired first.
    for v in desired.iter().chain(existing.iter()) {
        let identity = owner_ref_identity(v);
        match identity {
            Some(id) => {
                if seen.insert(id) {
                    merged.push(v.clone());
                }
            }
            None => merged.push(v.clone()),
        }
    }
    merged
}

fn merge_finalizers(existing: &[Json], desired: &[Json]) -> Vec<Json> {
    let mut merged = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for v in desired.iter().chain(existing.iter()) {
        if let Some(s) = v.as_str() {
            if seen.insert(s.to_string()) {
                merged.push(v.clone());
            }
        }
    }
    merged
}

/// Merges `transformed` (desired) onto `existing`, restoring server-managed
/// fields per §4.3: resource-version, UID, creation-timestamp,
/// managed-field records, the `status` subtree, and the union of
/// finalizers and owner references; plus kind-specific fields (`Service`
/// keeps `spec.clusterIP`, `PersistentVolume` keeps `spec.claimRef`).
pub fn preserve_downstream_fields(existing: &Object, transformed: &Object) -> Object {
    let mut merged = transformed.deep_copy();

    for field in ["resourceVersion", "uid", "creationTimestamp"] {
        if let Some(v) = existing.nested_field(&["metadata", field]) {
            merged.set_nested(&["metadata", field], v.clone());
        }
    }
    if let Some(managed_fields) = existing.nested_field(&["metadata", "managedFields"]) {
        merged.set_nested(&["metadata", "managedFields"], managed_fields.clone());
    }
    if let Some(status) = existing.nested_field(&["status"]) {
        merged.set_nested(&["status"], status.clone());
    } else {
        merged.remove_nested(&["status"]);
    }

    let existing_finalizers = existing.nested_slice(&["metadata", "finalizers"]).unwrap_or(&[]);
    let desired_finalizers = merged.nested_slice(&["metadata", "finalizers"]).unwrap_or(&[]).to_vec();
    let finalizers = merge_finalizers(existing_finalizers, &desired_finalizers);
    if !finalizers.is_empty() {
        merged.set_nested(&["metadata", "finalizers"], Json::Array(finalizers));
    }

    let existing_owners = existing.nested_slice(&["metadata", "ownerReferences"]).unwrap_or(&[]);
    let desired_owners = merged.nested_slice(&["metadata", "ownerReferences"]).unwrap_or(&[]).to_vec();
    let owners = merge_owner_references(existing_owners, &desired_owners);
    if !owners.is_empty() {
        merged.set_nested(&["metadata", "ownerReferences"], Json::Array(owners));
    }

    match transformed.nested_string(&["kind"]) {
        Some("Service") => {
            if let Some(cluster_ip) = existing.nested_field(&["spec", "clusterIP"]) {
                merged.set_nested(&["spec", "clusterIP"], cluster_ip.clone());
            }
        }
        Some("PersistentVolume") => {
            if let Some(claim_ref) = existing.nested_field(&["spec", "claimRef"]) {
                merged.set_nested(&["spec", "claimRef"], claim_ref.clone());
            }
        }
        _ => {}
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn obj(v: serde_json::Value) -> Object {
        Object::from_json(v).unwrap()
    }

    #[test]
    fn s2_preserves_identity_and_status_applies_spec() {
        let existing = obj(json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "resourceVersion": "12345", "uid": "u-1"},
            "spec": {"replicas": 3},
            "status": {"phase": "Running"}
        }));
        let desired = obj(json!({
            "kind": "Deployment",
            "metadata": {"name": "web"},
            "spec": {"replicas": 5}
        }));
        let merged = preserve_downstream_fields(&existing, &desired);
        assert_eq!(merged.nested_string(&["metadata", "resourceVersion"]), Some("12345"));
        assert_eq!(merged.nested_string(&["metadata", "uid"]), Some("u-1"));
        assert_eq!(merged.nested_string(&["status", "phase"]), Some("Running"));
        assert_eq!(merged.nested_i64(&["spec", "replicas"]), Some(5));
    }

    #[test]
    fn service_preserves_cluster_ip() {
        let existing = obj(json!({
            "kind": "Service",
            "metadata": {"name": "svc"},
            "spec": {"clusterIP": "10.0.0.5", "ports": []}
        }));
        let desired = obj(json!({
            "kind": "Service",
            "metadata": {"name": "svc"},
            "spec": {"ports": [{"port": 80}]}
        }));
        let merged = preserve_downstream_fields(&existing, &desired);
        assert_eq!(merged.nested_string(&["spec", "clusterIP"]), Some("10.0.0.5"));
    }

    #[test]
    fn finalizers_are_unioned_and_deduped() {
        let existing = obj(json!({
            "metadata": {"name": "x", "finalizers": ["a", "b"]}
        }));
        let desired = obj(json!({
            "metadata": {"name": "x", "finalizers": ["b", "c"]}
        }));
        let merged = preserve_downstream_fields(&existing, &desired);
        let finalizers: Vec<&str> =
            merged.nested_slice(&["metadata", "finalizers"]).unwrap().iter().map(|v| v.as_str().unwrap()).collect();
        assert_eq!(finalizers.len(), 3);
        assert!(finalizers.contains(&"a"));
        assert!(finalizers.contains(&"b"));
        assert!(finalizers.contains(&"c"));
    }

    #[test]
    fn owner_references_merge_desired_wins_on_collision() {
        let existing = obj(json!({
            "metadata": {"name": "x", "ownerReferences": [
                {"apiVersion": "v1", "kind": "ConfigMap", "name": "cm", "controller": false}
            ]}
        }));
        let desired = obj(json!({
            "metadata": {"name": "x", "ownerReferences": [
                {"apiVersion": "v1", "kind": "ConfigMap", "name": "cm", "controller": true}
            ]}
        }));
        let merged = preserve_downstream_fields(&existing, &desired);
        let owners = merged.nested_slice(&["metadata", "ownerReferences"]).unwrap();
        assert_eq!(owners.len(), 1);
        assert_eq!(owners[0].get("controller").unwrap().as_bool(), Some(true));
    }
}
