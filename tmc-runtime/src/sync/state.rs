//! Per-key [`ResourceState`] cache owned by the syncer for its lifetime
//! (§3 Ownership), guarded by a single reader/writer lock (§5).

use super::hash::content_hash;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use tmc_core::model::ResourceState;
use tmc_core::{Gvr, Object};

/// Builds the syncer's internal state-key: `"{gvr}/{namespace}/{name}"` (§4.3).
pub fn state_key(gvr: &Gvr, namespace: &str, name: &str) -> String {
    format!("{gvr}/{namespace}/{name}")
}

/// Thread-safe cache of [`ResourceState`], keyed by [`state_key`].
#[derive(Default)]
pub struct StateCache {
    entries: RwLock<HashMap<String, ResourceState>>,
}

impl StateCache {
    /// An empty cache.
    pub fn new() -> Self {
        StateCache::default()
    }

    /// Records (or refreshes) state for `obj` after a successful sync.
    pub fn record(&self, gvr: &Gvr, namespace: &str, name: &str, obj: &Object) {
        let entry = ResourceState {
            gvr: gvr.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            last_resource_version: obj
                .nested_string(&["metadata", "resourceVersion"])
                .unwrap_or_default()
                .to_string(),
            generation: obj.nested_i64(&["metadata", "generation"]).unwrap_or_default(),
            last_sync_time: Utc::now(),
            content_hash: content_hash(obj),
            conflict_counter: 0,
            last_conflict_time: None,
        };
        self.entries.write().insert(state_key(gvr, namespace, name), entry);
    }

    /// Increments the conflict counter for a key, creating a bare entry if
    /// none exists yet (e.g. the first attempt conflicted before any
    /// successful sync was recorded).
    pub fn record_conflict(&self, gvr: &Gvr, namespace: &str, name: &str) {
        let key = state_key(gvr, namespace, name);
        let mut entries = self.entries.write();
        let entry = entries.entry(key).or_insert_with(|| ResourceState {
            gvr: gvr.clone(),
            namespace: namespace.to_string(),
            name: name.to_string(),
            last_resource_version: String::new(),
            generation: 0,
            last_sync_time: Utc::now(),
            content_hash: String::new(),
            conflict_counter: 0,
            last_conflict_time: None,
        });
        entry.conflict_counter += 1;
        entry.last_conflict_time = Some(Utc::now());
    }

    /// Returns a clone of the cached state for a key, if present.
    pub fn get(&self, gvr: &Gvr, namespace: &str, name: &str) -> Option<ResourceState> {
        self.entries.read().get(&state_key(gvr, namespace, name)).cloned()
    }

    /// Evicts a key (e.g. after a successful delete).
    pub fn evict(&self, gvr: &Gvr, namespace: &str, name: &str) {
        self.entries.write().remove(&state_key(gvr, namespace, name));
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn record_and_get_and_evict() {
        let cache = StateCache::new();
        let gvr = Gvr::new("apps", "v1", "deployments");
        let obj = Object::from_json(json!({
            "metadata": {"name": "web", "namespace": "default", "resourceVersion": "5"}
        }))
        .unwrap();
        cache.record(&gvr, "default", "web", &obj);
        let state = cache.get(&gvr, "default", "web").unwrap();
        assert_eq!(state.name, "web");
        assert_eq!(state.last_resource_version, "5");
        assert!(!state.content_hash.is_empty());
        cache.evict(&gvr, "default", "web");
        assert!(cache.get(&gvr, "default", "web").is_none());
    }

    #[test]
    fn conflict_counter_increments() {
        let cache = StateCache::new();
        let gvr = Gvr::new("apps", "v1", "deployments");
        cache.record_conflict(&gvr, "default", "web");
        cache.record_conflict(&gvr, "default", "web");
        let state = cache.get(&gvr, "default", "web").unwrap();
        assert_eq!(state.conflict_counter, 2);
        assert!(state.last_conflict_time.is_some());
    }
}
