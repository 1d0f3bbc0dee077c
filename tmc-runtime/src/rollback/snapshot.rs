//! Snapshot Manager (C9.1, §4.9): captures a deployment plus its
//! selector-matched services and configmaps into a [`DeploymentSnapshot`].

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tmc_core::client::{DynamicResourceClient, Gvr};
use tmc_core::error::Error;
use tmc_core::model::{DeploymentRef, DeploymentSnapshot, RawResource, TrafficConfiguration};
use tmc_core::value::Object;

const DEPLOYMENTS: &str = "deployments";
const SERVICES: &str = "services";
const CONFIGMAPS: &str = "configmaps";

fn deployment_gvr() -> Gvr {
    Gvr::new("apps", "v1", DEPLOYMENTS)
}
fn service_gvr() -> Gvr {
    Gvr::new("", "v1", SERVICES)
}
fn configmap_gvr() -> Gvr {
    Gvr::new("", "v1", CONFIGMAPS)
}

/// Pluggable snapshot persistence: a storage seam so the default
/// in-memory backend can be swapped for a durable one without touching
/// callers.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn put(&self, snapshot: DeploymentSnapshot) -> Result<(), Error>;
    async fn get(&self, id: &str) -> Result<Option<DeploymentSnapshot>, Error>;
    async fn list(&self, target: &DeploymentRef) -> Result<Vec<DeploymentSnapshot>, Error>;
    async fn delete(&self, id: &str) -> Result<(), Error>;
}

/// An in-process [`SnapshotStore`]; the default backend until a durable
/// one is wired in.
#[derive(Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, DeploymentSnapshot>>,
}

impl InMemorySnapshotStore {
    pub fn new() -> Self {
        InMemorySnapshotStore::default()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn put(&self, snapshot: DeploymentSnapshot) -> Result<(), Error> {
        self.snapshots.write().insert(snapshot.id.clone(), snapshot);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<DeploymentSnapshot>, Error> {
        Ok(self.snapshots.read().get(id).cloned())
    }

    async fn list(&self, target: &DeploymentRef) -> Result<Vec<DeploymentSnapshot>, Error> {
        Ok(self
            .snapshots
            .read()
            .values()
            .filter(|s| s.target.namespace == target.namespace && s.target.name == target.name)
            .cloned()
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<(), Error> {
        self.snapshots.write().remove(id);
        Ok(())
    }
}

/// Default retention policy: at most 10 snapshots per deployment, none
/// older than 30 days.
pub struct RetentionPolicy {
    pub max_snapshots: usize,
    pub retention_duration: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy { max_snapshots: 10, retention_duration: Duration::from_secs(30 * 24 * 3600) }
    }
}

/// Creates and expires [`DeploymentSnapshot`]s (C9.1).
pub struct SnapshotManager<C: DynamicResourceClient> {
    client: Arc<C>,
    store: Arc<dyn SnapshotStore>,
    retention: RetentionPolicy,
}

impl<C: DynamicResourceClient> SnapshotManager<C> {
    pub fn new(client: Arc<C>, store: Arc<dyn SnapshotStore>, retention: RetentionPolicy) -> Self {
        SnapshotManager { client, store, retention }
    }

    /// The underlying snapshot store, for callers (e.g. the rollback
    /// engine) that need direct lookup during validation.
    pub fn store(&self) -> &Arc<dyn SnapshotStore> {
        &self.store
    }

    /// The underlying cluster client, for callers that need direct reads
    /// outside of snapshot creation (e.g. polling for readiness).
    pub fn client(&self) -> &Arc<C> {
        &self.client
    }

    /// Captures `target`'s deployment, selector-matched services, and
    /// selector-matched configmaps (in that order, §4.9 C9.1).
    pub async fn create_snapshot(&self, target: DeploymentRef, version: &str) -> Result<DeploymentSnapshot, Error> {
        let deployment = self
            .client
            .get(&deployment_gvr(), &target.namespace, &target.name)
            .await
            .map_err(|e| e.into_core_error())?;

        let selector = deployment
            .nested_map(&["spec", "selector", "matchLabels"])
            .cloned()
            .unwrap_or_default();

        let mut resources = vec![RawResource {
            kind: "Deployment".to_string(),
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            raw: deployment.clone().into_json(),
        }];

        let mut service_selectors = HashMap::new();
        for svc in self.client.list(&service_gvr(), &target.namespace).await.map_err(|e| e.into_core_error())? {
            if !object_matches_selector(&svc, &selector) {
                continue;
            }
            let name = svc.name().unwrap_or_default().to_string();
            let svc_selector = svc
                .nested_map(&["spec", "selector"])
                .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
                .unwrap_or_default();
            service_selectors.insert(name.clone(), svc_selector);
            resources.push(RawResource { kind: "Service".to_string(), namespace: target.namespace.clone(), name, raw: svc.into_json() });
        }

        for cm in self.client.list(&configmap_gvr(), &target.namespace).await.map_err(|e| e.into_core_error())? {
            if !object_matches_selector(&cm, &selector) {
                continue;
            }
            let name = cm.name().unwrap_or_default().to_string();
            resources.push(RawResource { kind: "ConfigMap".to_string(), namespace: target.namespace.clone(), name, raw: cm.into_json() });
        }

        let configuration = extract_configuration(&deployment, &resources);
        let config_hash = calculate_config_hash(&configuration);

        let id = format!(
            "snap-{}",
            &hex::encode(Sha256::digest(
                format!("{}{}{}{}", target.namespace, target.name, version, chrono_unix_seconds()).as_bytes()
            ))[..8]
        );

        let labels = deployment
            .nested_map(&["metadata", "labels"])
            .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
            .unwrap_or_default();
        let annotations = deployment
            .nested_map(&["metadata", "annotations"])
            .map(|m| m.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
            .unwrap_or_default();

        let snapshot = DeploymentSnapshot {
            id,
            version: version.to_string(),
            created_at: chrono::Utc::now(),
            target,
            resources,
            configuration,
            traffic: TrafficConfiguration { service_selectors, ingress_rules: HashMap::new(), weights: HashMap::new() },
            config_hash,
            labels,
            annotations,
        };

        self.store.put(snapshot.clone()).await?;
        Ok(snapshot)
    }

    /// Validates an existing snapshot's internal invariants (§8 invariant 3).
    pub fn validate_snapshot(snapshot: &DeploymentSnapshot) -> Result<(), Error> {
        if snapshot.id.is_empty() {
            return Err(Error::invalid_input("snapshot id must not be empty"));
        }
        if snapshot.resources.is_empty() {
            return Err(Error::invalid_input("snapshot must contain at least one resource"));
        }
        if snapshot.resources.iter().any(|r| r.raw.is_null()) {
            return Err(Error::invalid_input("snapshot resource raw data must not be null"));
        }
        let expected = calculate_config_hash(&snapshot.configuration);
        if expected != snapshot.config_hash {
            return Err(Error::fatal(format!(
                "snapshot config hash mismatch: stored {} computed {expected}",
                snapshot.config_hash
            )));
        }
        Ok(())
    }

    /// Deletes snapshots beyond `max_snapshots` (newest-first) and any
    /// older than `retention_duration` (§4.9 C9.1).
    pub async fn cleanup_expired_snapshots(&self, target: &DeploymentRef) -> Result<usize, Error> {
        let mut snapshots = self.store.list(target).await?;
        snapshots.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let now = chrono::Utc::now();
        let mut removed = 0;
        for (idx, snapshot) in snapshots.iter().enumerate() {
            let age = now.signed_duration_since(snapshot.created_at);
            let too_old = age.to_std().map(|d| d > self.retention.retention_duration).unwrap_or(false);
            if idx >= self.retention.max_snapshots || too_old {
                self.store.delete(&snapshot.id).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn object_matches_selector(obj: &Object, selector: &serde_json::Map<String, serde_json::Value>) -> bool {
    if selector.is_empty() {
        return false;
    }
    let labels = obj.nested_map(&["metadata", "labels"]);
    selector.iter().all(|(k, v)| labels.and_then(|l| l.get(k)) == Some(v))
}

fn extract_configuration(deployment: &Object, resources: &[RawResource]) -> HashMap<String, String> {
    let mut configuration = HashMap::new();
    if let Some(replicas) = deployment.nested_i64(&["spec", "replicas"]) {
        configuration.insert("deployment.replicas".to_string(), replicas.to_string());
    }
    if let Some(image) = deployment
        .nested_slice(&["spec", "template", "spec", "containers"])
        .and_then(|c| c.first())
        .and_then(|c| c.get("image"))
        .and_then(|v| v.as_str())
    {
        configuration.insert("deployment.image".to_string(), image.to_string());
    }

    for res in resources {
        match res.kind.as_str() {
            "Service" => {
                if let Some(ty) = res.raw.get("spec").and_then(|s| s.get("type")).and_then(|t| t.as_str()) {
                    configuration.insert(format!("service.{}.type", res.name), ty.to_string());
                }
            }
            "ConfigMap" => {
                if let Some(data) = res.raw.get("data").and_then(|d| d.as_object()) {
                    for key in data.keys() {
                        configuration.insert(format!("configmap.{}.{}", res.name, key), "present".to_string());
                    }
                }
            }
            _ => {}
        }
    }
    configuration
}

fn calculate_config_hash(configuration: &HashMap<String, String>) -> String {
    let mut keys: Vec<&String> = configuration.keys().collect();
    keys.sort();
    let joined: String = keys.iter().map(|k| format!("{k}={};", configuration[*k])).collect();
    hex::encode(Sha256::digest(joined.as_bytes()))
}

fn chrono_unix_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmc_core::model::DeploymentRef;
    use tmc_test::{deployment_fixture, MockClient};

    #[tokio::test]
    async fn create_snapshot_captures_deployment_and_passes_validation() {
        let client = Arc::new(MockClient::new());
        client.seed(&deployment_gvr(), "default", "web", deployment_fixture("default", "web", 3));
        let store: Arc<dyn SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let manager = SnapshotManager::new(client, store, RetentionPolicy::default());

        let target = DeploymentRef { namespace: "default".to_string(), name: "web".to_string() };
        let snapshot = manager.create_snapshot(target, "v1").await.unwrap();

        assert!(snapshot.id.starts_with("snap-"));
        assert_eq!(snapshot.resources.len(), 1);
        SnapshotManager::<MockClient>::validate_snapshot(&snapshot).unwrap();
    }

    #[test]
    fn validate_snapshot_rejects_empty_resources() {
        let snapshot = DeploymentSnapshot {
            id: "snap-aaaaaaaa".to_string(),
            version: "v1".to_string(),
            created_at: chrono::Utc::now(),
            target: DeploymentRef { namespace: "default".to_string(), name: "web".to_string() },
            resources: Vec::new(),
            configuration: HashMap::new(),
            traffic: TrafficConfiguration { service_selectors: HashMap::new(), ingress_rules: HashMap::new(), weights: HashMap::new() },
            config_hash: calculate_config_hash(&HashMap::new()),
            labels: HashMap::new(),
            annotations: HashMap::new(),
        };
        assert!(SnapshotManager::<MockClient>::validate_snapshot(&snapshot).is_err());
    }

    #[test]
    fn validate_snapshot_rejects_hash_mismatch() {
        let mut configuration = HashMap::new();
        configuration.insert("deployment.replicas".to_string(), "3".to_string());
        let snapshot = DeploymentSnapshot {
            id: "snap-aaaaaaaa".to_string(),
            version: "v1".to_string(),
            created_at: chrono::Utc::now(),
            target: DeploymentRef { namespace: "default".to_string(), name: "web".to_string() },
            resources: vec![RawResource { kind: "Deployment".to_string(), namespace: "default".to_string(), name: "web".to_string(), raw: serde_json::json!({}) }],
            configuration,
            traffic: TrafficConfiguration { service_selectors: HashMap::new(), ingress_rules: HashMap::new(), weights: HashMap::new() },
            config_hash: "deadbeef".to_string(),
            labels: HashMap::new(),
            annotations: HashMap::new(),
        };
        assert!(SnapshotManager::<MockClient>::validate_snapshot(&snapshot).is_err());
    }

    #[tokio::test]
    async fn cleanup_expired_snapshots_keeps_only_max() {
        let store = InMemorySnapshotStore::new();
        let target = DeploymentRef { namespace: "default".to_string(), name: "web".to_string() };
        for i in 0..5 {
            let snapshot = DeploymentSnapshot {
                id: format!("snap-{i:08}"),
                version: "v1".to_string(),
                created_at: chrono::Utc::now() - chrono::Duration::seconds(i),
                target: target.clone(),
                resources: vec![RawResource { kind: "Deployment".to_string(), namespace: "default".to_string(), name: "web".to_string(), raw: serde_json::json!({"a":1}) }],
                configuration: HashMap::new(),
                traffic: TrafficConfiguration { service_selectors: HashMap::new(), ingress_rules: HashMap::new(), weights: HashMap::new() },
                config_hash: calculate_config_hash(&HashMap::new()),
                labels: HashMap::new(),
                annotations: HashMap::new(),
            };
            store.put(snapshot).await.unwrap();
        }
        let store: Arc<dyn SnapshotStore> = Arc::new(store);
        let client = Arc::new(MockClient::new());
        let manager = SnapshotManager::new(client, store.clone(), RetentionPolicy { max_snapshots: 2, retention_duration: Duration::from_secs(3600) });
        let removed = manager.cleanup_expired_snapshots(&target).await.unwrap();
        assert_eq!(removed, 3);
        assert_eq!(store.list(&target).await.unwrap().len(), 2);
    }
}
