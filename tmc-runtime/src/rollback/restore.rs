//! Restoration Manager (part of C9, §4.9): replays a snapshot's resources
//! back onto the downstream cluster in kind-dependency order.

use std::collections::HashMap;
use std::sync::Arc;
use tmc_core::client::{DynamicResourceClient, Gvr};
use tmc_core::error::Error;
use tmc_core::model::{DeploymentSnapshot, RestoredResource, RestoredStatus};
use tmc_core::value::Object;

fn ingress_gvr() -> Gvr {
    Gvr::new("networking.k8s.io", "v1", "ingresses")
}

/// Kind ordering restoration follows: dependencies before dependents.
const KIND_ORDER: &[&str] = &["ConfigMap", "Secret", "Service", "Deployment"];

fn kind_rank(kind: &str) -> usize {
    KIND_ORDER.iter().position(|k| *k == kind).unwrap_or(KIND_ORDER.len())
}

fn gvr_for_kind(kind: &str) -> Gvr {
    match kind {
        "Deployment" => Gvr::new("apps", "v1", "deployments"),
        "Service" => Gvr::new("", "v1", "services"),
        "ConfigMap" => Gvr::new("", "v1", "configmaps"),
        "Secret" => Gvr::new("", "v1", "secrets"),
        other => Gvr::new("", "v1", &other.to_lowercase()),
    }
}

/// Strips fields a restored manifest must not re-apply (§4.9): resource
/// version, uid, selfLink, generation, managed fields, creation
/// timestamp, and status.
fn strip_system_metadata(mut obj: Object) -> Object {
    obj.remove_nested(&["metadata", "resourceVersion"]);
    obj.remove_nested(&["metadata", "uid"]);
    obj.remove_nested(&["metadata", "selfLink"]);
    obj.remove_nested(&["metadata", "generation"]);
    obj.remove_nested(&["metadata", "managedFields"]);
    obj.remove_nested(&["metadata", "creationTimestamp"]);
    obj.remove_nested(&["status"]);
    obj
}

/// Replays a [`DeploymentSnapshot`]'s captured resources onto the
/// downstream cluster.
pub struct RestorationManager<C: DynamicResourceClient> {
    client: Arc<C>,
}

impl<C: DynamicResourceClient> RestorationManager<C> {
    pub fn new(client: Arc<C>) -> Self {
        RestorationManager { client }
    }

    /// Restores every resource in `snapshot`, ordered `ConfigMap` →
    /// `Secret` → `Service` → `Deployment` → others (§4.9). In `dry_run`
    /// mode, nothing is mutated and every resource is reported `Skipped`.
    /// If `restore_traffic` is set, service selectors and ingress rules
    /// captured in `snapshot.traffic` are re-asserted after the ordered
    /// resources restore. Any corresponding `{name}-canary`
    /// Deployment/Service is deleted as cleanup once restoration completes.
    pub async fn restore_from_snapshot(
        &self,
        snapshot: &DeploymentSnapshot,
        dry_run: bool,
        restore_traffic: bool,
    ) -> Result<Vec<RestoredResource>, Error> {
        let mut ordered = snapshot.resources.clone();
        ordered.sort_by_key(|r| kind_rank(&r.kind));

        let mut results = Vec::with_capacity(ordered.len());
        for resource in &ordered {
            if dry_run {
                results.push(RestoredResource {
                    kind: resource.kind.clone(),
                    name: resource.name.clone(),
                    status: RestoredStatus::Skipped,
                    message: "dry run".to_string(),
                });
                continue;
            }

            let Some(desired) = Object::from_json(resource.raw.clone()) else {
                results.push(RestoredResource {
                    kind: resource.kind.clone(),
                    name: resource.name.clone(),
                    status: RestoredStatus::Failed,
                    message: "captured resource was not a JSON object".to_string(),
                });
                continue;
            };
            let desired = strip_system_metadata(desired);
            let gvr = gvr_for_kind(&resource.kind);

            let outcome = self.restore_one(&gvr, &resource.namespace, &resource.name, desired).await;
            results.push(match outcome {
                Ok(()) => RestoredResource { kind: resource.kind.clone(), name: resource.name.clone(), status: RestoredStatus::Restored, message: String::new() },
                Err(err) => RestoredResource { kind: resource.kind.clone(), name: resource.name.clone(), status: RestoredStatus::Failed, message: err.to_string() },
            });
        }

        if !dry_run && restore_traffic {
            results.extend(self.reassert_traffic(snapshot).await);
        }

        if !dry_run {
            self.cleanup_canary(&snapshot.target.namespace, &snapshot.target.name).await;
        }

        Ok(results)
    }

    /// Re-asserts the service selectors and ingress rules captured in
    /// `snapshot.traffic` (§4.9: "Traffic restoration ... re-asserts
    /// service selectors and ingress rules").
    async fn reassert_traffic(&self, snapshot: &DeploymentSnapshot) -> Vec<RestoredResource> {
        let namespace = &snapshot.target.namespace;
        let mut results = Vec::new();

        for (service_name, selector) in &snapshot.traffic.service_selectors {
            let outcome = self.reassert_selector(namespace, service_name, selector).await;
            results.push(match outcome {
                Ok(()) => RestoredResource { kind: "Service".to_string(), name: service_name.clone(), status: RestoredStatus::Restored, message: "traffic selector reasserted".to_string() },
                Err(err) => RestoredResource { kind: "Service".to_string(), name: service_name.clone(), status: RestoredStatus::Failed, message: err.to_string() },
            });
        }

        for (ingress_name, rule) in &snapshot.traffic.ingress_rules {
            let outcome = self.reassert_ingress_rule(namespace, ingress_name, rule).await;
            results.push(match outcome {
                Ok(()) => RestoredResource { kind: "Ingress".to_string(), name: ingress_name.clone(), status: RestoredStatus::Restored, message: "traffic rule reasserted".to_string() },
                Err(err) => RestoredResource { kind: "Ingress".to_string(), name: ingress_name.clone(), status: RestoredStatus::Failed, message: err.to_string() },
            });
        }

        results
    }

    async fn reassert_selector(&self, namespace: &str, name: &str, selector: &HashMap<String, String>) -> Result<(), Error> {
        let gvr = gvr_for_kind("Service");
        let mut existing = self.client.get(&gvr, namespace, name).await.map_err(|e| e.into_core_error())?;
        existing.set_nested(&["spec", "selector"], serde_json::to_value(selector).unwrap_or_default());
        self.client.update(&gvr, namespace, existing).await.map_err(|e| e.into_core_error())?;
        Ok(())
    }

    async fn reassert_ingress_rule(&self, namespace: &str, name: &str, rule: &serde_json::Value) -> Result<(), Error> {
        let gvr = ingress_gvr();
        let mut existing = self.client.get(&gvr, namespace, name).await.map_err(|e| e.into_core_error())?;
        existing.set_nested(&["spec", "rules"], rule.clone());
        self.client.update(&gvr, namespace, existing).await.map_err(|e| e.into_core_error())?;
        Ok(())
    }

    async fn restore_one(&self, gvr: &Gvr, namespace: &str, name: &str, desired: Object) -> Result<(), Error> {
        match self.client.get(gvr, namespace, name).await {
            Ok(existing) => {
                let mut updated = desired;
                if let Some(rv) = existing.nested_field(&["metadata", "resourceVersion"]).cloned() {
                    updated.set_nested(&["metadata", "resourceVersion"], rv);
                }
                self.client.update(gvr, namespace, updated).await.map_err(|e| e.into_core_error())?;
            }
            Err(tmc_core::client::ClientError::NotFound(_)) => {
                self.client.create(gvr, namespace, desired).await.map_err(|e| e.into_core_error())?;
            }
            Err(err) => return Err(err.into_core_error()),
        }
        Ok(())
    }

    async fn cleanup_canary(&self, namespace: &str, base_name: &str) {
        use tmc_core::client::PropagationPolicy;
        let canary_name = format!("{base_name}-canary");
        for gvr in [Gvr::new("apps", "v1", "deployments"), Gvr::new("", "v1", "services")] {
            let _ = self.client.delete(&gvr, namespace, &canary_name, PropagationPolicy::Background).await;
        }
    }
}
