//! Upstream mirror (C4, §4.4): reverse sync with an RV-watermark
//! annotation and a three-phase create/update-status/update-spec dance.

use serde_json::Value as Json;
use std::sync::Arc;
use tmc_core::client::{ClientError, PropagationPolicy};
use tmc_core::constants::{syncer_finalizer, ANNOTATION_RV};
use tmc_core::error::Error;
use tmc_core::{DynamicResourceClient, Gvr, Object};
use tracing::{debug, instrument};

/// Well-known annotation the downstream syncer sets to mark which logical
/// workspace an object was synced from; stripped during upstream prep.
const NAMESPACE_LOCATOR_ANNOTATION: &str = "kcp.io/namespace-locator";
/// Internal label naming which physical cluster an object lives on;
/// stripped during upstream prep since it's meaningless in the workspace.
const DOWNSTREAM_CLUSTER_LABEL: &str = "internal.kcp.io/cluster";

/// Outcome of a single [`UpstreamMirror::reconcile`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MirrorOutcome {
    /// The downstream object is gone; the upstream mirror was deleted.
    DownstreamAbsentDeletedUpstream,
    /// The upstream mirror did not exist and was created (single-step).
    CreatedClean,
    /// The upstream mirror did not exist and was created via the
    /// three-phase dirty-status dance.
    CreatedThreePhase,
    /// The upstream mirror existed and was updated (single-step).
    UpdatedClean,
    /// The upstream mirror existed and was updated via the three-phase
    /// dirty-status dance.
    UpdatedThreePhase,
    /// RV watermark already matches; nothing to do.
    UpToDate,
    /// Downstream is marked for deletion; re-queue and propagate delete.
    DownstreamDeleting,
}

/// Strips namespace-locator/cluster-label/identity fields from a
/// downstream object and installs the syncer's well-known finalizer,
/// preparing it to be pushed upstream (§4.4).
pub fn prepare_for_upstream(downstream: &Object, sync_target_key: &str) -> Object {
    let mut obj = downstream.deep_copy();
    obj.remove_nested(&["metadata", "annotations", NAMESPACE_LOCATOR_ANNOTATION]);
    obj.remove_nested(&["metadata", "labels", DOWNSTREAM_CLUSTER_LABEL]);
    obj.remove_nested(&["metadata", "uid"]);
    obj.remove_nested(&["metadata", "resourceVersion"]);
    obj.remove_nested(&["metadata", "managedFields"]);
    obj.remove_nested(&["metadata", "deletionTimestamp"]);
    obj.remove_nested(&["metadata", "deletionGracePeriodSeconds"]);
    obj.remove_nested(&["metadata", "ownerReferences"]);

    let finalizer = syncer_finalizer(sync_target_key);
    let mut finalizers: Vec<Json> =
        obj.nested_slice(&["metadata", "finalizers"]).map(<[Json]>::to_vec).unwrap_or_default();
    if !finalizers.iter().any(|f| f.as_str() == Some(finalizer.as_str())) {
        finalizers.push(Json::String(finalizer));
    }
    obj.set_nested(&["metadata", "finalizers"], Json::Array(finalizers));
    obj
}

/// Reverse syncer: mirrors downstream (physical) objects into an upstream
/// (logical workspace) location, tracking drift via [`ANNOTATION_RV`].
pub struct UpstreamMirror<D: DynamicResourceClient, U: DynamicResourceClient> {
    downstream: Arc<D>,
    upstream: Arc<U>,
}

impl<D: DynamicResourceClient, U: DynamicResourceClient> UpstreamMirror<D, U> {
    /// Builds a mirror reading downstream objects from `downstream` and
    /// writing upstream mirrors via `upstream`.
    pub fn new(downstream: Arc<D>, upstream: Arc<U>) -> Self {
        UpstreamMirror { downstream, upstream }
    }

    /// Reconciles one upstream mirror of a downstream object (§4.4).
    /// `dirty_status` indicates whether the downstream object's status
    /// has changed since it was last mirrored (forcing the three-phase
    /// dance so the status update lands under the old RV annotation).
    #[instrument(skip(self), fields(gvr = %gvr))]
    pub async fn reconcile(
        &self,
        gvr: &Gvr,
        downstream_namespace: &str,
        downstream_name: &str,
        upstream_namespace: &str,
        upstream_name: &str,
        sync_target_key: &str,
        dirty_status: bool,
    ) -> Result<MirrorOutcome, Error> {
        let downstream_obj = match self.downstream.get(gvr, downstream_namespace, downstream_name).await {
            Ok(obj) => obj,
            Err(ClientError::NotFound(_)) => {
                return self.force_delete_upstream(gvr, upstream_namespace, upstream_name).await;
            }
            Err(other) => return Err(other.into_core_error()),
        };

        if downstream_obj.nested_field(&["metadata", "deletionTimestamp"]).is_some() {
            debug!("downstream marked for deletion, re-queue and propagate delete");
            return Ok(MirrorOutcome::DownstreamDeleting);
        }

        let downstream_rv = downstream_obj.nested_string(&["metadata", "resourceVersion"]).unwrap_or_default();
        let prepared = prepare_for_upstream(&downstream_obj, sync_target_key);

        match self.upstream.get(gvr, upstream_namespace, upstream_name).await {
            Err(ClientError::NotFound(_)) => {
                if !dirty_status {
                    let mut to_create = prepared;
                    to_create.set_annotation(ANNOTATION_RV, downstream_rv);
                    self.upstream
                        .create(gvr, upstream_namespace, to_create)
                        .await
                        .map_err(ClientError::into_core_error)?;
                    Ok(MirrorOutcome::CreatedClean)
                } else {
                    let created = self
                        .upstream
                        .create(gvr, upstream_namespace, prepared)
                        .await
                        .map_err(ClientError::into_core_error)?;
                    let mut with_status = created.deep_copy();
                    if let Some(status) = downstream_obj.nested_field(&["status"]) {
                        with_status.set_nested(&["status"], status.clone());
                    }
                    let after_status = self
                        .upstream
                        .update_status(gvr, upstream_namespace, with_status)
                        .await
                        .map_err(ClientError::into_core_error)?;
                    let mut finalized = after_status;
                    finalized.set_annotation(ANNOTATION_RV, downstream_rv);
                    self.upstream
                        .update(gvr, upstream_namespace, finalized)
                        .await
                        .map_err(ClientError::into_core_error)?;
                    Ok(MirrorOutcome::CreatedThreePhase)
                }
            }
            Err(other) => Err(other.into_core_error()),
            Ok(existing_upstream) => {
                let upstream_rv = existing_upstream.annotation(ANNOTATION_RV).unwrap_or_default();
                if upstream_rv == downstream_rv {
                    return Ok(MirrorOutcome::UpToDate);
                }
                if !dirty_status {
                    let mut spec_update = prepared;
                    spec_update.set_annotation(ANNOTATION_RV, downstream_rv);
                    self.upstream
                        .update(gvr, upstream_namespace, spec_update)
                        .await
                        .map_err(ClientError::into_core_error)?;
                    Ok(MirrorOutcome::UpdatedClean)
                } else {
                    let mut old_annotated = prepared;
                    old_annotated.set_annotation(ANNOTATION_RV, upstream_rv);
                    let updated_spec = self
                        .upstream
                        .update(gvr, upstream_namespace, old_annotated)
                        .await
                        .map_err(ClientError::into_core_error)?;
                    let mut with_status = updated_spec.deep_copy();
                    if let Some(status) = downstream_obj.nested_field(&["status"]) {
                        with_status.set_nested(&["status"], status.clone());
                    }
                    let after_status = self
                        .upstream
                        .update_status(gvr, upstream_namespace, with_status)
                        .await
                        .map_err(ClientError::into_core_error)?;
                    let mut finalized = after_status;
                    finalized.set_annotation(ANNOTATION_RV, downstream_rv);
                    self.upstream
                        .update(gvr, upstream_namespace, finalized)
                        .await
                        .map_err(ClientError::into_core_error)?;
                    Ok(MirrorOutcome::UpdatedThreePhase)
                }
            }
        }
    }

    async fn force_delete_upstream(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
    ) -> Result<MirrorOutcome, Error> {
        match self.upstream.get(gvr, namespace, name).await {
            Err(ClientError::NotFound(_)) => return Ok(MirrorOutcome::DownstreamAbsentDeletedUpstream),
            Err(other) => return Err(other.into_core_error()),
            Ok(obj) => {
                if !obj.nested_slice(&["metadata", "finalizers"]).unwrap_or(&[]).is_empty() {
                    let mut stripped = obj;
                    stripped.set_nested(&["metadata", "finalizers"], Json::Array(Vec::new()));
                    self.upstream
                        .update(gvr, namespace, stripped)
                        .await
                        .map_err(ClientError::into_core_error)?;
                }
            }
        }
        match self.upstream.delete(gvr, namespace, name, PropagationPolicy::Background).await {
            Ok(()) | Err(ClientError::NotFound(_)) => Ok(MirrorOutcome::DownstreamAbsentDeletedUpstream),
            Err(other) => Err(other.into_core_error()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tmc_test::MockClient;

    fn gvr() -> Gvr {
        Gvr::new("apps", "v1", "deployments")
    }

    #[tokio::test]
    async fn s4_three_phase_mirror_call_sequence() {
        let downstream_client = Arc::new(MockClient::new());
        let upstream_client = Arc::new(MockClient::new());
        let downstream_obj = Object::from_json(json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "phys-ns", "resourceVersion": "dRV"},
            "status": {"phase": "Running"}
        }))
        .unwrap();
        downstream_client.seed(&gvr(), "phys-ns", "web", downstream_obj);
        let upstream_obj = Object::from_json(json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "logical-ns", "annotations": {"workload.kcp.io/rv": "old"}}
        }))
        .unwrap();
        upstream_client.seed(&gvr(), "logical-ns", "web", upstream_obj);

        let mirror = UpstreamMirror::new(Arc::clone(&downstream_client), Arc::clone(&upstream_client));
        let outcome = mirror
            .reconcile(&gvr(), "phys-ns", "web", "logical-ns", "web", "target-1", true)
            .await
            .unwrap();
        assert_eq!(outcome, MirrorOutcome::UpdatedThreePhase);

        let calls = upstream_client.calls();
        use tmc_test::RecordedCall::*;
        assert_eq!(
            calls,
            vec![
                Get(gvr(), "logical-ns".into(), "web".into()),
                Update(gvr(), "logical-ns".into(), "web".into()),
                UpdateStatus(gvr(), "logical-ns".into(), "web".into()),
                Update(gvr(), "logical-ns".into(), "web".into()),
            ]
        );
        let stored = upstream_client.get_stored(&gvr(), "logical-ns", "web").unwrap();
        assert_eq!(stored.annotation(ANNOTATION_RV), Some("dRV"));
        assert_eq!(stored.nested_string(&["status", "phase"]), Some("Running"));
    }

    #[tokio::test]
    async fn downstream_absent_force_deletes_upstream() {
        let downstream_client = Arc::new(MockClient::new());
        let upstream_client = Arc::new(MockClient::new());
        let upstream_obj = Object::from_json(json!({
            "metadata": {"name": "web", "namespace": "logical-ns", "finalizers": ["workload.kcp.io/syncer-t1"]}
        }))
        .unwrap();
        upstream_client.seed(&gvr(), "logical-ns", "web", upstream_obj);
        let mirror = UpstreamMirror::new(Arc::clone(&downstream_client), Arc::clone(&upstream_client));
        let outcome = mirror
            .reconcile(&gvr(), "phys-ns", "web", "logical-ns", "web", "t1", false)
            .await
            .unwrap();
        assert_eq!(outcome, MirrorOutcome::DownstreamAbsentDeletedUpstream);
        assert!(upstream_client.get_stored(&gvr(), "logical-ns", "web").is_none());
    }

    #[tokio::test]
    async fn clean_create_sets_rv_in_one_step() {
        let downstream_client = Arc::new(MockClient::new());
        let upstream_client = Arc::new(MockClient::new());
        let downstream_obj = Object::from_json(json!({
            "metadata": {"name": "web", "namespace": "phys-ns", "resourceVersion": "rv-1"}
        }))
        .unwrap();
        downstream_client.seed(&gvr(), "phys-ns", "web", downstream_obj);
        let mirror = UpstreamMirror::new(Arc::clone(&downstream_client), Arc::clone(&upstream_client));
        let outcome = mirror
            .reconcile(&gvr(), "phys-ns", "web", "logical-ns", "web", "t1", false)
            .await
            .unwrap();
        assert_eq!(outcome, MirrorOutcome::CreatedClean);
        let stored = upstream_client.get_stored(&gvr(), "logical-ns", "web").unwrap();
        assert_eq!(stored.annotation(ANNOTATION_RV), Some("rv-1"));
    }
}
