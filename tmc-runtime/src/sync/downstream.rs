//! Downstream syncer (C3, §4.3): transform → apply with server-managed
//! field preservation and optimistic-concurrency conflict handling.

use super::preserve::preserve_downstream_fields;
use super::state::StateCache;
use super::transform::{Pipeline, TransformOutcome};
use serde_json::Value as Json;
use std::sync::Arc;
use std::time::Duration;
use tmc_core::client::{ClientError, PropagationPolicy};
use tmc_core::error::{Error, ErrorKind};
use tmc_core::model::Direction;
use tmc_core::{DynamicResourceClient, Gvr, Object};
use tracing::{debug, instrument, warn};

/// Default number of retries attempted after an initial `Update` conflict
/// (§4.3.1). Total attempts = `1 + conflict_retries`.
pub const DEFAULT_CONFLICT_RETRIES: u32 = 3;
/// Default delay between conflict-retry attempts.
pub const DEFAULT_CONFLICT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Configuration for a [`DownstreamSyncer`].
#[derive(Debug, Clone, Copy)]
pub struct DownstreamSyncerConfig {
    /// Retries attempted after an initial conflict.
    pub conflict_retries: u32,
    /// Delay between conflict-retry attempts.
    pub conflict_retry_delay: Duration,
    /// Propagation policy used by `DeleteFromDownstream`.
    pub delete_propagation: PropagationPolicy,
}

impl Default for DownstreamSyncerConfig {
    fn default() -> Self {
        DownstreamSyncerConfig {
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
            conflict_retry_delay: DEFAULT_CONFLICT_RETRY_DELAY,
            delete_propagation: PropagationPolicy::Background,
        }
    }
}

/// The kind of mutation `ApplyToDownstream` performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOperationKind {
    /// The downstream object did not exist and was created.
    Create,
    /// The downstream object existed and was merged/updated.
    Update,
    /// A transform rule decided the object should not be synced.
    Skip,
    /// The downstream object did not exist and deletion was a no-op.
    Delete,
}

impl SyncOperationKind {
    /// Lowercase operation name, as named in §8 scenarios (`"create"`, `"update"`, ...).
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncOperationKind::Create => "create",
            SyncOperationKind::Update => "update",
            SyncOperationKind::Skip => "skip",
            SyncOperationKind::Delete => "delete",
        }
    }
}

/// Outcome of a single downstream sync call.
#[derive(Debug, Clone)]
pub struct SyncResult {
    /// Which operation was attempted.
    pub operation: SyncOperationKind,
    /// Whether it ultimately succeeded.
    pub success: bool,
    /// Human-readable detail.
    pub message: String,
    /// Every conflict observed during optimistic-concurrency retries.
    pub conflicts: Vec<String>,
}

/// Downstream syncer: applies logical-workspace objects onto a physical
/// cluster via a [`DynamicResourceClient`] (C3).
pub struct DownstreamSyncer<C: DynamicResourceClient> {
    client: Arc<C>,
    config: DownstreamSyncerConfig,
    pipeline: Pipeline,
    state: StateCache,
}

impl<C: DynamicResourceClient> DownstreamSyncer<C> {
    /// Builds a syncer over `client` using `pipeline` for transformation.
    pub fn new(client: Arc<C>, config: DownstreamSyncerConfig, pipeline: Pipeline) -> Self {
        DownstreamSyncer { client, config, pipeline, state: StateCache::new() }
    }

    /// The syncer's resource-state cache (§3 ResourceState).
    pub fn state(&self) -> &StateCache {
        &self.state
    }

    /// Applies `obj` to the downstream cluster (§4.3).
    #[instrument(skip(self, obj), fields(gvr = %gvr))]
    pub async fn apply_to_downstream(
        &self,
        gvr: &Gvr,
        source_workspace: &str,
        target_workspace: &str,
        obj: Object,
    ) -> Result<SyncResult, Error> {
        let namespace = obj.namespace().unwrap_or_default().to_string();
        let name = obj
            .name()
            .ok_or_else(|| Error::invalid_input("object has no metadata.name"))?
            .to_string();

        let transformed = match self
            .pipeline
            .run(gvr, source_workspace, target_workspace, Direction::Downstream, obj)
            .map_err(|e| e.context(format!("{gvr} {namespace}/{name} transform")))?
        {
            TransformOutcome::Skip(reason) => {
                return Ok(SyncResult {
                    operation: SyncOperationKind::Skip,
                    success: true,
                    message: reason,
                    conflicts: Vec::new(),
                })
            }
            TransformOutcome::Transformed(obj) => obj,
        };

        match self.client.get(gvr, &namespace, &name).await {
            Err(ClientError::NotFound(_)) => {
                let created = self
                    .client
                    .create(gvr, &namespace, transformed)
                    .await
                    .map_err(|e| e.into_core_error().context(format!("{gvr} {namespace}/{name} create")))?;
                self.state.record(gvr, &namespace, &name, &created);
                Ok(SyncResult {
                    operation: SyncOperationKind::Create,
                    success: true,
                    message: "created".to_string(),
                    conflicts: Vec::new(),
                })
            }
            Err(other) => Err(other.into_core_error().context(format!("{gvr} {namespace}/{name} get"))),
            Ok(existing) => {
                let (result, conflicts) =
                    self.update_with_conflict_retry(gvr, &namespace, &name, existing, &transformed).await;
                match result {
                    Ok(updated) => {
                        self.state.record(gvr, &namespace, &name, &updated);
                        Ok(SyncResult {
                            operation: SyncOperationKind::Update,
                            success: true,
                            message: "updated".to_string(),
                            conflicts,
                        })
                    }
                    Err(err) => {
                        for _ in 0..conflicts.len() {
                            self.state.record_conflict(gvr, &namespace, &name);
                        }
                        if matches!(err.kind(), ErrorKind::Conflict(_)) {
                            Ok(SyncResult {
                                operation: SyncOperationKind::Update,
                                success: false,
                                message: err.to_string(),
                                conflicts,
                            })
                        } else {
                            Err(err)
                        }
                    }
                }
            }
        }
    }

    /// §4.3.1: up to `conflict_retries` retries after the initial attempt,
    /// waiting `conflict_retry_delay` and re-fetching/re-merging between
    /// attempts. Only resource-version conflicts are retried.
    async fn update_with_conflict_retry(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
        mut existing: Object,
        transformed: &Object,
    ) -> (Result<Object, Error>, Vec<String>) {
        let attempts_allowed = 1 + self.config.conflict_retries;
        let mut conflicts = Vec::new();
        let mut attempt = 0u32;
        loop {
            let merged = preserve_downstream_fields(&existing, transformed);
            attempt += 1;
            match self.client.update(gvr, namespace, merged).await {
                Ok(updated) => return (Ok(updated), conflicts),
                Err(ClientError::Conflict(msg)) => {
                    conflicts.push(msg.clone());
                    if attempt >= attempts_allowed {
                        return (
                            Err(Error::rv_conflict(format!(
                                "exhausted {attempts_allowed} attempts: {msg}"
                            ))),
                            conflicts,
                        );
                    }
                    warn!(attempt, %msg, "downstream update conflict, retrying");
                    tokio::time::sleep(self.config.conflict_retry_delay).await;
                    match self.client.get(gvr, namespace, name).await {
                        Ok(refetched) => existing = refetched,
                        Err(err) => return (Err(err.into_core_error()), conflicts),
                    }
                }
                Err(other) => return (Err(other.into_core_error()), conflicts),
            }
        }
    }

    /// Deletes `name` from the downstream cluster (§4.3). `NotFound` is
    /// idempotently treated as success.
    #[instrument(skip(self), fields(gvr = %gvr))]
    pub async fn delete_from_downstream(
        &self,
        gvr: &Gvr,
        namespace: &str,
        name: &str,
    ) -> Result<SyncResult, Error> {
        match self.client.get(gvr, namespace, name).await {
            Err(ClientError::NotFound(_)) => {
                self.state.evict(gvr, namespace, name);
                return Ok(SyncResult {
                    operation: SyncOperationKind::Delete,
                    success: true,
                    message: "already absent".to_string(),
                    conflicts: Vec::new(),
                });
            }
            Err(other) => return Err(other.into_core_error()),
            Ok(_) => {}
        }
        match self.client.delete(gvr, namespace, name, self.config.delete_propagation).await {
            Ok(()) | Err(ClientError::NotFound(_)) => {
                self.state.evict(gvr, namespace, name);
                debug!("deleted from downstream");
                Ok(SyncResult {
                    operation: SyncOperationKind::Delete,
                    success: true,
                    message: "deleted".to_string(),
                    conflicts: Vec::new(),
                })
            }
            Err(other) => Err(other.into_core_error()),
        }
    }
}

/// Computes the deterministic state-key used by the syncer's cache: see
/// [`super::state::state_key`].
pub fn annotate_sync_metadata(obj: &mut Object, source_workspace: &str, sync_target: &str, generation: i64) {
    obj.set_annotation(tmc_core::constants::ANNOTATION_WORKSPACE_ORIGIN, source_workspace);
    obj.set_annotation(tmc_core::constants::ANNOTATION_SYNC_TARGET, sync_target);
    obj.set_nested(
        &["metadata", "annotations", tmc_core::constants::ANNOTATION_SYNC_GENERATION],
        Json::String(generation.to_string()),
    );
    obj.set_annotation(tmc_core::constants::ANNOTATION_SYNC_TIMESTAMP, chrono::Utc::now().to_rfc3339());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::transform::default_downstream_pipeline;
    use serde_json::json;
    use tmc_test::{deployment_fixture, MockClient};

    fn gvr() -> Gvr {
        Gvr::new("apps", "v1", "deployments")
    }

    #[tokio::test]
    async fn s1_create_happy_path() {
        let client = Arc::new(MockClient::new());
        let syncer =
            DownstreamSyncer::new(Arc::clone(&client), DownstreamSyncerConfig::default(), default_downstream_pipeline());
        let obj = deployment_fixture("default", "web", 3);
        let result = syncer.apply_to_downstream(&gvr(), "root:ws", "cluster-1", obj).await.unwrap();
        assert_eq!(result.operation, SyncOperationKind::Create);
        assert!(result.success);
        assert_eq!(client.count_matching(|c| matches!(c, tmc_test::RecordedCall::Create(..))), 1);
        let state = syncer.state().get(&gvr(), "default", "web").unwrap();
        assert_eq!(state.name, "web");
        assert!(!state.content_hash.is_empty());
    }

    #[tokio::test]
    async fn s2_update_preserves_fields() {
        let client = Arc::new(MockClient::new());
        let existing = Object::from_json(json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default", "resourceVersion": "12345", "uid": "u-1"},
            "spec": {"replicas": 3},
            "status": {"phase": "Running"}
        }))
        .unwrap();
        client.seed(&gvr(), "default", "web", existing);
        let syncer =
            DownstreamSyncer::new(Arc::clone(&client), DownstreamSyncerConfig::default(), default_downstream_pipeline());
        let desired = deployment_fixture("default", "web", 5);
        let result = syncer.apply_to_downstream(&gvr(), "root:ws", "cluster-1", desired).await.unwrap();
        assert_eq!(result.operation, SyncOperationKind::Update);
        assert!(result.success);
        let stored = client.get_stored(&gvr(), "default", "web").unwrap();
        assert_eq!(stored.nested_string(&["metadata", "resourceVersion"]), Some("12345"));
        assert_eq!(stored.nested_string(&["metadata", "uid"]), Some("u-1"));
        assert_eq!(stored.nested_string(&["status", "phase"]), Some("Running"));
        assert_eq!(stored.nested_i64(&["spec", "replicas"]), Some(5));
    }

    #[tokio::test]
    async fn s3_conflict_retry_budget_exhausted() {
        let client = Arc::new(MockClient::new());
        let existing = deployment_fixture("default", "web", 3);
        client.seed(&gvr(), "default", "web", existing);
        client.queue_update_error(&gvr(), "default", "web", ClientError::Conflict("stale-1".into()));
        client.queue_update_error(&gvr(), "default", "web", ClientError::Conflict("stale-2".into()));
        let config = DownstreamSyncerConfig { conflict_retries: 1, ..Default::default() };
        let syncer = DownstreamSyncer::new(Arc::clone(&client), config, default_downstream_pipeline());
        let desired = deployment_fixture("default", "web", 5);
        let result = syncer.apply_to_downstream(&gvr(), "root:ws", "cluster-1", desired).await.unwrap();
        assert_eq!(result.operation, SyncOperationKind::Update);
        assert!(!result.success);
        assert_eq!(result.conflicts.len(), 2);
        let update_calls = client.count_matching(|c| matches!(c, tmc_test::RecordedCall::Update(..)));
        assert_eq!(update_calls, 2);
        let get_calls = client.count_matching(|c| matches!(c, tmc_test::RecordedCall::Get(..)));
        // one Get from apply_to_downstream's initial lookup, one more between the two Update attempts.
        assert_eq!(get_calls, 2);
    }

    #[tokio::test]
    async fn delete_is_idempotent_on_not_found() {
        let client = Arc::new(MockClient::new());
        let syncer =
            DownstreamSyncer::new(Arc::clone(&client), DownstreamSyncerConfig::default(), default_downstream_pipeline());
        let result = syncer.delete_from_downstream(&gvr(), "default", "missing").await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn pod_transform_skip_is_reported() {
        let client = Arc::new(MockClient::new());
        let syncer =
            DownstreamSyncer::new(Arc::clone(&client), DownstreamSyncerConfig::default(), default_downstream_pipeline());
        let pod_gvr = Gvr::new("", "v1", "pods");
        let pod = Object::from_json(json!({
            "metadata": {"name": "app", "namespace": "default"},
            "status": {"phase": "Failed"}
        }))
        .unwrap();
        let result = syncer.apply_to_downstream(&pod_gvr, "root:ws", "cluster-1", pod).await.unwrap();
        assert_eq!(result.operation, SyncOperationKind::Skip);
        assert!(client.calls().is_empty());
    }
}
