//! Rollback Engine (C9, §4.9): validates a [`RollbackRequest`], then runs
//! it through `pending → validating → restoring → completed|failed`,
//! guarding at most one concurrent rollback per deployment.

use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tmc_core::client::DynamicResourceClient;
use tmc_core::error::{Error, ErrorKind, Sentinel};
use tmc_core::model::{
    RollbackCondition, RollbackPhase, RollbackRequest, RollbackStatus, RollbackTarget,
};
use tracing::{info, instrument};

use super::history::HistoryManager;
use super::restore::RestorationManager;
use super::snapshot::SnapshotManager;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);
const READY_POLL_INTERVAL: Duration = Duration::from_secs(10);

fn deployment_key(target: &tmc_core::model::DeploymentRef) -> String {
    format!("{}/{}", target.namespace, target.name)
}

fn validate_request(request: &RollbackRequest) -> Result<(), Error> {
    if request.target.name.is_empty() {
        return Err(Error::invalid_input("rollback target name must not be empty"));
    }
    if request.rollback_to.snapshot_id.is_empty() {
        return Err(Error::invalid_input("rollback snapshot id must not be empty"));
    }
    if let Some(timeout) = request.timeout {
        if timeout.is_zero() {
            return Err(Error::invalid_input("rollback timeout must be > 0"));
        }
    }
    Ok(())
}

/// Orchestrates rollback execution (C9).
pub struct RollbackEngine<C: DynamicResourceClient> {
    snapshots: Arc<SnapshotManager<C>>,
    restoration: Arc<RestorationManager<C>>,
    history: Arc<HistoryManager>,
    default_timeout: Duration,
    active: Mutex<HashSet<String>>,
}

impl<C: DynamicResourceClient> RollbackEngine<C> {
    pub fn new(
        snapshots: Arc<SnapshotManager<C>>,
        restoration: Arc<RestorationManager<C>>,
        history: Arc<HistoryManager>,
        default_timeout: Duration,
    ) -> Self {
        RollbackEngine { snapshots, restoration, history, default_timeout, active: Mutex::new(HashSet::new()) }
    }

    /// Executes `request` end-to-end, returning the terminal
    /// [`RollbackStatus`]. Fails fast with
    /// [`Sentinel::InvalidResource`]-free [`ErrorKind::InvalidInput`]
    /// (step 1) or a "rollback already in progress" sentinel if another
    /// rollback for the same deployment is active (step 2).
    #[instrument(skip(self, request), fields(target = %request.target.name))]
    pub async fn execute_rollback(&self, request: RollbackRequest) -> Result<RollbackStatus, Error> {
        validate_request(&request)?;

        let key = deployment_key(&request.target);
        {
            let mut active = self.active.lock();
            if !active.insert(key.clone()) {
                return Err(Error::sentinel(Sentinel::RollbackAlreadyInProgress).context(key));
            }
        }
        let result = self.run(request).await;
        self.active.lock().remove(&key);
        result
    }

    async fn run(&self, request: RollbackRequest) -> Result<RollbackStatus, Error> {
        let start_time = Utc::now();
        let mut status = RollbackStatus {
            id: format!("rollback-{}", start_time.timestamp()),
            phase: RollbackPhase::Pending,
            conditions: vec![RollbackCondition { phase: RollbackPhase::Pending, timestamp: start_time, message: "accepted".to_string() }],
            start_time,
            completion_time: None,
            restored_resources: Vec::new(),
            message: String::new(),
        };

        let timeout = request.timeout.unwrap_or(self.default_timeout);
        let history_op = self.history.start_operation(
            request.target.clone(),
            None,
            request.rollback_to.snapshot_id.clone(),
            start_time,
        );

        let outcome = tokio::time::timeout(timeout, self.run_phases(&request, &mut status)).await;

        let (success, error_message) = match outcome {
            Ok(Ok(())) => {
                transition(&mut status, RollbackPhase::Completed, "rollback completed".to_string());
                (true, None)
            }
            Ok(Err(err)) => {
                transition(&mut status, RollbackPhase::Failed, err.to_string());
                (false, Some(err.to_string()))
            }
            Err(_elapsed) => {
                transition(&mut status, RollbackPhase::Failed, "rollback timed out".to_string());
                (false, Some("timed out".to_string()))
            }
        };

        status.completion_time = Some(Utc::now());
        self.history.complete_operation(&history_op, success, error_message, status.completion_time.unwrap()).await?;
        Ok(status)
    }

    async fn run_phases(&self, request: &RollbackRequest, status: &mut RollbackStatus) -> Result<(), Error> {
        transition(status, RollbackPhase::Validating, "validating snapshot".to_string());
        let snapshot = self.validate(&request.rollback_to).await?;

        transition(status, RollbackPhase::Restoring, "restoring resources".to_string());
        let restored = self.restoration.restore_from_snapshot(&snapshot, request.dry_run, request.restore_traffic).await?;
        let any_failed = restored.iter().any(|r| r.status == tmc_core::model::RestoredStatus::Failed);
        status.restored_resources = restored;

        if any_failed {
            return Err(Error::new(ErrorKind::Fatal, "one or more resources failed to restore"));
        }

        if !request.dry_run {
            self.wait_for_ready(request).await?;
        }

        Ok(())
    }

    async fn validate(&self, target: &RollbackTarget) -> Result<tmc_core::model::DeploymentSnapshot, Error> {
        let snapshot = self
            .snapshots
            .store()
            .get(&target.snapshot_id)
            .await?
            .ok_or_else(|| Error::not_found(format!("snapshot {} not found", target.snapshot_id)))?;

        SnapshotManager::<C>::validate_snapshot(&snapshot)?;

        if let Some(expected_version) = &target.version {
            if *expected_version != snapshot.version {
                return Err(Error::invalid_input(format!(
                    "snapshot version mismatch: expected {expected_version}, found {}",
                    snapshot.version
                )));
            }
        }
        if let Some(expected_hash) = &target.config_hash {
            if *expected_hash != snapshot.config_hash {
                return Err(Error::invalid_input("snapshot config hash mismatch"));
            }
        }
        Ok(snapshot)
    }

    async fn wait_for_ready(&self, request: &RollbackRequest) -> Result<(), Error> {
        let deployment_gvr = tmc_core::client::Gvr::new("apps", "v1", "deployments");
        loop {
            let obj = self
                .snapshots
                .client()
                .get(&deployment_gvr, &request.target.namespace, &request.target.name)
                .await
                .map_err(|e| e.into_core_error())?;
            let ready = obj.nested_i64(&["status", "readyReplicas"]).unwrap_or(0);
            let desired = obj.nested_i64(&["status", "replicas"]).unwrap_or(0);
            if desired > 0 && ready == desired {
                return Ok(());
            }
            info!(ready, desired, "waiting for restored deployment to become ready");
            tokio::time::sleep(READY_POLL_INTERVAL).await;
        }
    }
}

fn transition(status: &mut RollbackStatus, phase: RollbackPhase, message: String) {
    status.phase = phase;
    status.conditions.push(RollbackCondition { phase, timestamp: Utc::now(), message: message.clone() });
    status.message = message;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rollback::history::InMemoryHistoryStore;
    use crate::rollback::snapshot::{InMemorySnapshotStore, RetentionPolicy};
    use tmc_core::model::DeploymentRef;
    use tmc_test::{deployment_fixture, MockClient};

    fn ready_deployment_fixture() -> tmc_core::value::Object {
        let mut obj = deployment_fixture("default", "web", 3);
        obj.set_nested(&["status", "replicas"], serde_json::json!(3));
        obj.set_nested(&["status", "readyReplicas"], serde_json::json!(3));
        obj
    }

    async fn build_engine() -> (RollbackEngine<MockClient>, Arc<MockClient>, Arc<dyn crate::rollback::snapshot::SnapshotStore>) {
        let client = Arc::new(MockClient::new());
        client.seed(&tmc_core::client::Gvr::new("apps", "v1", "deployments"), "default", "web", ready_deployment_fixture());
        let store: Arc<dyn crate::rollback::snapshot::SnapshotStore> = Arc::new(InMemorySnapshotStore::new());
        let snapshots = Arc::new(SnapshotManager::new(client.clone(), store.clone(), RetentionPolicy::default()));
        let restoration = Arc::new(RestorationManager::new(client.clone()));
        let history = Arc::new(HistoryManager::new(Arc::new(InMemoryHistoryStore::default()), 10));
        let engine = RollbackEngine::new(snapshots, restoration, history, DEFAULT_TIMEOUT);
        (engine, client, store)
    }

    #[tokio::test]
    async fn s6_validation_restore_complete() {
        let (engine, _client, store) = build_engine().await;
        use sha2::{Digest, Sha256};
        let target = DeploymentRef { namespace: "default".to_string(), name: "web".to_string() };
        let mut configuration = std::collections::HashMap::new();
        configuration.insert("deployment.replicas".to_string(), "3".to_string());
        let config_hash = {
            let mut keys: Vec<&String> = configuration.keys().collect();
            keys.sort();
            let joined: String = keys.iter().map(|k| format!("{k}={};", configuration[*k])).collect();
            hex::encode(Sha256::digest(joined.as_bytes()))
        };
        let snapshot = tmc_core::model::DeploymentSnapshot {
            id: "snap-abc".to_string(),
            version: "v1".to_string(),
            created_at: Utc::now(),
            target: target.clone(),
            resources: vec![tmc_core::model::RawResource {
                kind: "Deployment".to_string(),
                namespace: "default".to_string(),
                name: "web".to_string(),
                raw: deployment_fixture("default", "web", 3).into_json(),
            }],
            configuration,
            traffic: tmc_core::model::TrafficConfiguration { service_selectors: Default::default(), ingress_rules: Default::default(), weights: Default::default() },
            config_hash,
            labels: Default::default(),
            annotations: Default::default(),
        };
        store.put(snapshot).await.unwrap();

        let request = RollbackRequest {
            target,
            rollback_to: RollbackTarget { snapshot_id: "snap-abc".to_string(), version: None, config_hash: None },
            reason: "manual test".to_string(),
            auto_triggered: false,
            dry_run: false,
            restore_traffic: false,
            timeout: Some(Duration::from_secs(5)),
        };

        let status = engine.execute_rollback(request).await.unwrap();
        assert_eq!(status.phase, RollbackPhase::Completed);
        assert_eq!(status.restored_resources.len(), 1);
        assert_eq!(status.restored_resources[0].status, tmc_core::model::RestoredStatus::Restored);
        assert!(status.completion_time.is_some());

        let phases: Vec<RollbackPhase> = status.conditions.iter().map(|c| c.phase).collect();
        assert_eq!(
            phases,
            vec![RollbackPhase::Pending, RollbackPhase::Validating, RollbackPhase::Restoring, RollbackPhase::Completed]
        );
    }

    #[tokio::test]
    async fn missing_snapshot_fails_validation_phase() {
        let (engine, _client, _store) = build_engine().await;
        let request = RollbackRequest {
            target: DeploymentRef { namespace: "default".to_string(), name: "web".to_string() },
            rollback_to: RollbackTarget { snapshot_id: "snap-missing".to_string(), version: None, config_hash: None },
            reason: "manual test".to_string(),
            auto_triggered: false,
            dry_run: false,
            restore_traffic: false,
            timeout: Some(Duration::from_secs(5)),
        };
        let status = engine.execute_rollback(request).await.unwrap();
        assert_eq!(status.phase, RollbackPhase::Failed);
    }

    #[tokio::test]
    async fn empty_target_name_is_rejected() {
        let (engine, _client, _store) = build_engine().await;
        let request = RollbackRequest {
            target: DeploymentRef { namespace: "default".to_string(), name: String::new() },
            rollback_to: RollbackTarget { snapshot_id: "snap-abc".to_string(), version: None, config_hash: None },
            reason: String::new(),
            auto_triggered: false,
            dry_run: false,
            restore_traffic: false,
            timeout: None,
        };
        assert!(engine.execute_rollback(request).await.is_err());
    }
}
