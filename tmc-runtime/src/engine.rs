//! Sync Engine Façade (C10, §4.10): owns the ordered sync queue and
//! dispatches enqueued operations to the downstream syncer (C3) or
//! upstream mirror (C4).

use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tmc_core::error::{Error, ErrorKind, Sentinel};
use tmc_core::model::{Direction, SyncOperation, SyncResultKind, SyncStatus};
use tracing::instrument;

/// Bound on queue depth past which [`SyncEngine::is_healthy`] reports
/// unhealthy (§4.10: "IsHealthy ... queue depth exceeds a configured bound").
const DEFAULT_MAX_QUEUE_DEPTH: usize = 10_000;

fn validate_operation(op: &SyncOperation) -> Result<(), Error> {
    if op.id.is_empty() {
        return Err(Error::invalid_input("sync operation id must not be empty"));
    }
    if op.source_workspace.is_empty() || op.target_workspace.is_empty() {
        return Err(Error::new(ErrorKind::Sentinel(Sentinel::InvalidDirection), "both workspaces must be non-empty"));
    }
    if op.gvr.resource.is_empty() || op.name.is_empty() {
        return Err(Error::new(ErrorKind::Sentinel(Sentinel::InvalidResource), "resource and name must be non-empty"));
    }
    Ok(())
}

struct Inner {
    queue: VecDeque<SyncOperation>,
    statuses: HashMap<String, SyncStatus>,
}

/// Counters surfaced by [`SyncEngine::metrics`] (§4.10 `GetMetrics`).
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineMetrics {
    pub enqueued: u64,
    pub processed: u64,
    pub errors: u64,
    pub queue_depth: usize,
}

/// Owns the sync queue and exposes the read-only introspection §4.10
/// names. Dispatch to C3/C4 is left to the caller supplying
/// `process_downstream`/`process_upstream` closures, matching how the
/// reconcile engine is generic over [`crate::reconcile::Reconciler`]
/// rather than hard-wiring a concrete syncer type.
pub struct SyncEngine {
    inner: RwLock<Inner>,
    stopped: AtomicBool,
    enqueued: AtomicU64,
    processed: AtomicU64,
    errors: AtomicU64,
    max_queue_depth: usize,
}

impl Default for SyncEngine {
    fn default() -> Self {
        SyncEngine::new(DEFAULT_MAX_QUEUE_DEPTH)
    }
}

impl SyncEngine {
    pub fn new(max_queue_depth: usize) -> Self {
        SyncEngine {
            inner: RwLock::new(Inner { queue: VecDeque::new(), statuses: HashMap::new() }),
            stopped: AtomicBool::new(false),
            enqueued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            max_queue_depth,
        }
    }

    /// Validates and enqueues `operation`, priority-first then FIFO
    /// (§4.10). Rejects new work once [`SyncEngine::stop`] has been called.
    pub fn enqueue_sync_operation(&self, operation: SyncOperation) -> Result<(), Error> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(Error::sentinel(Sentinel::SyncEngineStopped));
        }
        validate_operation(&operation)?;

        let mut inner = self.inner.write();
        let insert_at = inner.queue.iter().position(|queued| queued.priority < operation.priority).unwrap_or(inner.queue.len());
        inner.queue.insert(insert_at, operation);
        self.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Pops the next operation in priority-then-FIFO order, if any.
    pub fn pop_next(&self) -> Option<SyncOperation> {
        self.inner.write().queue.pop_front()
    }

    /// Dispatches `operation` to the downstream syncer (if
    /// `operation.direction == Downstream`) or the upstream mirror
    /// (otherwise), recording the resulting [`SyncStatus`] for later
    /// lookup via [`SyncEngine::get_sync_status`].
    #[instrument(skip(self, operation, process_downstream, process_upstream), fields(id = %operation.id))]
    pub async fn process_sync_operation<D, U, FutD, FutU>(
        &self,
        operation: SyncOperation,
        process_downstream: D,
        process_upstream: U,
    ) -> SyncStatus
    where
        D: FnOnce(SyncOperation) -> FutD,
        U: FnOnce(SyncOperation) -> FutU,
        FutD: std::future::Future<Output = Result<(), Error>>,
        FutU: std::future::Future<Output = Result<(), Error>>,
    {
        let started = tokio::time::Instant::now();
        let op_id = operation.id.clone();
        let direction = operation.direction;
        let result = match direction {
            Direction::Downstream => process_downstream(operation.clone()).await,
            Direction::Upstream => process_upstream(operation.clone()).await,
        };
        let processing_time = started.elapsed();

        self.processed.fetch_add(1, Ordering::Relaxed);
        let (result_kind, message) = match &result {
            Ok(()) => (SyncResultKind::Success, String::new()),
            Err(err) => {
                self.errors.fetch_add(1, Ordering::Relaxed);
                let kind = if matches!(err.kind(), ErrorKind::Conflict(_)) { SyncResultKind::Conflict } else { SyncResultKind::Error };
                (kind, err.to_string())
            }
        };

        let status = SyncStatus {
            operation,
            result: result_kind,
            message,
            retry_after: None,
            processing_time,
            timestamp: chrono::Utc::now(),
        };
        self.inner.write().statuses.insert(op_id, status.clone());
        status
    }

    /// Last recorded [`SyncStatus`] for `id`, if any.
    pub fn get_sync_status(&self, id: &str) -> Option<SyncStatus> {
        self.inner.read().statuses.get(id).cloned()
    }

    /// Pending (not yet dequeued) operations matching `workspace` and
    /// `direction`.
    pub fn list_pending_operations(&self, workspace: &str, direction: Direction) -> Vec<SyncOperation> {
        self.inner
            .read()
            .queue
            .iter()
            .filter(|op| (op.source_workspace == workspace || op.target_workspace == workspace) && op.direction == direction)
            .cloned()
            .collect()
    }

    pub fn metrics(&self) -> EngineMetrics {
        EngineMetrics {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            queue_depth: self.inner.read().queue.len(),
        }
    }

    /// `false` once the queue depth exceeds the configured bound.
    pub fn is_healthy(&self) -> bool {
        !self.stopped.load(Ordering::SeqCst) && self.inner.read().queue.len() <= self.max_queue_depth
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmc_core::client::Gvr;

    fn sample_op(id: &str, priority: i32) -> SyncOperation {
        SyncOperation {
            id: id.to_string(),
            direction: Direction::Downstream,
            source_workspace: "root:org".to_string(),
            target_workspace: "root:org".to_string(),
            gvr: Gvr::new("apps", "v1", "deployments"),
            namespace: "default".to_string(),
            name: "web".to_string(),
            priority,
            enqueued_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn enqueue_orders_by_priority_then_fifo() {
        let engine = SyncEngine::default();
        engine.enqueue_sync_operation(sample_op("a", 0)).unwrap();
        engine.enqueue_sync_operation(sample_op("b", 5)).unwrap();
        engine.enqueue_sync_operation(sample_op("c", 5)).unwrap();
        assert_eq!(engine.pop_next().unwrap().id, "b");
        assert_eq!(engine.pop_next().unwrap().id, "c");
        assert_eq!(engine.pop_next().unwrap().id, "a");
    }

    #[test]
    fn invalid_operation_is_rejected() {
        let engine = SyncEngine::default();
        let mut op = sample_op("a", 0);
        op.name = String::new();
        assert!(engine.enqueue_sync_operation(op).is_err());
    }

    #[test]
    fn stopped_engine_rejects_new_work() {
        let engine = SyncEngine::default();
        engine.stop();
        assert!(engine.enqueue_sync_operation(sample_op("a", 0)).is_err());
        assert!(!engine.is_healthy());
    }

    #[tokio::test]
    async fn process_sync_operation_dispatches_by_direction_and_records_status() {
        let engine = SyncEngine::default();
        let op = sample_op("a", 0);
        let status = engine
            .process_sync_operation(op.clone(), |_| async { Ok(()) }, |_| async { Err(Error::fatal("should not run")) })
            .await;
        assert_eq!(status.result, SyncResultKind::Success);
        assert_eq!(engine.get_sync_status("a").unwrap().result, SyncResultKind::Success);
        assert_eq!(engine.metrics().processed, 1);
    }

    #[test]
    fn list_pending_operations_filters_by_workspace_and_direction() {
        let engine = SyncEngine::default();
        engine.enqueue_sync_operation(sample_op("a", 0)).unwrap();
        let pending = engine.list_pending_operations("root:org", Direction::Downstream);
        assert_eq!(pending.len(), 1);
        assert!(engine.list_pending_operations("root:other", Direction::Downstream).is_empty());
    }
}
