//! The workspace-aware reconcile engine (C2): a rate-limited typed work
//! queue plus N workers invoking a [`Reconciler`].

pub mod queue;
pub mod ratelimiter;

use queue::WorkQueue;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tmc_core::error::{Error, ErrorKind};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// A caller-supplied handler invoked once per dequeued key. Implementations
/// must tolerate being called concurrently for different keys (§4.2).
#[async_trait::async_trait]
pub trait Reconciler: Send + Sync + 'static {
    /// Reconciles the object identified by `key` (canonical form, §3).
    /// An `Err` causes the key to be re-enqueued with exponential backoff.
    async fn reconcile(&self, key: &str) -> Result<(), Error>;
}

/// Consulted before each reconcile dispatch so a controller can be run
/// hot-standby across replicas without building multi-master coordination
/// into `BaseController` itself. Default is always-leader (single replica).
pub trait LeaderGate: Send + Sync + 'static {
    fn is_leader(&self) -> bool;
}

/// Configuration for a [`BaseController`] instance.
#[derive(Clone)]
pub struct ControllerConfig {
    /// Controller name, used in tracing spans and error messages.
    pub name: String,
    /// The logical workspace this controller is scoped to.
    pub workspace: String,
    /// How often previously-enqueued keys are re-synced even without an
    /// external trigger.
    pub resync_period: Duration,
    /// Number of parallel worker tasks; must be >= 1.
    pub worker_count: usize,
    /// Reconcile attempts for a single key beyond this count are dropped
    /// (with a warning) instead of being retried forever.
    pub max_retries: u32,
    /// A controller is considered unhealthy once the cumulative
    /// reconcile-error rate meets or exceeds this fraction.
    pub error_rate_threshold: f64,
    /// Consulted before every reconcile dispatch; keys popped while not
    /// leader are re-queued for a later resync rather than dropped.
    /// `None` means this controller is always the leader.
    pub leader: Option<Arc<dyn LeaderGate>>,
}

impl std::fmt::Debug for ControllerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControllerConfig")
            .field("name", &self.name)
            .field("workspace", &self.workspace)
            .field("resync_period", &self.resync_period)
            .field("worker_count", &self.worker_count)
            .field("max_retries", &self.max_retries)
            .field("error_rate_threshold", &self.error_rate_threshold)
            .field("leader", &self.leader.as_ref().map(|_| "<dyn LeaderGate>"))
            .finish()
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            name: "controller".to_string(),
            workspace: String::new(),
            resync_period: Duration::from_secs(600),
            worker_count: 1,
            max_retries: 15,
            error_rate_threshold: 0.5,
            leader: None,
        }
    }
}

/// The reconcile engine: a rate-limiting work queue dispatched to a set of
/// worker tasks invoking a [`Reconciler`] (C2 / "BaseController").
pub struct BaseController<R: Reconciler> {
    config: ControllerConfig,
    reconciler: Arc<R>,
    queue: Arc<WorkQueue>,
    tracked_keys: AsyncMutex<HashSet<String>>,
    started: AtomicBool,
    shutdown: AtomicBool,
    total_reconciles: AtomicU64,
    total_errors: AtomicU64,
}

impl<R: Reconciler> BaseController<R> {
    /// Builds a new, not-yet-started controller.
    pub fn new(config: ControllerConfig, reconciler: R) -> Arc<Self> {
        Arc::new(BaseController {
            config,
            reconciler: Arc::new(reconciler),
            queue: Arc::new(WorkQueue::new()),
            tracked_keys: AsyncMutex::new(HashSet::new()),
            started: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            total_reconciles: AtomicU64::new(0),
            total_errors: AtomicU64::new(0),
        })
    }

    /// Adds `key` to the queue (§4.2). Duplicate enqueues while the key is
    /// in flight are coalesced into one pending slot.
    pub async fn enqueue(self: &Arc<Self>, key: &str) {
        self.tracked_keys.lock().await.insert(key.to_string());
        self.queue.add(key);
    }

    /// Callable exactly once per instance; a second call fails with
    /// [`ErrorKind::Fatal`] ("already started"). Blocks until `cancel` is
    /// triggered, then drains the queue and joins all workers.
    #[instrument(skip_all, fields(controller = %self.config.name, workspace = %self.config.workspace))]
    pub async fn start(self: Arc<Self>, cancel: CancellationToken) -> Result<(), Error> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(Error::new(ErrorKind::Fatal, "controller already started"));
        }
        info!(workers = self.config.worker_count, "starting reconcile engine");

        let mut handles = Vec::with_capacity(self.config.worker_count);
        for worker_id in 0..self.config.worker_count {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move { this.worker_loop(worker_id, cancel).await }));
        }

        let resync_handle = {
            let this = Arc::clone(&self);
            let cancel = cancel.clone();
            tokio::spawn(async move { this.resync_loop(cancel).await })
        };

        cancel.cancelled().await;
        info!("shutdown signal received, draining reconcile queue");
        self.queue.shutdown();

        let mut first_err = None;
        for handle in handles {
            if let Err(join_err) = handle.await {
                first_err.get_or_insert_with(|| {
                    Error::with_source(ErrorKind::Fatal, "worker task panicked", join_err)
                });
            }
        }
        let _ = resync_handle.await;

        self.shutdown.store(true, Ordering::SeqCst);
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, cancel: CancellationToken) {
        loop {
            let key = tokio::select! {
                _ = cancel.cancelled() => break,
                key = self.queue.get() => key,
            };
            let Some(key) = key else { break };
            self.process_one(worker_id, &key).await;
        }
        debug!(worker_id, "worker exiting");
    }

    #[instrument(skip(self), fields(controller = %self.config.name, key = %key))]
    async fn process_one(self: &Arc<Self>, worker_id: usize, key: &str) {
        if let Some(leader) = &self.config.leader {
            if !leader.is_leader() {
                debug!(worker_id, "not leader, deferring key to next resync");
                self.queue.done(key);
                return;
            }
        }
        debug!(worker_id, "reconciling");
        self.total_reconciles.fetch_add(1, Ordering::Relaxed);
        match self.reconciler.reconcile(key).await {
            Ok(()) => {
                self.queue.forget(key);
            }
            Err(err) => {
                self.total_errors.fetch_add(1, Ordering::Relaxed);
                if self.queue.num_requeues(key) >= self.config.max_retries {
                    warn!(%err, "giving up on key after exceeding max retries");
                    self.queue.forget(key);
                } else {
                    warn!(%err, "reconcile failed, re-enqueuing with backoff");
                    self.queue.add_rate_limited(key).await;
                }
            }
        }
        self.queue.done(key);
    }

    async fn resync_loop(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.resync_period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let keys: Vec<String> = self.tracked_keys.lock().await.iter().cloned().collect();
                    debug!(count = keys.len(), "resync: re-enqueuing tracked keys");
                    for key in keys {
                        self.queue.add(&key);
                    }
                }
            }
        }
    }

    /// A controller is healthy only while started, not yet shut down, and
    /// its cumulative reconcile-error rate is below the configured
    /// threshold (§4.2). Before `start` is called it is unhealthy.
    pub fn healthy(&self) -> bool {
        if !self.started.load(Ordering::SeqCst) || self.shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let total = self.total_reconciles.load(Ordering::Relaxed);
        if total == 0 {
            return true;
        }
        let errors = self.total_errors.load(Ordering::Relaxed);
        (errors as f64 / total as f64) < self.config.error_rate_threshold
    }

    /// Number of keys currently pending in the queue.
    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tokio::time::{timeout, Duration as TokioDuration};

    struct CountingReconciler {
        calls: AtomicUsize,
        fail_until: usize,
        in_flight: Arc<AtomicUsize>,
        max_concurrent_seen: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Reconciler for CountingReconciler {
        async fn reconcile(&self, _key: &str) -> Result<(), Error> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent_seen.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(TokioDuration::from_millis(5)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_until {
                Err(Error::new(ErrorKind::Transient, "synthetic failure"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn unhealthy_before_start() {
        let controller = BaseController::new(
            ControllerConfig::default(),
            CountingReconciler {
                calls: AtomicUsize::new(0),
                fail_until: 0,
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
            },
        );
        assert!(!controller.healthy());
    }

    #[tokio::test]
    async fn second_start_fails() {
        let controller = BaseController::new(
            ControllerConfig { worker_count: 1, ..Default::default() },
            CountingReconciler {
                calls: AtomicUsize::new(0),
                fail_until: 0,
                in_flight: Arc::new(AtomicUsize::new(0)),
                max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
            },
        );
        let cancel = CancellationToken::new();
        let c2 = Arc::clone(&controller);
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { c2.start(cancel2).await });
        tokio::time::sleep(TokioDuration::from_millis(10)).await;
        let err = controller.clone().start(cancel.clone()).await.unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Fatal));
        cancel.cancel();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn per_key_mutual_exclusion() {
        // invariant 4 of §8: concurrent workers never process the same key at once.
        let reconciler = CountingReconciler {
            calls: AtomicUsize::new(0),
            fail_until: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        };
        let max_seen = Arc::clone(&reconciler.max_concurrent_seen);
        let controller = BaseController::new(
            ControllerConfig { worker_count: 4, ..Default::default() },
            reconciler,
        );
        let cancel = CancellationToken::new();
        let c2 = Arc::clone(&controller);
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { c2.start(cancel2).await });
        for _ in 0..20 {
            controller.enqueue("ws|default/same-key").await;
        }
        tokio::time::sleep(TokioDuration::from_millis(100)).await;
        cancel.cancel();
        timeout(TokioDuration::from_secs(2), handle).await.unwrap().unwrap().unwrap();
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }

    struct AlwaysFollower;

    impl LeaderGate for AlwaysFollower {
        fn is_leader(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn non_leader_defers_without_reconciling() {
        let reconciler = CountingReconciler {
            calls: AtomicUsize::new(0),
            fail_until: 0,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        };
        let controller = BaseController::new(
            ControllerConfig { worker_count: 1, leader: Some(Arc::new(AlwaysFollower)), ..Default::default() },
            reconciler,
        );
        let cancel = CancellationToken::new();
        let c2 = Arc::clone(&controller);
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { c2.start(cancel2).await });
        controller.enqueue("ws|default/standby").await;
        tokio::time::sleep(TokioDuration::from_millis(50)).await;
        cancel.cancel();
        timeout(TokioDuration::from_secs(2), handle).await.unwrap().unwrap().unwrap();
        assert_eq!(controller.total_reconciles.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_reconcile_is_retried_then_succeeds() {
        let reconciler = CountingReconciler {
            calls: AtomicUsize::new(0),
            fail_until: 2,
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_concurrent_seen: Arc::new(AtomicUsize::new(0)),
        };
        let controller = BaseController::new(ControllerConfig { worker_count: 1, ..Default::default() }, reconciler);
        let cancel = CancellationToken::new();
        let c2 = Arc::clone(&controller);
        let cancel2 = cancel.clone();
        let handle = tokio::spawn(async move { c2.start(cancel2).await });
        controller.enqueue("ws|default/flaky").await;
        tokio::time::sleep(TokioDuration::from_millis(200)).await;
        assert!(controller.total_reconciles.load(Ordering::SeqCst) >= 3, "expected the first two failures plus the eventual success to all be counted");
        assert_eq!(controller.total_errors.load(Ordering::SeqCst), 2, "only the first two attempts were made to fail");
        assert_eq!(controller.queue_depth(), 0, "the key should not still be queued for retry once it succeeded");
        cancel.cancel();
        timeout(TokioDuration::from_secs(2), handle).await.unwrap().unwrap().unwrap();
    }
}
