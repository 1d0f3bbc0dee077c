//! Health Checker (C8, §4.8): per-component health checks, periodic
//! execution with retry/failure-threshold, and weighted aggregation.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tmc_core::error::Error;
use tmc_core::model::{HealthStatus, SystemHealthStatus};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, warn};

/// A single component's health probe.
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Runs the probe once.
    async fn check(&self) -> Result<HealthStatus, Error>;
}

/// Wraps a [`HealthChecker`] with periodic execution and a failure
/// threshold: the component is only reported unhealthy after
/// `failure_threshold` consecutive failed probes (§4.8), avoiding status
/// flapping on a single transient error.
pub struct PeriodicHealthChecker<C: HealthChecker> {
    checker: C,
    interval: Duration,
    failure_threshold: u32,
    consecutive_failures: AtomicU32,
    last: RwLock<Option<HealthStatus>>,
}

impl<C: HealthChecker> PeriodicHealthChecker<C> {
    /// Builds a periodic wrapper. `failure_threshold` of 1 reports
    /// unhealthy on the first failing probe.
    pub fn new(checker: C, interval: Duration, failure_threshold: u32) -> Self {
        PeriodicHealthChecker {
            checker,
            interval,
            failure_threshold: failure_threshold.max(1),
            consecutive_failures: AtomicU32::new(0),
            last: RwLock::new(None),
        }
    }

    /// The most recently computed status, or a default "unknown" status
    /// before the first probe completes.
    pub fn current(&self) -> HealthStatus {
        self.last.read().clone().unwrap_or_else(|| HealthStatus {
            healthy: false,
            message: "no health probe has completed yet".to_string(),
            details: HashMap::new(),
            timestamp: chrono::Utc::now(),
        })
    }

    #[instrument(skip(self))]
    async fn run_once(&self) {
        match self.checker.check().await {
            Ok(status) if status.healthy => {
                self.consecutive_failures.store(0, Ordering::SeqCst);
                *self.last.write() = Some(status);
            }
            Ok(status) => {
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let reported = HealthStatus {
                    healthy: failures < self.failure_threshold,
                    ..status
                };
                *self.last.write() = Some(reported);
            }
            Err(err) => {
                warn!(%err, "health probe failed");
                let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
                *self.last.write() = Some(HealthStatus {
                    healthy: failures < self.failure_threshold,
                    message: err.to_string(),
                    details: HashMap::new(),
                    timestamp: chrono::Utc::now(),
                });
            }
        }
    }

    /// Runs the probe loop until `cancel` fires. Intended to be spawned
    /// as a background task per component.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken)
    where
        C: 'static,
    {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.run_once().await,
            }
        }
    }
}

/// Weight used when combining a component's health into the system view.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ComponentWeight(pub f64);

impl Default for ComponentWeight {
    fn default() -> Self {
        ComponentWeight(1.0)
    }
}

/// Default fraction of weighted healthy components required for the
/// aggregate system status to itself be healthy (§4.8).
pub const DEFAULT_HEALTH_THRESHOLD: f64 = 0.80;

/// Combines per-component [`HealthStatus`] snapshots into one
/// [`SystemHealthStatus`], weighting each component and requiring a
/// configurable fraction of the total weight to be healthy.
pub struct HealthAggregator {
    threshold: f64,
    weights: HashMap<String, ComponentWeight>,
}

impl Default for HealthAggregator {
    fn default() -> Self {
        HealthAggregator { threshold: DEFAULT_HEALTH_THRESHOLD, weights: HashMap::new() }
    }
}

impl HealthAggregator {
    /// An aggregator using the default 0.80 threshold and equal weights.
    pub fn new() -> Self {
        HealthAggregator::default()
    }

    /// An aggregator with an explicit threshold in `[0.0, 1.0]`.
    pub fn with_threshold(threshold: f64) -> Self {
        HealthAggregator { threshold, weights: HashMap::new() }
    }

    /// Sets the weight for a named component; unweighted components
    /// default to [`ComponentWeight::default`] (1.0).
    pub fn set_weight(&mut self, component: impl Into<String>, weight: f64) {
        self.weights.insert(component.into(), ComponentWeight(weight));
    }

    fn weight_of(&self, component: &str) -> f64 {
        self.weights.get(component).copied().unwrap_or_default().0
    }

    /// Aggregates `components` (name -> status) into a system-wide view.
    pub fn aggregate(&self, components: HashMap<String, HealthStatus>) -> SystemHealthStatus {
        let total_weight: f64 = components.keys().map(|name| self.weight_of(name)).sum();
        let healthy_weight: f64 =
            components.iter().filter(|(_, status)| status.healthy).map(|(name, _)| self.weight_of(name)).sum();

        let healthy_count = components.values().filter(|s| s.healthy).count();
        let unhealthy_count = components.len() - healthy_count;

        let fraction_healthy = if total_weight > 0.0 { healthy_weight / total_weight } else { 1.0 };
        let healthy = fraction_healthy >= self.threshold;

        let mut counts = HashMap::new();
        counts.insert("healthy".to_string(), healthy_count as i64);
        counts.insert("unhealthy".to_string(), unhealthy_count as i64);

        SystemHealthStatus {
            healthy,
            message: if healthy {
                "system healthy".to_string()
            } else {
                format!("{unhealthy_count} of {} components unhealthy", components.len())
            },
            components,
            counts,
            timestamp: chrono::Utc::now(),
        }
    }
}
