//! Trigger Manager (C9.2, §4.9): evaluates rollback triggers on a cooldown
//! and scales fired-event severity by how far past threshold the
//! observation is.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tmc_core::error::Error;
use tmc_core::model::{DeploymentRef, RollbackTrigger, Severity, TriggerEvent, TriggerType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const DEFAULT_COOLDOWN_SECS: i64 = 300;

const HEALTH_MONITOR_INTERVAL: Duration = Duration::from_secs(30);
const ERROR_RATE_MONITOR_INTERVAL: Duration = Duration::from_secs(60);
const TIMEOUT_MONITOR_INTERVAL: Duration = Duration::from_secs(120);

/// Maintains `activeTriggers` and `cooldowns`, both behind one lock (§5
/// locking discipline: "a single reader/writer lock guards triggers,
/// cooldowns, and metric maps").
#[derive(Default)]
pub struct TriggerManager {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    triggers: HashMap<String, RollbackTrigger>,
    cooldowns: HashMap<String, DateTime<Utc>>,
}

impl TriggerManager {
    pub fn new() -> Self {
        TriggerManager::default()
    }

    /// Registers or replaces a trigger definition.
    pub fn register_trigger(&self, trigger: RollbackTrigger) -> Result<(), Error> {
        if trigger.name.is_empty() {
            return Err(Error::invalid_input("trigger name must not be empty"));
        }
        self.inner.write().triggers.insert(trigger.name.clone(), trigger);
        Ok(())
    }

    pub fn remove_trigger(&self, name: &str) {
        let mut inner = self.inner.write();
        inner.triggers.remove(name);
        inner.cooldowns.remove(name);
    }

    pub fn trigger(&self, name: &str) -> Option<RollbackTrigger> {
        self.inner.read().triggers.get(name).cloned()
    }

    /// Every registered trigger of `trigger_type`, for a monitor loop to
    /// re-evaluate on each tick.
    pub fn triggers_of_type(&self, trigger_type: TriggerType) -> Vec<RollbackTrigger> {
        self.inner.read().triggers.values().filter(|t| t.trigger_type == trigger_type).cloned().collect()
    }

    fn default_cooldown(trigger: &RollbackTrigger) -> chrono::Duration {
        if trigger.cooldown_duration.is_zero() {
            chrono::Duration::seconds(DEFAULT_COOLDOWN_SECS)
        } else {
            chrono::Duration::from_std(trigger.cooldown_duration).unwrap_or_else(|_| chrono::Duration::seconds(DEFAULT_COOLDOWN_SECS))
        }
    }

    /// `true` if `name` is still within its cooldown window as of `now`.
    pub fn in_cooldown(&self, name: &str, now: DateTime<Utc>) -> bool {
        self.inner.read().cooldowns.get(name).map(|until| now < *until).unwrap_or(false)
    }

    /// Evaluates `name` against `observed` (an error rate, a consecutive
    /// failure count, or elapsed seconds, depending on the trigger's
    /// type) and fires a [`TriggerEvent`] if the trigger is enabled, not
    /// in cooldown, and `observed` exceeds its threshold. On fire, the
    /// cooldown is (re)armed from `now` (§4.9 C9.2).
    pub fn evaluate(
        &self,
        name: &str,
        observed: f64,
        deployment: DeploymentRef,
        now: DateTime<Utc>,
    ) -> Option<TriggerEvent> {
        let trigger = self.trigger(name)?;
        if !trigger.enabled {
            return None;
        }
        if self.in_cooldown(name, now) {
            return None;
        }
        if observed <= trigger.conditions.threshold {
            return None;
        }

        let severity = severity_for(observed, trigger.conditions.threshold);
        let cooldown = Self::default_cooldown(&trigger);
        self.inner.write().cooldowns.insert(name.to_string(), now + cooldown);

        Some(TriggerEvent {
            trigger_name: name.to_string(),
            deployment,
            reason: format!("{:?} observed {observed} exceeds threshold {}", trigger.trigger_type, trigger.conditions.threshold),
            timestamp: now,
            severity,
        })
    }
}

/// Supplies the current observed value for every deployment a monitor
/// loop should re-evaluate a trigger against. One observer implementation
/// per trigger category (health, error-rate, timeout); the same trait
/// covers all three, the way [`crate::metrics::MetricsSink`] covers every
/// metric emitter behind one seam.
#[async_trait]
pub trait TriggerObserver: Send + Sync + 'static {
    /// Current `(trigger_name, deployment, observed)` readings. A trigger
    /// named here must already be registered with a matching
    /// [`TriggerType`] or [`TriggerManager::evaluate`] silently no-ops.
    async fn observe(&self) -> Vec<(String, DeploymentRef, f64)>;
}

/// Spawns a background task that polls `observer` every `interval` and
/// evaluates each reading against `manager`, forwarding any fired
/// [`TriggerEvent`] to `on_fire`. Runs until `cancel` fires.
fn spawn_monitor_loop(
    manager: Arc<TriggerManager>,
    observer: Arc<dyn TriggerObserver>,
    interval: Duration,
    on_fire: Arc<dyn Fn(TriggerEvent) + Send + Sync>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let readings = observer.observe().await;
                    let now = Utc::now();
                    for (trigger_name, deployment, observed) in readings {
                        if let Some(event) = manager.evaluate(&trigger_name, observed, deployment, now) {
                            info!(trigger = %event.trigger_name, severity = ?event.severity, "rollback trigger fired");
                            on_fire(event);
                        }
                    }
                }
            }
        }
        debug!("trigger monitor loop exiting");
    })
}

/// Evaluates [`TriggerType::HealthCheck`] triggers every 30 s (§4.9 C9.2).
pub fn spawn_health_monitor_loop(
    manager: Arc<TriggerManager>,
    observer: Arc<dyn TriggerObserver>,
    on_fire: Arc<dyn Fn(TriggerEvent) + Send + Sync>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    spawn_monitor_loop(manager, observer, HEALTH_MONITOR_INTERVAL, on_fire, cancel)
}

/// Evaluates [`TriggerType::ErrorRate`] triggers every 60 s (§4.9 C9.2).
pub fn spawn_error_rate_monitor_loop(
    manager: Arc<TriggerManager>,
    observer: Arc<dyn TriggerObserver>,
    on_fire: Arc<dyn Fn(TriggerEvent) + Send + Sync>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    spawn_monitor_loop(manager, observer, ERROR_RATE_MONITOR_INTERVAL, on_fire, cancel)
}

/// Evaluates [`TriggerType::Timeout`] triggers every 120 s (§4.9 C9.2).
pub fn spawn_timeout_monitor_loop(
    manager: Arc<TriggerManager>,
    observer: Arc<dyn TriggerObserver>,
    on_fire: Arc<dyn Fn(TriggerEvent) + Send + Sync>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    spawn_monitor_loop(manager, observer, TIMEOUT_MONITOR_INTERVAL, on_fire, cancel)
}

fn severity_for(observed: f64, threshold: f64) -> Severity {
    if threshold <= 0.0 {
        return Severity::Medium;
    }
    let ratio = observed / threshold;
    if ratio > 5.0 {
        Severity::Critical
    } else if ratio > 2.0 {
        Severity::High
    } else {
        Severity::Medium
    }
}
