//! Status Collector (C6, §4.6): concurrent fan-out collection from
//! multiple sources with per-source retry/backoff.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tmc_core::error::{Error, ErrorKind};
use tmc_core::model::StatusUpdate;
use tmc_core::Gvr;
use tracing::{debug, warn};

/// A single status source, e.g. a cluster's API or a sidecar metrics
/// endpoint. Implementations are expected to honor their own internal
/// timeout; [`StatusCollector`] additionally wraps every call with the
/// source's configured `timeout`.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Fetches the current status for `key` from this source.
    async fn fetch(&self, gvr: &Gvr, key: &str) -> Result<StatusUpdate, Error>;
}

/// Retry policy for a single registered source.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Maximum attempts.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each attempt.
    pub backoff_factor: f64,
    /// Ceiling no computed delay may exceed.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(200),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let scaled = self.initial_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
    }
}

/// Configuration for a registered [`StatusSource`].
#[derive(Clone)]
pub struct SourceConfig {
    /// Non-empty source endpoint identifier (used for error messages, not dialed here).
    pub endpoint: String,
    /// Per-call timeout, default 30s (§4.6).
    pub timeout: Duration,
    /// Retry policy for this source.
    pub retry: RetryPolicy,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig { endpoint: String::new(), timeout: Duration::from_secs(30), retry: RetryPolicy::default() }
    }
}

struct RegisteredSource {
    config: SourceConfig,
    source: Box<dyn StatusSource>,
}

/// Fans out status collection across every registered [`StatusSource`]
/// (C6).
#[derive(Default)]
pub struct StatusCollector {
    sources: RwLock<HashMap<String, RegisteredSource>>,
}

impl StatusCollector {
    /// An empty collector.
    pub fn new() -> Self {
        StatusCollector::default()
    }

    /// Registers a new source. Fails with [`ErrorKind::InvalidInput`] if
    /// `name` is already registered, the endpoint is empty, or the retry
    /// policy has negative fields (unrepresentable here since all fields
    /// are unsigned/duration, so this only validates `max_retries` via
    /// its type and the endpoint non-emptiness).
    pub fn register_source(
        &self,
        name: &str,
        config: SourceConfig,
        source: Box<dyn StatusSource>,
    ) -> Result<(), Error> {
        if config.endpoint.is_empty() {
            return Err(Error::invalid_input("source endpoint must not be empty"));
        }
        let mut sources = self.sources.write();
        if sources.contains_key(name) {
            return Err(Error::invalid_input(format!("source {name:?} already registered")));
        }
        sources.insert(name.to_string(), RegisteredSource { config, source });
        Ok(())
    }

    /// Number of registered sources.
    pub fn source_count(&self) -> usize {
        self.sources.read().len()
    }

    /// Collects status from every registered source concurrently (§4.6).
    /// Partial-success: if at least one source succeeds, its updates are
    /// returned (failures are logged, not surfaced); if every source
    /// fails, a combined error is returned.
    pub async fn collect_all(&self, gvr: &Gvr, key: &str) -> Result<Vec<StatusUpdate>, Error> {
        let names: Vec<String> = self.sources.read().keys().cloned().collect();
        if names.is_empty() {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::with_capacity(names.len());
        for name in names {
            let gvr = gvr.clone();
            let key = key.to_string();
            tasks.push(async move { (name.clone(), self.collect_from_source(&name, &gvr, &key).await) });
        }
        let results = futures::future::join_all(tasks).await;

        let mut updates = Vec::new();
        let mut errors = Vec::new();
        for (name, result) in results {
            match result {
                Ok(update) => updates.push(update),
                Err(err) => {
                    warn!(source = %name, %err, "status source failed after retries");
                    errors.push(format!("{name}: {err}"));
                }
            }
        }

        if updates.is_empty() && !errors.is_empty() {
            return Err(Error::new(ErrorKind::Transient, format!("all sources failed: {}", errors.join("; "))));
        }
        Ok(updates)
    }

    async fn collect_from_source(&self, name: &str, gvr: &Gvr, key: &str) -> Result<StatusUpdate, Error> {
        let (timeout, retry) = {
            let sources = self.sources.read();
            let registered = sources.get(name).expect("source name came from the same read snapshot");
            (registered.config.timeout, registered.config.retry)
        };

        let mut last_err = None;
        for attempt in 0..=retry.max_retries {
            if attempt > 0 {
                tokio::time::sleep(retry.delay_for_attempt(attempt - 1)).await;
            }

            let attempt_result = {
                let fut = {
                    let sources = self.sources.read();
                    let registered = sources.get(name).expect("source exists for the duration of collect_all");
                    registered.source.fetch(gvr, key)
                };
                tokio::time::timeout(timeout, fut).await
            };

            match attempt_result {
                Ok(Ok(update)) => return Ok(update),
                Ok(Err(err)) => {
                    debug!(source = %name, attempt, %err, "status source attempt failed");
                    last_err = Some(err);
                }
                Err(_elapsed) => {
                    last_err = Some(Error::new(ErrorKind::Timeout, format!("source {name} timed out")));
                }
            }
        }
        Err(last_err.unwrap_or_else(|| Error::new(ErrorKind::Transient, "no attempts made")))
    }
}
