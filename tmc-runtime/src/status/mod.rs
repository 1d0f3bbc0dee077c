//! Status Collector (C6) and Status Aggregator/Merger/Cache (C7).

pub mod aggregator;
pub mod cache;
pub mod collector;
pub mod merger;

pub use aggregator::StatusAggregator;
pub use cache::{CacheKey, CacheStats, NamespacedName, StatusCache};
pub use collector::{RetryPolicy, SourceConfig, StatusCollector, StatusSource};
pub use merger::{ConflictBehavior, CustomMergeFn, FieldContribution, FieldStrategy, Merger};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Spawns a background task that sweeps `cache` every `interval` until
/// `cancel` fires.
pub fn spawn_cache_cleanup_loop(
    cache: Arc<StatusCache>,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = cache.cleanup_expired();
                    if removed > 0 {
                        debug!(removed, "swept expired status cache entries");
                    }
                }
            }
        }
    })
}
