//! Reserved annotation, label and metric names (§6). Bit-exact; do not
//! change without a data migration.

/// Upstream resource-version watermark annotation (§4.4).
pub const ANNOTATION_RV: &str = "workload.kcp.io/rv";
/// Marks which physical sync target produced a mirrored object.
pub const ANNOTATION_SYNC_SOURCE: &str = "tmc.kcp.io/sync-source";
/// Records the originating logical workspace of a downstream object.
pub const ANNOTATION_WORKSPACE_ORIGIN: &str = "tmc.kcp.io/workspace-origin";
/// Placement that caused this object to be synced.
pub const ANNOTATION_PLACEMENT: &str = "tmc.kcp.io/placement";
/// Identifies the sync target a downstream object belongs to.
pub const ANNOTATION_SYNC_TARGET: &str = "tmc.kcp.io/sync-target";
/// The `metadata.generation` observed at last sync.
pub const ANNOTATION_SYNC_GENERATION: &str = "tmc.kcp.io/sync-generation";
/// Timestamp of the last sync attempt.
pub const ANNOTATION_SYNC_TIMESTAMP: &str = "tmc.kcp.io/sync-timestamp";
/// Records how a field conflict during merge was resolved.
pub const ANNOTATION_CONFLICT_RESOLUTION: &str = "tmc.kcp.io/conflict-resolution";

/// Marks an object as owned/managed by a syncer instance.
pub const LABEL_SYNCER_MANAGED: &str = "tmc.kcp.io/syncer-managed";
/// The logical workspace a physical object was synced from.
pub const LABEL_WORKSPACE: &str = "tmc.kcp.io/workspace";
/// The placement a physical object is bound to.
pub const LABEL_PLACEMENT: &str = "tmc.kcp.io/placement";

/// Prefix prepended to a sync-target key to form the syncer's well-known
/// finalizer (§4.4, §6).
pub const SYNCER_FINALIZER_PREFIX: &str = "workload.kcp.io/syncer-";

/// Builds the finalizer name for a given sync-target key.
pub fn syncer_finalizer(sync_target_key: &str) -> String {
    format!("{SYNCER_FINALIZER_PREFIX}{sync_target_key}")
}

/// Metric series names exposed per §6.
pub mod metrics {
    /// Gauge: count of upstream sync targets per workspace.
    pub const UPSTREAM_SYNC_TARGETS_TOTAL: &str = "kcp_upstream_sync_targets_total";
    /// Counter: resources synced upstream.
    pub const UPSTREAM_RESOURCES_SYNCED_TOTAL: &str = "kcp_upstream_resources_synced_total";
    /// Counter: conflicts resolved during upstream sync.
    pub const UPSTREAM_CONFLICTS_RESOLVED_TOTAL: &str = "kcp_upstream_conflicts_resolved_total";
    /// Histogram: sync operation latency, exponential `0.001 * 2^k` buckets, 10 buckets.
    pub const UPSTREAM_SYNC_LATENCY_SECONDS: &str = "kcp_upstream_sync_latency_seconds";

    /// The 10 exponential histogram bucket boundaries `0.001 * 2^k` for `k in 0..10`.
    pub fn latency_buckets() -> Vec<f64> {
        (0..10).map(|k| 0.001 * 2f64.powi(k)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finalizer_naming() {
        assert_eq!(syncer_finalizer("target-1"), "workload.kcp.io/syncer-target-1");
    }

    #[test]
    fn bucket_count_and_first_value() {
        let buckets = metrics::latency_buckets();
        assert_eq!(buckets.len(), 10);
        assert!((buckets[0] - 0.001).abs() < f64::EPSILON);
        assert!((buckets[9] - 0.512).abs() < 1e-9);
    }
}
