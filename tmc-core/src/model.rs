//! §3 data model types, shared by every component in `tmc-runtime`.

use crate::client::Gvr;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::collections::HashMap;
use std::time::Duration;

/// Direction a [`SyncOperation`] travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Logical workspace → physical cluster.
    Downstream,
    /// Physical cluster → logical workspace.
    Upstream,
}

/// A unit of work dispatched by the Sync Engine Façade (C10) to C3/C4.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncOperation {
    /// Unique for the lifetime of the operation.
    pub id: String,
    /// Sync direction.
    pub direction: Direction,
    /// Logical workspace the operation originates from.
    pub source_workspace: String,
    /// Logical workspace the operation targets (may equal `source_workspace`).
    pub target_workspace: String,
    /// Resource GVR.
    pub gvr: Gvr,
    /// Namespace, empty for cluster-scoped resources.
    pub namespace: String,
    /// Resource name.
    pub name: String,
    /// Higher runs first.
    pub priority: i32,
    /// When this operation was enqueued.
    pub enqueued_at: DateTime<Utc>,
}

/// The outcome of processing a [`SyncOperation`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncResultKind {
    /// Completed successfully.
    Success,
    /// Failed with a non-retryable error.
    Error,
    /// Failed due to optimistic-concurrency conflict.
    Conflict,
    /// Deliberately not applied (e.g. filtered by a transform rule).
    Skipped,
    /// Should be retried.
    Retry,
}

/// Status of a completed (or abandoned) [`SyncOperation`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncStatus {
    /// The operation this status reports on.
    pub operation: SyncOperation,
    /// Outcome.
    pub result: SyncResultKind,
    /// Human-readable detail.
    pub message: String,
    /// Suggested delay before retrying, if any.
    pub retry_after: Option<Duration>,
    /// Wall-clock time spent processing.
    pub processing_time: Duration,
    /// When this status was produced.
    pub timestamp: DateTime<Utc>,
}

/// Per-object syncer cache entry (§3 ResourceState).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceState {
    /// The object's GVR.
    pub gvr: Gvr,
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
    /// Resource version last observed on the downstream object.
    pub last_resource_version: String,
    /// `metadata.generation` last observed.
    pub generation: i64,
    /// When this state was last refreshed by a successful sync.
    pub last_sync_time: DateTime<Utc>,
    /// SHA-256 content hash with transient fields stripped.
    pub content_hash: String,
    /// Number of resource-version conflicts observed for this key.
    pub conflict_counter: u32,
    /// Timestamp of the most recent conflict, if any.
    pub last_conflict_time: Option<DateTime<Utc>>,
}

/// A reference to a deployment target (namespace + name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeploymentRef {
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
}

/// Traffic configuration captured in a snapshot (service selectors,
/// ingress rules, weights).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrafficConfiguration {
    /// Service name -> selector label map.
    pub service_selectors: HashMap<String, HashMap<String, String>>,
    /// Ingress name -> raw rule payload.
    pub ingress_rules: HashMap<String, Json>,
    /// Named target -> traffic weight (0-100).
    pub weights: HashMap<String, u32>,
}

/// A raw serialized resource captured by the Snapshot Manager (C9.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResource {
    /// Kind, e.g. `Deployment`.
    pub kind: String,
    /// Namespace.
    pub namespace: String,
    /// Name.
    pub name: String,
    /// The full serialized object.
    pub raw: Json,
}

/// An immutable point-in-time capture of a deployment plus its dependent
/// resources and traffic configuration (§3 DeploymentSnapshot).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentSnapshot {
    /// Unique snapshot id, `snap-{sha256(...)[:8]}`.
    pub id: String,
    /// Monotonic version label supplied by the caller.
    pub version: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// The deployment this snapshot was taken of.
    pub target: DeploymentRef,
    /// Captured resources; invariant: non-empty, every `raw` non-null.
    pub resources: Vec<RawResource>,
    /// Flat extracted configuration key -> value.
    pub configuration: HashMap<String, String>,
    /// Captured traffic configuration.
    pub traffic: TrafficConfiguration,
    /// `hash(sorted(configuration))`; invariant: always matches `configuration`.
    pub config_hash: String,
    /// Labels carried over from the deployment.
    pub labels: HashMap<String, String>,
    /// Annotations carried over from the deployment.
    pub annotations: HashMap<String, String>,
}

/// Identifies which snapshot a [`RollbackRequest`] wants to restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackTarget {
    /// Snapshot id.
    pub snapshot_id: String,
    /// Optional expected version, checked if present.
    pub version: Option<String>,
    /// Optional expected config hash, checked if present.
    pub config_hash: Option<String>,
}

/// A request to roll a deployment back to a prior snapshot (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRequest {
    /// The deployment to roll back.
    pub target: DeploymentRef,
    /// Which snapshot (and optional version/hash check) to restore.
    pub rollback_to: RollbackTarget,
    /// Human-readable justification.
    pub reason: String,
    /// Whether a [`crate::model::RollbackTrigger`] fired this automatically.
    pub auto_triggered: bool,
    /// If true, validate and plan but do not mutate the cluster.
    pub dry_run: bool,
    /// If true, also restore service/ingress traffic configuration.
    pub restore_traffic: bool,
    /// Overall deadline for the rollback; falls back to the engine default.
    pub timeout: Option<Duration>,
}

/// Lifecycle phase of a [`RollbackStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RollbackPhase {
    /// Accepted, not yet validating.
    Pending,
    /// Verifying the target snapshot.
    Validating,
    /// Restoring resources.
    Restoring,
    /// Terminal: succeeded.
    Completed,
    /// Terminal: failed.
    Failed,
}

/// A single phase-transition condition recorded on a [`RollbackStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackCondition {
    /// The phase this condition describes.
    pub phase: RollbackPhase,
    /// When it was recorded.
    pub timestamp: DateTime<Utc>,
    /// Human-readable detail.
    pub message: String,
}

/// Outcome of restoring a single resource during a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoredStatus {
    /// Successfully created or updated.
    Restored,
    /// Restoration attempted and failed.
    Failed,
    /// Deliberately not restored (e.g. dry-run, or canary cleanup).
    Skipped,
}

/// A single restored (or attempted) resource, reported in [`RollbackStatus`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoredResource {
    /// Kind of the resource, e.g. `Deployment`.
    pub kind: String,
    /// Name of the resource.
    pub name: String,
    /// Outcome.
    pub status: RestoredStatus,
    /// Human-readable detail.
    pub message: String,
}

/// Live/terminal status of a rollback execution (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackStatus {
    /// Execution id, `rollback-{unix-seconds}`.
    pub id: String,
    /// Current phase.
    pub phase: RollbackPhase,
    /// Ordered phase-transition history.
    pub conditions: Vec<RollbackCondition>,
    /// When execution started.
    pub start_time: DateTime<Utc>,
    /// When execution reached a terminal phase.
    pub completion_time: Option<DateTime<Utc>>,
    /// Resources restored (or attempted) so far.
    pub restored_resources: Vec<RestoredResource>,
    /// Human-readable summary.
    pub message: String,
}

/// The kind of condition a [`RollbackTrigger`] evaluates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerType {
    /// Consecutive health-check failures.
    HealthCheck,
    /// Error rate over a window.
    ErrorRate,
    /// A deployment/operation exceeding a deadline.
    Timeout,
    /// Operator-initiated, never auto-evaluated.
    Manual,
    /// A named SLO's burn rate.
    Slo,
}

/// Threshold configuration for a [`RollbackTrigger`], shaped per [`TriggerType`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggerConditions {
    /// Numeric threshold (error rate fraction, timeout seconds, SLO burn rate, ...).
    pub threshold: f64,
    /// Evaluation window.
    pub window: Option<Duration>,
    /// Consecutive-failure count required for `HealthCheck` triggers.
    pub consecutive_failures: Option<u32>,
}

/// A configured automatic-rollback rule (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackTrigger {
    /// Unique, non-empty name.
    pub name: String,
    /// What kind of condition this trigger evaluates.
    pub trigger_type: TriggerType,
    /// Thresholds per `trigger_type`.
    pub conditions: TriggerConditions,
    /// Whether this trigger is currently active.
    pub enabled: bool,
    /// Minimum time between fires.
    pub cooldown_duration: Duration,
}

/// Severity of a fired [`TriggerEvent`], scaled by threshold exceedance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    /// At or just above threshold.
    Low,
    /// Above threshold.
    Medium,
    /// More than 2x threshold.
    High,
    /// More than 5x threshold.
    Critical,
}

/// A single trigger firing (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Name of the [`RollbackTrigger`] that fired.
    pub trigger_name: String,
    /// The deployment this event concerns.
    pub deployment: DeploymentRef,
    /// Why it fired.
    pub reason: String,
    /// When it fired.
    pub timestamp: DateTime<Utc>,
    /// How far past threshold the observed value was.
    pub severity: Severity,
}

/// A single source's reported status for a resource (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Which registered source produced this update.
    pub source_id: String,
    /// When the source observed this status.
    pub timestamp: DateTime<Utc>,
    /// The resource version the status was observed at.
    pub resource_version: String,
    /// Opaque structured status payload (conventionally has a `status` subtree).
    pub payload: Json,
    /// Free-form source-specific metadata.
    pub metadata: HashMap<String, String>,
}

/// Which [`StatusUpdate`]-combination strategy produced an [`AggregatedStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationStrategy {
    /// Pick the update with the greatest timestamp.
    LatestWins,
    /// Recursively merge every update via the configured [`crate::model`]-external Merger.
    MergeAll,
    /// Pick a base update, but surface per-field disagreements.
    ConflictDetection,
    /// Sort by configured per-source priority, then recency.
    SourcePriority,
}

/// A single detected disagreement between sources on one field (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConflict {
    /// Dot-path of the disagreeing field, e.g. `status.replicas`.
    pub field_path: String,
    /// Sources that disagreed.
    pub conflicting_sources: Vec<String>,
    /// Source id -> observed value.
    pub values: HashMap<String, Json>,
    /// Human-readable explanation of how (if at all) it was resolved.
    pub resolution: String,
}

/// The combined result of [`crate::model`]-external `Aggregate` (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregatedStatus {
    /// The combined status payload.
    pub payload: Json,
    /// Source ids that contributed.
    pub sources: Vec<String>,
    /// When the aggregation was computed.
    pub aggregated_at: DateTime<Utc>,
    /// Which strategy produced this result.
    pub strategy: AggregationStrategy,
    /// Conflicts detected (only ever non-empty for `ConflictDetection`).
    pub conflicts: Vec<StatusConflict>,
}

/// Result of a single health check (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    /// Whether the check passed.
    pub healthy: bool,
    /// Human-readable summary.
    pub message: String,
    /// Free-form details (e.g. `failure_count`, `failure_threshold`).
    pub details: HashMap<String, Json>,
    /// When the check ran.
    pub timestamp: DateTime<Utc>,
}

/// Aggregated health across every registered component (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealthStatus {
    /// Overall health.
    pub healthy: bool,
    /// Human-readable summary.
    pub message: String,
    /// Component name -> its own [`HealthStatus`].
    pub components: HashMap<String, HealthStatus>,
    /// `(healthy_count, total_count)`.
    pub counts: (usize, usize),
    /// When this rollup was computed.
    pub timestamp: DateTime<Utc>,
}
