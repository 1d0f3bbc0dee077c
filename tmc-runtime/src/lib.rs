//! The TMC overlay control plane runtime: reconcile engine (C2), syncer
//! (C3/C4/C5), status pipeline (C6/C7), health (C8), rollback (C9), the
//! sync engine façade (C10), and metrics (C11).

pub mod engine;
pub mod health;
pub mod metrics;
pub mod reconcile;
pub mod rollback;
pub mod status;
pub mod sync;

pub use engine::{EngineMetrics, SyncEngine};
pub use metrics::{Labels, MetricsSink, NoopSink, Recorder};
