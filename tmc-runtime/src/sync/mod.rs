//! Bidirectional syncer (C3 downstream, C4 upstream) and the resource
//! transformer/mapper (C5) it shares with both directions.

pub mod downstream;
pub mod hash;
pub mod mapper;
pub mod preserve;
pub mod state;
pub mod transform;
pub mod upstream;

pub use downstream::{DownstreamSyncer, DownstreamSyncerConfig, SyncOperationKind, SyncResult};
pub use mapper::NamespaceMapper;
pub use transform::{default_downstream_pipeline, Pipeline, Rule, TransformOutcome};
pub use upstream::{prepare_for_upstream, MirrorOutcome, UpstreamMirror};
