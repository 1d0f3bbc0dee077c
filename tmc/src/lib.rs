//! TMC overlay control plane: syncs resources between a kcp logical
//! workspace and physical clusters, aggregates their status back, and
//! can roll a deployment back to a prior snapshot.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tmc::client::DynamicResourceClient;
//! use tmc::sync::{default_downstream_pipeline, DownstreamSyncer, DownstreamSyncerConfig};
//!
//! async fn run<C: DynamicResourceClient>(client: Arc<C>) {
//!     let syncer = DownstreamSyncer::new(client, DownstreamSyncerConfig::default(), default_downstream_pipeline());
//!     let _ = syncer.state();
//! }
//! ```

pub use tmc_core::*;
pub use tmc_runtime::*;

pub mod client {
    pub use tmc_core::client::*;
}

pub mod model {
    pub use tmc_core::model::*;
}

pub mod reconcile {
    pub use tmc_runtime::reconcile::*;
}

pub mod sync {
    pub use tmc_runtime::sync::*;
}

pub mod status {
    pub use tmc_runtime::status::*;
}

pub mod health {
    pub use tmc_runtime::health::*;
}

pub mod rollback {
    pub use tmc_runtime::rollback::*;
}
