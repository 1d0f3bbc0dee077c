//! Rollback Engine (C9): snapshotting, ordered restoration, triggers, and
//! history, orchestrated by [`engine::RollbackEngine`].

pub mod engine;
pub mod history;
pub mod restore;
pub mod snapshot;
pub mod trigger;

pub use engine::RollbackEngine;
pub use history::{HistoryManager, HistoryOperation, HistoryStore, InMemoryHistoryStore};
pub use restore::RestorationManager;
pub use snapshot::{InMemorySnapshotStore, RetentionPolicy, SnapshotManager, SnapshotStore};
pub use trigger::{
    spawn_error_rate_monitor_loop, spawn_health_monitor_loop, spawn_timeout_monitor_loop, TriggerManager,
    TriggerObserver,
};
