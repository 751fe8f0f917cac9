//! Storage engine for a ten-tier graph of cognitive nodes.
//! This crate is the single source of truth for graph invariants.
//!
//! Nodes persist one JSON file each. Cross-node updates are two separate
//! writes; `GraphManager::check_consistency` is the reconciliation pass that
//! converges the graph after crashes or concurrent writers.

pub mod config;
pub mod error;
pub mod interrupt;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use config::{default_log_level, ConfigError, EngineConfig, LoggingConfig, StoreConfig};
pub use error::{
    GraphError, GraphResult, StorageCause, StorageError, StorageOperation, StoreResult,
};
pub use interrupt::Interrupt;
pub use logging::{init_logging, logging_status, LoggingError};
pub use model::node::{NewNode, Node, NodeId, NodeMetadata, NodeRecord, NodeStatus};
pub use model::tier::Tier;
pub use repo::file_store::{ArchivedRecord, FileNodeStore, SweepReport};
pub use repo::memory_store::MemoryNodeStore;
pub use repo::node_store::{IntegrityReport, NodeStore, RecordFilter};
pub use service::consistency::{ConsistencyIssue, ConsistencyReport};
pub use service::graph_service::{GraphManager, NodeUpdate, PendingWrite, StorageMode};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
