//! Node domain model.
//!
//! # Responsibility
//! - Define the tier hierarchy and the node entity persisted per file.
//! - Own the record shape exchanged with storage providers.
//!
//! # Invariants
//! - Every node is identified by a stable, file-name safe `NodeId`.
//! - Deletion is an archive move in storage, never a model concern.

pub mod node;
pub mod tier;
