//! Storage provider layer.
//!
//! # Responsibility
//! - Define the per-node record storage contract.
//! - Provide the file-backed (durable) and in-memory (ephemeral) providers.
//!
//! # Invariants
//! - Providers persist one record at a time and never enforce graph rules.
//! - Provider failures surface as `StorageError` tagged with id and
//!   operation, never as bare I/O errors.

pub mod file_store;
pub mod memory_store;
pub mod node_store;
