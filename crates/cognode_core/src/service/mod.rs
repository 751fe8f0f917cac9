//! Graph-level services.
//!
//! # Responsibility
//! - Layer tier rules and parent/child bookkeeping over storage providers.
//! - Detect and repair graph invariant violations.

pub mod consistency;
pub mod graph_service;
