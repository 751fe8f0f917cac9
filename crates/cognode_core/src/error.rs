//! Error taxonomy shared by the node model, storage and graph layers.
//!
//! # Responsibility
//! - Give every failure a typed variant carrying ids, counts and paths.
//! - Keep raw I/O and JSON errors wrapped with the node id and operation.
//!
//! # Invariants
//! - Storage providers never surface a bare `std::io::Error`.
//! - "Not found" is a value (`Ok(None)`), not a `StorageError`.

use crate::model::node::NodeId;
use crate::model::tier::Tier;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Result type used by graph-level operations.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type used by storage providers.
pub type StoreResult<T> = Result<T, StorageError>;

/// Errors surfaced by node construction and graph operations.
#[derive(Debug)]
pub enum GraphError {
    /// Referenced id does not resolve to any node.
    NodeNotFound(NodeId),
    /// Parent is missing where required, forbidden, or of the wrong tier.
    InvalidParent {
        tier: Tier,
        parent_id: Option<NodeId>,
        expected_parent_tier: Option<Tier>,
        actual_parent_tier: Option<Tier>,
    },
    /// Deletion attempted on a node that still has children.
    NodeHasChildren { node_id: NodeId, child_count: usize },
    /// A record or constructor input failed shape validation.
    InvalidNodeData { field: &'static str, message: String },
    /// A parent-chain walk revisited a node.
    CircularReference {
        node_id: NodeId,
        parent_id: NodeId,
        /// Ids collected before the cycle closed, starting node first.
        path: Vec<NodeId>,
    },
    /// Persistence failure not covered above.
    Storage(StorageError),
}

impl GraphError {
    pub(crate) fn invalid_data(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidNodeData {
            field,
            message: message.into(),
        }
    }

    pub(crate) fn missing_field(field: &'static str) -> Self {
        Self::invalid_data(field, format!("missing required field `{field}`"))
    }

    /// Stable short code, used in log events.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NodeNotFound(_) => "node_not_found",
            Self::InvalidParent { .. } => "invalid_parent",
            Self::NodeHasChildren { .. } => "node_has_children",
            Self::InvalidNodeData { .. } => "invalid_node_data",
            Self::CircularReference { .. } => "circular_reference",
            Self::Storage(_) => "storage",
        }
    }
}

impl Display for GraphError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NodeNotFound(id) => write!(f, "node not found: {id}"),
            Self::InvalidParent {
                tier,
                parent_id: None,
                expected_parent_tier: Some(expected),
                ..
            } => write!(f, "node of tier {tier} requires a parent of tier {expected}"),
            Self::InvalidParent {
                tier,
                parent_id: Some(parent_id),
                expected_parent_tier: None,
                ..
            } => write!(
                f,
                "node of tier {tier} cannot have a parent (got {parent_id})"
            ),
            Self::InvalidParent {
                tier,
                parent_id,
                expected_parent_tier,
                actual_parent_tier,
            } => write!(
                f,
                "invalid parent {} for tier {tier}: expected tier {}, got {}",
                parent_id.as_deref().unwrap_or("<none>"),
                tier_label(*expected_parent_tier),
                tier_label(*actual_parent_tier),
            ),
            Self::NodeHasChildren {
                node_id,
                child_count,
            } => write!(
                f,
                "node {node_id} still has {child_count} child node(s) and cannot be deleted"
            ),
            Self::InvalidNodeData { field, message } => {
                write!(f, "invalid node data in `{field}`: {message}")
            }
            Self::CircularReference {
                node_id,
                parent_id,
                path,
            } => write!(
                f,
                "circular reference: node {node_id} points to already visited parent {parent_id} (path: {})",
                path.join(" -> ")
            ),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for GraphError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for GraphError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

fn tier_label(tier: Option<Tier>) -> String {
    tier.map_or_else(|| "<none>".to_string(), |tier| tier.to_string())
}

/// Storage operation being attempted when a failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageOperation {
    Open,
    Store,
    Get,
    Delete,
    List,
    CheckIntegrity,
    Archive,
    Restore,
}

impl StorageOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Store => "store",
            Self::Get => "get",
            Self::Delete => "delete",
            Self::List => "list",
            Self::CheckIntegrity => "check_integrity",
            Self::Archive => "archive",
            Self::Restore => "restore",
        }
    }
}

impl Display for StorageOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Underlying reason of a storage failure.
#[derive(Debug)]
pub enum StorageCause {
    Io(std::io::Error),
    Json(serde_json::Error),
    /// Record content failed shape validation.
    InvalidRecord(String),
    /// Operation conflicts with existing on-disk state.
    Conflict(String),
}

impl Display for StorageCause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "io error: {err}"),
            Self::Json(err) => write!(f, "json error: {err}"),
            Self::InvalidRecord(message) => write!(f, "invalid record: {message}"),
            Self::Conflict(message) => write!(f, "conflict: {message}"),
        }
    }
}

/// Persistence failure tagged with node id and operation.
#[derive(Debug)]
pub struct StorageError {
    pub node_id: Option<NodeId>,
    pub operation: StorageOperation,
    pub cause: StorageCause,
}

impl StorageError {
    pub fn new(node_id: Option<&str>, operation: StorageOperation, cause: StorageCause) -> Self {
        Self {
            node_id: node_id.map(str::to_string),
            operation,
            cause,
        }
    }

    pub fn io(node_id: Option<&str>, operation: StorageOperation, err: std::io::Error) -> Self {
        Self::new(node_id, operation, StorageCause::Io(err))
    }

    pub fn json(
        node_id: Option<&str>,
        operation: StorageOperation,
        err: serde_json::Error,
    ) -> Self {
        Self::new(node_id, operation, StorageCause::Json(err))
    }

    pub fn invalid_record(
        node_id: Option<&str>,
        operation: StorageOperation,
        message: impl Into<String>,
    ) -> Self {
        Self::new(
            node_id,
            operation,
            StorageCause::InvalidRecord(message.into()),
        )
    }
}

impl Display for StorageError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.node_id {
            Some(id) => write!(f, "storage {} failed for node {id}: {}", self.operation, self.cause),
            None => write!(f, "storage {} failed: {}", self.operation, self.cause),
        }
    }
}

impl Error for StorageError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            StorageCause::Io(err) => Some(err),
            StorageCause::Json(err) => Some(err),
            StorageCause::InvalidRecord(_) | StorageCause::Conflict(_) => None,
        }
    }
}
