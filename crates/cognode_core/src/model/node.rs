//! Cognitive node domain model.
//!
//! # Responsibility
//! - Define the sole persisted entity and its lifecycle helpers.
//! - Convert nodes to and from the flat JSON record stored on disk.
//!
//! # Invariants
//! - `id` and `tier` never change after construction.
//! - `name` is never blank.
//! - `metadata` always carries `created_at` and `updated_at`; every
//!   mutation refreshes `updated_at`.
//! - `children_ids` has set semantics; order is not meaningful.

use crate::error::{GraphError, GraphResult};
use crate::model::tier::Tier;
use chrono::{SecondsFormat, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable node identifier. Also the stem of the node's record file.
pub type NodeId = String;

/// Open, JSON-compatible attribute map.
pub type NodeMetadata = Map<String, Value>;

/// Flat serialized form handed to storage providers.
pub type NodeRecord = Map<String, Value>;

pub const CREATED_AT_KEY: &str = "created_at";
pub const UPDATED_AT_KEY: &str = "updated_at";

const MAX_ID_CHARS: usize = 200;

/// Work status of a node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not started. Default for new nodes.
    #[default]
    Planned,
    InProgress,
    Completed,
    Blocked,
    /// Kept for history, no longer relevant.
    Deprecated,
}

impl NodeStatus {
    pub const ALL: [NodeStatus; 5] = [
        NodeStatus::Planned,
        NodeStatus::InProgress,
        NodeStatus::Completed,
        NodeStatus::Blocked,
        NodeStatus::Deprecated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Planned => "planned",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::Deprecated => "deprecated",
        }
    }

    /// Parses a symbolic status name, case-insensitively.
    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str() == normalized.as_str())
    }
}

impl Display for NodeStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Construction input for [`Node`].
///
/// Optional fields fall back to defaults: a fresh UUID v4 id, empty
/// description, `Planned` status and no parent.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNode {
    pub name: String,
    pub tier: Tier,
    pub description: Option<String>,
    pub metadata: Option<NodeMetadata>,
    pub id: Option<NodeId>,
    pub status: Option<NodeStatus>,
    pub parent_id: Option<NodeId>,
}

impl NewNode {
    pub fn new(name: impl Into<String>, tier: Tier) -> Self {
        Self {
            name: name.into(),
            tier,
            description: None,
            metadata: None,
            id: None,
            status: None,
            parent_id: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_id(mut self, id: impl Into<NodeId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_status(mut self, status: NodeStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<NodeId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// One node of the tiered hierarchy.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    id: NodeId,
    tier: Tier,
    name: String,
    description: String,
    status: NodeStatus,
    metadata: NodeMetadata,
    parent_id: Option<NodeId>,
    children_ids: BTreeSet<NodeId>,
}

impl Node {
    /// Generic constructor: fills defaults without checking the tier/parent
    /// relationship.
    ///
    /// Timestamps already present in `metadata` are kept (import path);
    /// missing ones are set to now.
    ///
    /// # Errors
    /// - `InvalidNodeData` when `name` is blank or `id` is not file-name safe.
    pub fn new(input: NewNode) -> GraphResult<Self> {
        let name = normalize_name(input.name)?;
        let id = match input.id {
            Some(id) => {
                validate_node_id(&id)?;
                id
            }
            None => Uuid::new_v4().to_string(),
        };
        if let Some(parent_id) = input.parent_id.as_deref() {
            validate_reference(parent_id, "parent_id")?;
        }

        let mut metadata = input.metadata.unwrap_or_default();
        let now = now_timestamp();
        if !metadata.get(CREATED_AT_KEY).is_some_and(Value::is_string) {
            metadata.insert(CREATED_AT_KEY.to_string(), Value::String(now.clone()));
        }
        if !metadata.get(UPDATED_AT_KEY).is_some_and(Value::is_string) {
            metadata.insert(UPDATED_AT_KEY.to_string(), Value::String(now));
        }

        Ok(Self {
            id,
            tier: input.tier,
            name,
            description: input.description.unwrap_or_default(),
            status: input.status.unwrap_or_default(),
            metadata,
            parent_id: input.parent_id,
            children_ids: BTreeSet::new(),
        })
    }

    /// Tier-checked constructor used for every tier.
    ///
    /// The root tier forbids a parent reference; every other tier requires
    /// one. Whether the referenced parent really sits one tier above is
    /// checked by the graph manager, which can resolve it.
    pub fn create(input: NewNode) -> GraphResult<Self> {
        match (input.tier.parent_tier(), input.parent_id.as_deref()) {
            (None, Some(parent_id)) => {
                return Err(GraphError::InvalidParent {
                    tier: input.tier,
                    parent_id: Some(parent_id.to_string()),
                    expected_parent_tier: None,
                    actual_parent_tier: None,
                });
            }
            (Some(expected), None) => {
                return Err(GraphError::InvalidParent {
                    tier: input.tier,
                    parent_id: None,
                    expected_parent_tier: Some(expected),
                    actual_parent_tier: None,
                });
            }
            _ => {}
        }
        Self::new(input)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn status(&self) -> NodeStatus {
        self.status
    }

    pub fn metadata(&self) -> &NodeMetadata {
        &self.metadata
    }

    pub fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    pub fn children_ids(&self) -> &BTreeSet<NodeId> {
        &self.children_ids
    }

    pub fn has_child(&self, id: &str) -> bool {
        self.children_ids.contains(id)
    }

    pub fn child_count(&self) -> usize {
        self.children_ids.len()
    }

    pub fn created_at(&self) -> Option<&str> {
        self.metadata.get(CREATED_AT_KEY).and_then(Value::as_str)
    }

    pub fn updated_at(&self) -> Option<&str> {
        self.metadata.get(UPDATED_AT_KEY).and_then(Value::as_str)
    }

    /// Adds a child reference. Returns `false` when it was already present.
    pub fn add_child(&mut self, id: impl Into<NodeId>) -> bool {
        let inserted = self.children_ids.insert(id.into());
        self.touch();
        inserted
    }

    /// Removes a child reference. No-op returning `false` when absent.
    pub fn remove_child(&mut self, id: &str) -> bool {
        if !self.children_ids.remove(id) {
            return false;
        }
        self.touch();
        true
    }

    pub fn update_status(&mut self, status: NodeStatus) {
        self.status = status;
        self.touch();
    }

    /// Merges `patch` into metadata: patch keys overwrite, others stay.
    ///
    /// `created_at` is immutable and ignored in the patch.
    pub fn update_metadata(&mut self, patch: NodeMetadata) {
        for (key, value) in patch {
            if key == CREATED_AT_KEY {
                continue;
            }
            self.metadata.insert(key, value);
        }
        self.touch();
    }

    pub fn rename(&mut self, name: impl Into<String>) -> GraphResult<()> {
        self.name = normalize_name(name.into())?;
        self.touch();
        Ok(())
    }

    pub fn set_description(&mut self, description: impl Into<String>) {
        self.description = description.into();
        self.touch();
    }

    /// Rewrites the parent reference without any graph checks.
    ///
    /// Graph-level callers must keep the counterpart's `children_ids` in
    /// agreement; the consistency checker relies on this to repair links.
    pub fn set_parent_id(&mut self, parent_id: Option<NodeId>) {
        self.parent_id = parent_id;
        self.touch();
    }

    fn touch(&mut self) {
        self.metadata.insert(
            UPDATED_AT_KEY.to_string(),
            Value::String(now_timestamp()),
        );
    }

    /// Serializes into the flat record persisted by storage providers.
    pub fn to_record(&self) -> NodeRecord {
        let mut record = Map::new();
        record.insert("id".to_string(), Value::String(self.id.clone()));
        record.insert("name".to_string(), Value::String(self.name.clone()));
        record.insert(
            "tier".to_string(),
            Value::String(self.tier.name().to_string()),
        );
        record.insert("tier_level".to_string(), Value::from(self.tier.level()));
        record.insert(
            "description".to_string(),
            Value::String(self.description.clone()),
        );
        record.insert(
            "status".to_string(),
            Value::String(self.status.as_str().to_string()),
        );
        record.insert("metadata".to_string(), Value::Object(self.metadata.clone()));
        record.insert(
            "parent_id".to_string(),
            self.parent_id
                .as_ref()
                .map_or(Value::Null, |id| Value::String(id.clone())),
        );
        record.insert(
            "children_ids".to_string(),
            Value::Array(
                self.children_ids
                    .iter()
                    .map(|id| Value::String(id.clone()))
                    .collect(),
            ),
        );
        record
    }

    /// Rebuilds a node from its persisted record.
    ///
    /// # Errors
    /// - `InvalidNodeData` naming the first missing required field
    ///   (`id`, `name`, `tier`) or the first malformed field.
    pub fn from_record(record: &NodeRecord) -> GraphResult<Self> {
        let id = required_str(record, "id")?;
        validate_node_id(id)?;
        let name = required_str(record, "name")?;
        let tier = parse_tier(record)?;

        let description = optional_str(record, "description")?
            .unwrap_or_default()
            .to_string();
        let status = match optional_str(record, "status")? {
            Some(value) => NodeStatus::parse(value).ok_or_else(|| {
                GraphError::invalid_data("status", format!("unknown status `{value}`"))
            })?,
            None => NodeStatus::default(),
        };
        let metadata = match record.get("metadata") {
            None | Some(Value::Null) => NodeMetadata::new(),
            Some(Value::Object(map)) => map.clone(),
            Some(_) => return Err(GraphError::invalid_data("metadata", "must be an object")),
        };
        let parent_id = optional_str(record, "parent_id")?.map(str::to_string);
        let children_ids = match record.get("children_ids") {
            None | Some(Value::Null) => BTreeSet::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        GraphError::invalid_data("children_ids", "entries must be strings")
                    })
                })
                .collect::<GraphResult<BTreeSet<_>>>()?,
            Some(_) => return Err(GraphError::invalid_data("children_ids", "must be an array")),
        };

        let mut node = Self::new(NewNode {
            name: name.to_string(),
            tier,
            description: Some(description),
            metadata: Some(metadata),
            id: Some(id.to_string()),
            status: Some(status),
            parent_id,
        })?;
        node.children_ids = children_ids;
        Ok(node)
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_record().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Node {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = NodeRecord::deserialize(deserializer)?;
        Node::from_record(&record).map_err(D::Error::custom)
    }
}

/// Returns whether `id` can be used as a node id (and file-name stem).
pub fn is_valid_node_id(id: &str) -> bool {
    !id.is_empty()
        && id.chars().count() <= MAX_ID_CHARS
        && !id.starts_with('.')
        && !id.chars().any(|ch| matches!(ch, '/' | '\\' | '\0') || ch.is_control())
}

pub(crate) fn validate_node_id(id: &str) -> GraphResult<()> {
    validate_reference(id, "id")
}

fn validate_reference(id: &str, field: &'static str) -> GraphResult<()> {
    if is_valid_node_id(id) {
        return Ok(());
    }
    Err(GraphError::invalid_data(
        field,
        format!("`{id}` is not a valid node id"),
    ))
}

/// Current UTC time in the format stored in node metadata.
pub(crate) fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn normalize_name(value: String) -> GraphResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(GraphError::invalid_data("name", "name must not be blank"));
    }
    Ok(trimmed.to_string())
}

fn required_str<'a>(record: &'a NodeRecord, field: &'static str) -> GraphResult<&'a str> {
    match record.get(field) {
        None | Some(Value::Null) => Err(GraphError::missing_field(field)),
        Some(Value::String(value)) => Ok(value.as_str()),
        Some(_) => Err(GraphError::invalid_data(field, "must be a string")),
    }
}

fn optional_str<'a>(record: &'a NodeRecord, field: &'static str) -> GraphResult<Option<&'a str>> {
    match record.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(_) => Err(GraphError::invalid_data(field, "must be a string or null")),
    }
}

fn parse_tier(record: &NodeRecord) -> GraphResult<Tier> {
    let tier = match record.get("tier") {
        None | Some(Value::Null) => return Err(GraphError::missing_field("tier")),
        Some(Value::String(name)) => Tier::parse(name),
        Some(Value::Number(level)) => level
            .as_u64()
            .and_then(|level| u8::try_from(level).ok())
            .and_then(Tier::from_level),
        Some(_) => None,
    }
    .ok_or_else(|| GraphError::invalid_data("tier", "unknown tier"))?;

    if let Some(level) = record.get("tier_level").filter(|value| !value.is_null()) {
        if level.as_u64() != Some(u64::from(tier.level())) {
            return Err(GraphError::invalid_data(
                "tier_level",
                format!("ordinal {level} does not match tier {tier}"),
            ));
        }
    }
    Ok(tier)
}
