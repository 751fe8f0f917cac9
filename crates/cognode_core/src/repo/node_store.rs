//! Storage provider contract for node records.
//!
//! # Responsibility
//! - Define per-node CRUD over flat JSON records, independent of graph
//!   semantics.
//! - Provide record shape validation and field-path filtering shared by
//!   every provider.
//!
//! # Invariants
//! - A record is usable only if it is a JSON object with `id`, `name` and a
//!   known `tier`, its `id` matches the key it was stored under, and it
//!   decodes into a node.
//! - "Not found" is reported as `Ok(None)` / `Ok(false)`, never as an error.
//! - Providers know nothing about parent/child agreement or tiers ordering.

use crate::error::StoreResult;
use crate::model::node::{is_valid_node_id, Node, NodeId};
use crate::model::tier::Tier;
use log::warn;
use serde_json::Value;

pub use crate::model::node::NodeRecord;

/// Durable (or ephemeral) per-node record storage.
///
/// Implementations must be safe to share across threads. Writes to one
/// record are atomic; nothing spans multiple records.
pub trait NodeStore: Send + Sync {
    /// Short provider label used in log events.
    fn describe(&self) -> String;

    /// Writes one record keyed by its `id`, replacing any previous version.
    fn store(&self, record: &NodeRecord) -> StoreResult<()>;

    /// Loads one record. `Ok(None)` when no usable version exists.
    fn get(&self, id: &str) -> StoreResult<Option<NodeRecord>>;

    /// Archives one record. `Ok(false)` when nothing was stored under `id`.
    fn delete(&self, id: &str) -> StoreResult<bool>;

    /// Enumerates every known record id, sorted.
    fn list_ids(&self) -> StoreResult<Vec<NodeId>>;

    /// Validates every record, optionally restoring corrupted ones.
    fn check_integrity(&self, repair: bool) -> StoreResult<IntegrityReport>;

    /// Loads every record and keeps those matching `filter`.
    ///
    /// Records that fail to load are skipped, not fatal.
    fn list(&self, filter: Option<&RecordFilter>) -> StoreResult<Vec<NodeRecord>> {
        let mut records = Vec::new();
        for id in self.list_ids()? {
            match self.get(&id) {
                Ok(Some(record)) => {
                    if filter.map_or(true, |filter| filter.matches(&record)) {
                        records.push(record);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(
                        "event=node_list_skip module=node_store status=error provider={} node_id={} error={}",
                        self.describe(),
                        id,
                        err
                    );
                }
            }
        }
        Ok(records)
    }
}

/// Outcome of [`NodeStore::check_integrity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Records examined.
    pub checked: usize,
    /// Records that failed validation, repaired or not.
    pub corrupted: usize,
    /// Corrupted records restored from a valid backup.
    pub repaired: usize,
    /// Ids of corrupted records left untouched.
    pub unrepaired_ids: Vec<NodeId>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.corrupted == self.repaired
    }
}

/// Equality conditions over flat or dot-path record fields.
///
/// `metadata.type` first matches a literal top-level key of that name and
/// otherwise walks into nested objects.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordFilter {
    conditions: Vec<(String, Value)>,
}

impl RecordFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a `path == value` condition. All conditions must hold.
    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((path.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, record: &NodeRecord) -> bool {
        self.conditions
            .iter()
            .all(|(path, expected)| lookup_path(record, path) == Some(expected))
    }
}

/// Resolves a flat key or a dot-separated path inside a record.
pub fn lookup_path<'a>(record: &'a NodeRecord, path: &str) -> Option<&'a Value> {
    if let Some(value) = record.get(path) {
        return Some(value);
    }
    let mut segments = path.split('.');
    let mut current = record.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Checks that a parsed JSON value is a usable record for `expected_id`.
///
/// Returns a human-readable reason on failure.
pub fn validate_record_value<'a>(
    value: &'a Value,
    expected_id: Option<&str>,
) -> Result<&'a NodeRecord, String> {
    let record = value
        .as_object()
        .ok_or_else(|| "record is not a JSON object".to_string())?;
    validate_record(record, expected_id)?;
    Ok(record)
}

/// Checks required fields and id agreement of a record.
pub fn validate_record(record: &NodeRecord, expected_id: Option<&str>) -> Result<(), String> {
    let id = match record.get("id") {
        Some(Value::String(id)) => id.as_str(),
        Some(_) => return Err("field `id` must be a string".to_string()),
        None => return Err("missing required field `id`".to_string()),
    };
    if !is_valid_node_id(id) {
        return Err(format!("field `id` holds an invalid node id `{id}`"));
    }
    match record.get("name") {
        Some(Value::String(name)) if !name.trim().is_empty() => {}
        Some(_) => return Err("field `name` must be a non-empty string".to_string()),
        None => return Err("missing required field `name`".to_string()),
    }
    let tier = match record.get("tier") {
        Some(Value::String(name)) => Tier::parse(name),
        Some(Value::Number(level)) => level
            .as_u64()
            .and_then(|level| u8::try_from(level).ok())
            .and_then(Tier::from_level),
        Some(_) => return Err("field `tier` must be a name or ordinal".to_string()),
        None => return Err("missing required field `tier`".to_string()),
    }
    .ok_or_else(|| format!("field `tier` holds an unknown tier `{}`", record["tier"]))?;
    if let Some(level) = record.get("tier_level").filter(|value| !value.is_null()) {
        if level.as_u64() != Some(u64::from(tier.level())) {
            return Err(format!(
                "field `tier_level` {level} does not match tier `{}`",
                tier.name()
            ));
        }
    }
    if let Some(expected_id) = expected_id {
        if id != expected_id {
            return Err(format!("record id `{id}` does not match `{expected_id}`"));
        }
    }
    Node::from_record(record).map_err(|err| err.to_string())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{lookup_path, validate_record, NodeRecord, RecordFilter};
    use serde_json::json;

    fn record(value: serde_json::Value) -> NodeRecord {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn lookup_path_prefers_flat_keys_then_nested() {
        let rec = record(json!({
            "metadata.type": "flat",
            "metadata": {"type": "nested", "deep": {"k": 1}}
        }));
        assert_eq!(lookup_path(&rec, "metadata.type"), Some(&json!("flat")));
        assert_eq!(lookup_path(&rec, "metadata.deep.k"), Some(&json!(1)));
        assert_eq!(lookup_path(&rec, "metadata.missing"), None);
    }

    #[test]
    fn filter_requires_all_conditions() {
        let rec = record(json!({"tier": "topic", "metadata": {"type": "x"}}));
        assert!(RecordFilter::new().matches(&rec));
        assert!(RecordFilter::new()
            .eq("tier", "topic")
            .eq("metadata.type", "x")
            .matches(&rec));
        assert!(!RecordFilter::new()
            .eq("tier", "topic")
            .eq("metadata.type", "y")
            .matches(&rec));
    }

    #[test]
    fn validate_record_reports_first_problem() {
        let ok = record(json!({"id": "a", "name": "A", "tier": "domain"}));
        assert!(validate_record(&ok, Some("a")).is_ok());

        let mismatch = validate_record(&ok, Some("b")).unwrap_err();
        assert!(mismatch.contains("does not match"));

        let missing = record(json!({"id": "a", "tier": 1}));
        assert!(validate_record(&missing, None)
            .unwrap_err()
            .contains("`name`"));
    }

    #[test]
    fn validate_record_rejects_what_nodes_cannot_decode() {
        for bad in [
            json!({"id": "a", "name": "A", "tier": "galaxy"}),
            json!({"id": "a", "name": "A", "tier": 11}),
            json!({"id": "a", "name": "A", "tier": "subject", "tier_level": 5}),
            json!({"id": "a", "name": "A", "tier": "domain", "status": "lost"}),
        ] {
            assert!(validate_record(&record(bad.clone()), Some("a")).is_err(), "{bad}");
        }
        let numeric = record(json!({"id": "a", "name": "A", "tier": 4, "tier_level": 4}));
        assert!(validate_record(&numeric, Some("a")).is_ok());
    }
}
