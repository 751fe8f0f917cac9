//! In-memory node store.
//!
//! Same contract as the file store without durability: records vanish with
//! the process. Used when no data directory is configured.

use crate::error::{StorageError, StorageOperation, StoreResult};
use crate::model::node::NodeId;
use crate::repo::node_store::{validate_record, IntegrityReport, NodeRecord, NodeStore};
use log::debug;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Default)]
struct MemoryState {
    records: BTreeMap<NodeId, NodeRecord>,
    archive: Vec<(NodeId, i64, NodeRecord)>,
}

/// Process-local record store.
#[derive(Debug, Default)]
pub struct MemoryNodeStore {
    state: RwLock<MemoryState>,
}

impl MemoryNodeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of archived copies kept for `id`.
    pub fn archived_count(&self, id: &str) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .archive
            .iter()
            .filter(|(archived_id, _, _)| archived_id == id)
            .count()
    }
}

impl NodeStore for MemoryNodeStore {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    fn store(&self, record: &NodeRecord) -> StoreResult<()> {
        validate_record(record, None)
            .map_err(|reason| StorageError::invalid_record(None, StorageOperation::Store, reason))?;
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        debug!("event=node_store module=memory_store status=ok node_id={}", id);
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .insert(id, record.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> StoreResult<Option<NodeRecord>> {
        Ok(self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .get(id)
            .cloned())
    }

    fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.records.remove(id) {
            Some(record) => {
                let archived_at = chrono::Utc::now().timestamp();
                state.archive.push((id.to_string(), archived_at, record));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn list_ids(&self) -> StoreResult<Vec<NodeId>> {
        Ok(self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .keys()
            .cloned()
            .collect())
    }

    fn check_integrity(&self, _repair: bool) -> StoreResult<IntegrityReport> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut report = IntegrityReport::default();
        for (id, record) in &state.records {
            report.checked += 1;
            if validate_record(record, Some(id)).is_err() {
                report.corrupted += 1;
                report.unrepaired_ids.push(id.clone());
            }
        }
        Ok(report)
    }
}
