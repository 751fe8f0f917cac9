use cognode_core::{
    EngineConfig, FileNodeStore, GraphError, GraphManager, IntegrityReport, MemoryNodeStore,
    NewNode, NodeId, NodeRecord, NodeStatus, NodeStore, NodeUpdate, PendingWrite, StorageError,
    StorageMode, StorageOperation, StoreConfig, StoreResult, Tier,
};
use serde_json::json;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn file_manager() -> (TempDir, Arc<FileNodeStore>, GraphManager) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(FileNodeStore::open(StoreConfig::new(dir.path())).unwrap());
    let manager = GraphManager::with_store(store.clone());
    (dir, store, manager)
}

fn ids(nodes: &[cognode_core::Node]) -> Vec<&str> {
    nodes.iter().map(|node| node.id()).collect()
}

/// Memory store that fails every call while `failing` is set.
#[derive(Default)]
struct FlakyStore {
    inner: MemoryNodeStore,
    failing: AtomicBool,
}

impl FlakyStore {
    fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn check(&self, id: Option<&str>, operation: StorageOperation) -> StoreResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StorageError::io(
                id,
                operation,
                std::io::Error::new(std::io::ErrorKind::Other, "disk unavailable"),
            ));
        }
        Ok(())
    }
}

impl NodeStore for FlakyStore {
    fn describe(&self) -> String {
        "flaky".to_string()
    }

    fn store(&self, record: &NodeRecord) -> StoreResult<()> {
        self.check(record.get("id").and_then(|id| id.as_str()), StorageOperation::Store)?;
        self.inner.store(record)
    }

    fn get(&self, id: &str) -> StoreResult<Option<NodeRecord>> {
        self.check(Some(id), StorageOperation::Get)?;
        self.inner.get(id)
    }

    fn delete(&self, id: &str) -> StoreResult<bool> {
        self.check(Some(id), StorageOperation::Delete)?;
        self.inner.delete(id)
    }

    fn list_ids(&self) -> StoreResult<Vec<NodeId>> {
        self.check(None, StorageOperation::List)?;
        self.inner.list_ids()
    }

    fn check_integrity(&self, repair: bool) -> StoreResult<IntegrityReport> {
        self.check(None, StorageOperation::CheckIntegrity)?;
        self.inner.check_integrity(repair)
    }
}

#[test]
fn root_child_lifecycle_keeps_references_and_archives() {
    let (_dir, store, manager) = file_manager();
    let root = manager.create_root("R").unwrap();
    let child = manager
        .create(NewNode::new("C", Tier::Field).with_parent(root.id()))
        .unwrap();

    let root = manager.get(root.id()).unwrap().unwrap();
    assert!(root.has_child(child.id()));
    assert_eq!(child.parent_id(), Some(root.id()));

    let path = manager.path(child.id()).unwrap();
    assert_eq!(ids(&path), vec![root.id(), child.id()]);

    let err = manager.delete(root.id()).unwrap_err();
    assert!(matches!(err, GraphError::NodeHasChildren { child_count: 1, .. }));

    manager.delete(child.id()).unwrap();
    assert!(manager.get(root.id()).unwrap().unwrap().children_ids().is_empty());
    manager.delete(root.id()).unwrap();

    assert_eq!(fs::read_dir(store.archive_dir()).unwrap().count(), 2);
    assert!(store.list_ids().unwrap().is_empty());
}

#[test]
fn every_tier_requires_parent_exactly_one_tier_above() {
    let manager = GraphManager::ephemeral();
    let mut chain = vec![manager.create_root("level 1").unwrap()];
    for tier in &Tier::ALL[1..] {
        let parent = chain.last().unwrap();
        let child = manager.create_child(parent.id(), format!("level {}", tier.level())).unwrap();
        assert_eq!(child.tier(), *tier);
        chain.push(child);
    }

    for (index, tier) in Tier::ALL.iter().enumerate().skip(1) {
        for (parent_index, parent) in chain.iter().enumerate() {
            if parent_index + 1 == index {
                continue;
            }
            let err = manager
                .create(NewNode::new("wrong", *tier).with_parent(parent.id()))
                .unwrap_err();
            assert!(
                matches!(err, GraphError::InvalidParent { .. }),
                "tier {tier} under {} should fail, got {err}",
                parent.tier()
            );
        }
    }

    let leaf = chain.last().unwrap();
    assert!(matches!(
        manager.create_child(leaf.id(), "too deep"),
        Err(GraphError::InvalidParent { .. })
    ));
    assert_eq!(manager.list_nodes(None).unwrap().len(), Tier::ALL.len());
}

#[test]
fn create_rejects_missing_parent_root_parent_and_duplicate_id() {
    let manager = GraphManager::ephemeral();
    assert!(matches!(
        manager.create(NewNode::new("orphan", Tier::Topic).with_parent("missing")),
        Err(GraphError::NodeNotFound(id)) if id == "missing"
    ));

    let root = manager
        .create(NewNode::new("root", Tier::Domain).with_id("r1"))
        .unwrap();
    assert!(matches!(
        manager.create(NewNode::new("root", Tier::Domain).with_parent(root.id())),
        Err(GraphError::InvalidParent { .. })
    ));
    assert!(matches!(
        manager.create(NewNode::new("again", Tier::Domain).with_id("r1")),
        Err(GraphError::InvalidNodeData { field: "id", .. })
    ));
}

#[test]
fn update_applies_fields_and_rejects_structural_changes() {
    let (dir, _store, manager) = file_manager();
    let root = manager.create_root("R").unwrap();
    let metadata = json!({"type": "x"}).as_object().cloned().unwrap();

    let changed = manager
        .update(
            root.id(),
            NodeUpdate::new()
                .name("Renamed")
                .description("about")
                .status(NodeStatus::Completed)
                .metadata(metadata),
        )
        .unwrap();
    assert!(changed);
    assert!(!manager.update("missing", NodeUpdate::new().name("x")).unwrap());

    let tier_change = NodeUpdate {
        tier: Some(Tier::Field),
        ..NodeUpdate::default()
    };
    assert!(matches!(
        manager.update(root.id(), tier_change),
        Err(GraphError::InvalidNodeData { field: "tier", .. })
    ));
    let parent_change = NodeUpdate {
        parent_id: Some(Some("elsewhere".to_string())),
        ..NodeUpdate::default()
    };
    assert!(matches!(
        manager.update(root.id(), parent_change),
        Err(GraphError::InvalidNodeData { field: "parent_id", .. })
    ));
    assert!(manager.update(root.id(), NodeUpdate::new().name(" ")).is_err());

    let reopened = GraphManager::open(
        &EngineConfig::ephemeral().with_store(StoreConfig::new(dir.path())),
    )
    .unwrap();
    let stored = reopened.get(root.id()).unwrap().unwrap();
    assert_eq!(stored.name(), "Renamed");
    assert_eq!(stored.description(), "about");
    assert_eq!(stored.status(), NodeStatus::Completed);
    assert_eq!(stored.metadata()["type"], "x");
    assert_eq!(stored.created_at(), root.created_at());
}

#[test]
fn navigation_queries_follow_references() {
    let manager = GraphManager::ephemeral();
    let root = manager.create_root("R").unwrap();
    let a = manager.create_child(root.id(), "A").unwrap();
    let b = manager.create_child(root.id(), "B").unwrap();
    let a1 = manager.create_child(a.id(), "A1").unwrap();

    let mut children: Vec<String> = manager
        .children(root.id())
        .unwrap()
        .iter()
        .map(|node| node.id().to_string())
        .collect();
    children.sort();
    let mut expected = vec![a.id().to_string(), b.id().to_string()];
    expected.sort();
    assert_eq!(children, expected);

    assert_eq!(manager.parent(a1.id()).unwrap().unwrap().id(), a.id());
    assert!(manager.parent(root.id()).unwrap().is_none());
    assert!(manager.parent("missing").unwrap().is_none());
    assert!(manager.children("missing").unwrap().is_empty());
    assert!(manager.path("missing").unwrap().is_empty());

    assert_eq!(manager.descendants(root.id()).unwrap().len(), 3);
    assert_eq!(manager.nodes_at_tier(Tier::Field).unwrap().len(), 2);
    assert_eq!(manager.nodes_at_tier(Tier::Discipline).unwrap().len(), 1);
    assert_eq!(
        ids(&manager.path(a1.id()).unwrap()),
        vec![root.id(), a.id(), a1.id()]
    );
}

#[test]
fn delete_missing_node_is_not_found() {
    let manager = GraphManager::ephemeral();
    assert!(matches!(
        manager.delete("missing"),
        Err(GraphError::NodeNotFound(_))
    ));
}

#[test]
fn ephemeral_manager_reports_mode_and_keeps_nodes_in_memory() {
    let manager = GraphManager::ephemeral();
    assert_eq!(manager.storage_mode(), StorageMode::Ephemeral);
    let root = manager.create_root("R").unwrap();
    manager.clear_cache();
    assert!(manager.get(root.id()).unwrap().is_some());
    assert_eq!(manager.resync().unwrap(), 0);
    manager.delete(root.id()).unwrap();
    assert!(manager.get(root.id()).unwrap().is_none());
}

#[test]
fn failing_provider_degrades_then_resyncs() {
    let flaky = Arc::new(FlakyStore::default());
    let manager = GraphManager::with_store(flaky.clone());
    let root = manager.create_root("R").unwrap();
    assert_eq!(manager.storage_mode(), StorageMode::Durable);

    flaky.set_failing(true);
    let child = manager.create_child(root.id(), "C").unwrap();
    assert_eq!(manager.storage_mode(), StorageMode::Degraded);
    assert!(manager.get(child.id()).unwrap().is_some());
    assert!(manager.get(root.id()).unwrap().unwrap().has_child(child.id()));

    let pending = manager.pending_writes();
    assert!(pending.contains(&(child.id().to_string(), PendingWrite::Store)));
    assert!(pending.contains(&(root.id().to_string(), PendingWrite::Store)));
    assert!(flaky.inner.get(child.id()).unwrap().is_none());

    flaky.set_failing(false);
    assert_eq!(manager.resync().unwrap(), 2);
    assert_eq!(manager.storage_mode(), StorageMode::Durable);
    assert!(manager.pending_writes().is_empty());
    assert!(flaky.inner.get(child.id()).unwrap().is_some());
    let stored_root = flaky.inner.get(root.id()).unwrap().unwrap();
    assert_eq!(stored_root["children_ids"], json!([child.id()]));
}

#[test]
fn delete_while_degraded_is_retried_on_resync() {
    let flaky = Arc::new(FlakyStore::default());
    let manager = GraphManager::with_store(flaky.clone());
    let root = manager.create_root("R").unwrap();

    flaky.set_failing(true);
    manager.delete(root.id()).unwrap();
    assert!(manager.get(root.id()).unwrap().is_none());
    assert_eq!(
        manager.pending_writes(),
        vec![(root.id().to_string(), PendingWrite::Delete)]
    );

    flaky.set_failing(false);
    assert!(manager.list_nodes(None).unwrap().is_empty());
    assert_eq!(manager.resync().unwrap(), 1);
    assert!(flaky.inner.is_empty());
    assert_eq!(flaky.inner.archived_count(root.id()), 1);
}

#[test]
fn concurrent_workers_create_update_and_read() {
    let (dir, _store, manager) = file_manager();
    let root = manager.create_root("R").unwrap();

    std::thread::scope(|scope| {
        for worker in 0..10 {
            let manager = &manager;
            let root_id = root.id();
            scope.spawn(move || {
                for index in 0..5 {
                    let child = manager
                        .create_child(root_id, format!("w{worker}-{index}"))
                        .unwrap();
                    assert!(manager
                        .update(child.id(), NodeUpdate::new().status(NodeStatus::InProgress))
                        .unwrap());
                    let read = manager.get(child.id()).unwrap().unwrap();
                    assert_eq!(read.status(), NodeStatus::InProgress);
                    assert!(manager.get(root_id).unwrap().is_some());
                }
            });
        }
    });

    let root = manager.get(root.id()).unwrap().unwrap();
    assert_eq!(root.child_count(), 50);
    let report = manager.check_consistency(false).unwrap();
    assert!(report.is_consistent(), "issues: {:?}", report.issues);

    let reopened = GraphManager::open(
        &EngineConfig::ephemeral().with_store(StoreConfig::new(dir.path())),
    )
    .unwrap();
    assert_eq!(reopened.get(root.id()).unwrap().unwrap().child_count(), 50);
    assert_eq!(
        reopened
            .list_nodes(None)
            .unwrap()
            .iter()
            .filter(|node| node.status() == NodeStatus::InProgress)
            .count(),
        50
    );
}

#[test]
fn racing_managers_converge_after_consistency_repair() {
    let dir = tempfile::tempdir().unwrap();
    let open = || {
        let store = Arc::new(FileNodeStore::open(StoreConfig::new(dir.path())).unwrap());
        GraphManager::with_store(store)
    };
    let seed = open();
    let root = seed.create_root("R").unwrap();

    let writers = [open(), open()];
    std::thread::scope(|scope| {
        for (worker, manager) in writers.iter().enumerate() {
            let root_id = root.id();
            scope.spawn(move || {
                for index in 0..5 {
                    manager
                        .create_child(root_id, format!("w{worker}-{index}"))
                        .unwrap();
                }
            });
        }
    });

    let checker = open();
    checker.check_consistency(true).unwrap();
    let root = checker.get(root.id()).unwrap().unwrap();
    assert_eq!(root.child_count(), 10);

    let second = open().check_consistency(false).unwrap();
    assert!(second.is_consistent(), "issues: {:?}", second.issues);
}

#[test]
fn long_lived_manager_writes_on_top_of_other_managers_changes() {
    let (dir, store, first) = file_manager();
    let root = first.create_root("R").unwrap();
    let stale = first.create_child(root.id(), "stale").unwrap();

    let second = GraphManager::with_store(Arc::new(
        FileNodeStore::open(StoreConfig::new(dir.path())).unwrap(),
    ));
    second.delete(stale.id()).unwrap();
    let fresh = second.create_child(root.id(), "fresh").unwrap();

    let late = first.create_child(root.id(), "late").unwrap();
    assert_eq!(
        store.get(root.id()).unwrap().unwrap()["children_ids"]
            .as_array()
            .unwrap()
            .len(),
        2
    );
    let root = first.get(root.id()).unwrap().unwrap();
    assert!(root.has_child(fresh.id()));
    assert!(root.has_child(late.id()));
    assert!(!root.has_child(stale.id()));

    let grandchild = second.create_child(fresh.id(), "g").unwrap();
    assert!(matches!(
        first.delete(fresh.id()),
        Err(GraphError::NodeHasChildren { child_count: 1, .. })
    ));
    assert!(first.get(grandchild.id()).unwrap().is_some());
}
