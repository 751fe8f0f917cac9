//! Tier-aware graph manager.
//!
//! # Responsibility
//! - Validate tier/parent constraints above the storage providers.
//! - Keep parent and child references in agreement on create/delete.
//! - Serve from an in-memory tier when the durable provider is absent or
//!   failing, and make that degraded mode observable.
//!
//! # Invariants
//! - A node's parent sits exactly one tier above it.
//! - A node with children cannot be deleted.
//! - Per-node writes go to the durable provider under the cache lock, so
//!   the durable copy never lags behind an older in-memory version.
//! - Every read that feeds a write (parent checks, the child-count guard,
//!   `modify`) re-reads the durable provider unless a write for that node
//!   is still pending. Plain `get` is cache-first.
//! - Linking a child is two separate record writes (child, then parent).
//!   A crash or concurrent repair between them leaves a repairable
//!   transient state; `check_consistency` converges it. No lock is held
//!   across operations and nothing is atomic across nodes.

use crate::config::EngineConfig;
use crate::error::{GraphError, GraphResult, StorageError};
use crate::model::node::{NewNode, Node, NodeId, NodeMetadata, NodeStatus};
use crate::model::tier::Tier;
use crate::repo::file_store::FileNodeStore;
use crate::repo::node_store::{NodeStore, RecordFilter};
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Which storage tier currently backs the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageMode {
    /// Every write reached the durable provider.
    Durable,
    /// The durable provider failed; some writes live only in memory.
    Degraded,
    /// No durable provider configured.
    Ephemeral,
}

/// Write that could not reach the durable provider yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingWrite {
    Store,
    Delete,
}

/// Field changes for [`GraphManager::update`].
///
/// `tier` and `parent_id` may be supplied only with their current values.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub metadata: Option<NodeMetadata>,
    pub status: Option<NodeStatus>,
    pub tier: Option<Tier>,
    pub parent_id: Option<Option<NodeId>>,
}

impl NodeUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn metadata(mut self, metadata: NodeMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn status(mut self, status: NodeStatus) -> Self {
        self.status = Some(status);
        self
    }
}

#[derive(Default)]
struct CacheState {
    nodes: HashMap<NodeId, Node>,
    pending: BTreeMap<NodeId, PendingWrite>,
    degraded: bool,
}

/// Graph operations over a durable provider plus an in-memory tier.
pub struct GraphManager {
    durable: Option<Arc<dyn NodeStore>>,
    cache: RwLock<CacheState>,
}

impl GraphManager {
    /// Creates a manager over an optional durable provider.
    pub fn new(durable: Option<Arc<dyn NodeStore>>) -> Self {
        match &durable {
            Some(store) => info!(
                "event=graph_open module=graph status=ok mode=durable provider={}",
                store.describe()
            ),
            None => info!("event=graph_open module=graph status=ok mode=ephemeral"),
        }
        Self {
            durable,
            cache: RwLock::new(CacheState::default()),
        }
    }

    /// Memory-only manager.
    pub fn ephemeral() -> Self {
        Self::new(None)
    }

    pub fn with_store(store: Arc<dyn NodeStore>) -> Self {
        Self::new(Some(store))
    }

    /// Opens a manager from engine configuration.
    ///
    /// A configured store becomes a [`FileNodeStore`]; otherwise the manager
    /// runs in ephemeral mode.
    pub fn open(config: &EngineConfig) -> GraphResult<Self> {
        let durable: Option<Arc<dyn NodeStore>> = match &config.store {
            Some(store_config) => Some(Arc::new(FileNodeStore::open(store_config.clone())?)),
            None => None,
        };
        Ok(Self::new(durable))
    }

    /// Durable provider, if configured.
    pub fn store(&self) -> Option<&Arc<dyn NodeStore>> {
        self.durable.as_ref()
    }

    pub fn storage_mode(&self) -> StorageMode {
        if self.durable.is_none() {
            return StorageMode::Ephemeral;
        }
        if self.read_cache().degraded {
            StorageMode::Degraded
        } else {
            StorageMode::Durable
        }
    }

    /// Ids whose latest write has not reached the durable provider.
    pub fn pending_writes(&self) -> Vec<(NodeId, PendingWrite)> {
        self.read_cache()
            .pending
            .iter()
            .map(|(id, write)| (id.clone(), *write))
            .collect()
    }

    /// Creates a node after validating its parent.
    ///
    /// Persists the node first, then adds it to the parent's
    /// `children_ids`. A failure between the two writes is repaired by
    /// `check_consistency`.
    ///
    /// # Errors
    /// - `InvalidParent` when the tier forbids/requires a parent or the
    ///   parent has the wrong tier.
    /// - `NodeNotFound` when the parent does not exist.
    /// - `InvalidNodeData` for a blank name or an id already in use.
    pub fn create(&self, input: NewNode) -> GraphResult<Node> {
        let node = Node::create(input)?;

        if let Some(parent_id) = node.parent_id() {
            let parent = self
                .reload(parent_id)
                .ok_or_else(|| GraphError::NodeNotFound(parent_id.to_string()))?;
            let expected = node.tier().parent_tier();
            if Some(parent.tier()) != expected {
                return Err(GraphError::InvalidParent {
                    tier: node.tier(),
                    parent_id: Some(parent_id.to_string()),
                    expected_parent_tier: expected,
                    actual_parent_tier: Some(parent.tier()),
                });
            }
        }
        if self.get(node.id())?.is_some() {
            return Err(GraphError::invalid_data(
                "id",
                format!("node {} already exists", node.id()),
            ));
        }

        self.commit(&node);
        if let Some(parent_id) = node.parent_id() {
            let child_id = node.id().to_string();
            let linked = self.modify(parent_id, |parent| Ok(parent.add_child(child_id)))?;
            if linked.is_none() {
                warn!(
                    "event=node_link module=graph status=error node_id={} parent_id={} error_code=parent_vanished",
                    node.id(),
                    parent_id
                );
            }
        }

        info!(
            "event=node_create module=graph status=ok node_id={} tier={} parent_id={}",
            node.id(),
            node.tier().level(),
            node.parent_id().unwrap_or("-")
        );
        Ok(node)
    }

    /// Creates a tier-1 node.
    pub fn create_root(&self, name: impl Into<String>) -> GraphResult<Node> {
        self.create(NewNode::new(name, Tier::ROOT))
    }

    /// Creates a node one tier below `parent_id`.
    pub fn create_child(&self, parent_id: &str, name: impl Into<String>) -> GraphResult<Node> {
        let parent = self
            .get(parent_id)?
            .ok_or_else(|| GraphError::NodeNotFound(parent_id.to_string()))?;
        let tier = parent
            .tier()
            .child_tier()
            .ok_or_else(|| GraphError::InvalidParent {
                tier: parent.tier(),
                parent_id: Some(parent_id.to_string()),
                expected_parent_tier: parent.tier().parent_tier(),
                actual_parent_tier: Some(parent.tier()),
            })?;
        self.create(NewNode::new(name, tier).with_parent(parent_id))
    }

    /// Cache-first lookup, then the durable provider.
    ///
    /// Provider failures degrade to the cache and yield `Ok(None)`. A stored
    /// record that does not decode into a node is logged and reported as
    /// absent, the same way `list_nodes` skips it.
    pub fn get(&self, id: &str) -> GraphResult<Option<Node>> {
        {
            let state = self.read_cache();
            if let Some(node) = state.nodes.get(id) {
                return Ok(Some(node.clone()));
            }
            if state.pending.get(id) == Some(&PendingWrite::Delete) {
                return Ok(None);
            }
        }

        let Some(store) = &self.durable else {
            return Ok(None);
        };
        let record = match store.get(id) {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.degrade("get", &err);
                return Ok(None);
            }
        };
        let node = match Node::from_record(&record) {
            Ok(node) => node,
            Err(err) => {
                warn!(
                    "event=node_get module=graph status=skip node_id={} error_code={} error={}",
                    id,
                    err.code(),
                    err
                );
                return Ok(None);
            }
        };
        let cached = self
            .write_cache()
            .nodes
            .entry(id.to_string())
            .or_insert(node)
            .clone();
        Ok(Some(cached))
    }

    /// Applies the supplied fields. Returns `false` when the node is absent.
    ///
    /// # Errors
    /// - `InvalidNodeData` for a blank name or an attempted tier/parent change.
    pub fn update(&self, id: &str, update: NodeUpdate) -> GraphResult<bool> {
        let NodeUpdate {
            name,
            description,
            metadata,
            status,
            tier,
            parent_id,
        } = update;

        let updated = self.modify(id, |node| {
            if tier.is_some_and(|tier| tier != node.tier()) {
                return Err(GraphError::invalid_data("tier", "tier is immutable"));
            }
            if let Some(parent_id) = &parent_id {
                if parent_id.as_deref() != node.parent_id() {
                    return Err(GraphError::invalid_data(
                        "parent_id",
                        "re-parenting is not supported by update",
                    ));
                }
            }
            let mut changed = false;
            if let Some(name) = name {
                node.rename(name)?;
                changed = true;
            }
            if let Some(description) = description {
                node.set_description(description);
                changed = true;
            }
            if let Some(metadata) = metadata {
                node.update_metadata(metadata);
                changed = true;
            }
            if let Some(status) = status {
                node.update_status(status);
                changed = true;
            }
            Ok(changed)
        })?;

        match updated {
            Some(_) => {
                debug!("event=node_update module=graph status=ok node_id={}", id);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Detaches a childless node from its parent and archives it.
    ///
    /// # Errors
    /// - `NodeNotFound` when absent.
    /// - `NodeHasChildren` carrying the child count.
    pub fn delete(&self, id: &str) -> GraphResult<()> {
        let node = self
            .reload(id)
            .ok_or_else(|| GraphError::NodeNotFound(id.to_string()))?;
        if node.child_count() > 0 {
            return Err(GraphError::NodeHasChildren {
                node_id: id.to_string(),
                child_count: node.child_count(),
            });
        }

        if let Some(parent_id) = node.parent_id() {
            let detached = self.modify(parent_id, |parent| Ok(parent.remove_child(id)))?;
            if detached.is_none() {
                warn!(
                    "event=node_delete module=graph status=warn node_id={} parent_id={} error_code=parent_missing",
                    id, parent_id
                );
            }
        }

        {
            let mut state = self.write_cache();
            state.nodes.remove(id);
            state.pending.remove(id);
            if let Some(store) = &self.durable {
                if let Err(err) = store.delete(id) {
                    mark_degraded(&mut state, "delete", &err);
                    state.pending.insert(id.to_string(), PendingWrite::Delete);
                }
            }
        }

        info!("event=node_delete module=graph status=ok node_id={}", id);
        Ok(())
    }

    /// Direct children. Empty when the node itself is missing.
    pub fn children(&self, id: &str) -> GraphResult<Vec<Node>> {
        let Some(node) = self.get(id)? else {
            return Ok(Vec::new());
        };
        let mut children = Vec::with_capacity(node.child_count());
        for child_id in node.children_ids() {
            match self.get(child_id)? {
                Some(child) => children.push(child),
                None => debug!(
                    "event=node_children module=graph status=skip node_id={} child_id={}",
                    id, child_id
                ),
            }
        }
        Ok(children)
    }

    /// Direct parent. `None` when the node or its parent is missing.
    pub fn parent(&self, id: &str) -> GraphResult<Option<Node>> {
        let Some(node) = self.get(id)? else {
            return Ok(None);
        };
        match node.parent_id() {
            Some(parent_id) => self.get(parent_id),
            None => Ok(None),
        }
    }

    /// Breadth-first descendants of `id`, excluding the node itself.
    pub fn descendants(&self, id: &str) -> GraphResult<Vec<Node>> {
        let mut visited = HashSet::from([id.to_string()]);
        let mut queue = VecDeque::from([id.to_string()]);
        let mut result = Vec::new();
        while let Some(current) = queue.pop_front() {
            for child in self.children(&current)? {
                if visited.insert(child.id().to_string()) {
                    queue.push_back(child.id().to_string());
                    result.push(child);
                }
            }
        }
        Ok(result)
    }

    /// All nodes matching `filter`, sorted by id.
    ///
    /// Merges the durable provider's records with the in-memory tier; the
    /// in-memory version wins for ids present in both.
    pub fn list_nodes(&self, filter: Option<&RecordFilter>) -> GraphResult<Vec<Node>> {
        Ok(self.load_all(filter).into_values().collect())
    }

    pub fn nodes_at_tier(&self, tier: Tier) -> GraphResult<Vec<Node>> {
        self.list_nodes(Some(&RecordFilter::new().eq("tier", tier.name())))
    }

    /// Retries writes that only reached the in-memory tier.
    ///
    /// Returns how many pending writes were flushed. The manager returns to
    /// `Durable` mode once nothing is pending.
    pub fn resync(&self) -> GraphResult<usize> {
        let Some(store) = &self.durable else {
            return Ok(0);
        };
        let pending = self.pending_writes();
        let mut flushed = 0;
        for (id, write) in pending {
            let result = match write {
                PendingWrite::Store => {
                    let cached = self.read_cache().nodes.get(&id).cloned();
                    match cached {
                        Some(node) => store.store(&node.to_record()),
                        None => Ok(()),
                    }
                }
                PendingWrite::Delete => store.delete(&id).map(|_| ()),
            };
            match result {
                Ok(()) => {
                    let mut state = self.write_cache();
                    if state.pending.get(&id) == Some(&write) {
                        state.pending.remove(&id);
                    }
                    flushed += 1;
                }
                Err(err) => {
                    warn!(
                        "event=graph_resync module=graph status=error node_id={} error={}",
                        id, err
                    );
                }
            }
        }

        let mut state = self.write_cache();
        if state.pending.is_empty() && state.degraded {
            state.degraded = false;
            info!("event=graph_resync module=graph status=ok mode=durable flushed={}", flushed);
        }
        Ok(flushed)
    }

    /// Drops cached nodes so the next reads go to the durable provider.
    ///
    /// Nodes with pending writes stay cached. No-op in ephemeral mode,
    /// where the cache is the only copy.
    pub fn clear_cache(&self) {
        if self.durable.is_none() {
            return;
        }
        let mut state = self.write_cache();
        let CacheState { nodes, pending, .. } = &mut *state;
        nodes.retain(|id, _| pending.get(id) == Some(&PendingWrite::Store));
    }

    /// Loads every node from the provider and the in-memory tier.
    ///
    /// Durable records win, except for nodes with a pending write, whose
    /// in-memory version is the newest one. When the provider is absent or
    /// cannot list, the in-memory tier is all there is. Undecodable records
    /// are skipped.
    pub(crate) fn load_all(&self, filter: Option<&RecordFilter>) -> BTreeMap<NodeId, Node> {
        let mut nodes = BTreeMap::new();
        let mut listed = false;
        if let Some(store) = &self.durable {
            match store.list(filter) {
                Ok(records) => {
                    listed = true;
                    for record in records {
                        match Node::from_record(&record) {
                            Ok(node) => {
                                nodes.insert(node.id().to_string(), node);
                            }
                            Err(err) => warn!(
                                "event=graph_load module=graph status=skip node_id={} error={}",
                                record.get("id").and_then(|id| id.as_str()).unwrap_or("-"),
                                err
                            ),
                        }
                    }
                }
                Err(err) => self.degrade("list", &err),
            }
        }

        let matches = |node: &Node| filter.map_or(true, |filter| filter.matches(&node.to_record()));
        let state = self.read_cache();
        if !listed {
            for (id, node) in &state.nodes {
                if matches(node) {
                    nodes.insert(id.clone(), node.clone());
                }
            }
        }
        for (id, write) in &state.pending {
            nodes.remove(id);
            if *write == PendingWrite::Store {
                if let Some(node) = state.nodes.get(id).filter(|node| matches(node)) {
                    nodes.insert(id.clone(), node.clone());
                }
            }
        }
        nodes
    }

    /// Applies `change` to the current version of `id` and persists it.
    ///
    /// The current version is re-read from the durable provider unless a
    /// write for `id` is still pending. `change` runs under the cache lock
    /// and must not call back into the manager. It returns whether it
    /// modified the node; unchanged nodes are not written. Returns
    /// `Ok(None)` when the node does not exist. On error the cached node is
    /// left untouched.
    pub(crate) fn modify<F>(&self, id: &str, change: F) -> GraphResult<Option<Node>>
    where
        F: FnOnce(&mut Node) -> GraphResult<bool>,
    {
        let mut state = self.write_cache();
        let Some(mut working) = self.reload_locked(&mut state, id) else {
            return Ok(None);
        };
        if change(&mut working)? {
            state.nodes.insert(id.to_string(), working.clone());
            self.write_through(&mut state, &working);
        }
        Ok(Some(working))
    }

    /// Re-reads `id` from the durable provider and refreshes the cache.
    ///
    /// Nodes with a pending write, and every node in ephemeral mode, come
    /// from the in-memory tier.
    pub(crate) fn reload(&self, id: &str) -> Option<Node> {
        self.reload_locked(&mut self.write_cache(), id)
    }

    fn reload_locked(&self, state: &mut CacheState, id: &str) -> Option<Node> {
        let Some(store) = &self.durable else {
            return state.nodes.get(id).cloned();
        };
        match state.pending.get(id) {
            Some(PendingWrite::Store) => return state.nodes.get(id).cloned(),
            Some(PendingWrite::Delete) => return None,
            None => {}
        }
        match store.get(id) {
            Ok(Some(record)) => match Node::from_record(&record) {
                Ok(node) => {
                    state.nodes.insert(id.to_string(), node.clone());
                    Some(node)
                }
                Err(err) => {
                    warn!(
                        "event=node_reload module=graph status=skip node_id={} error_code={} error={}",
                        id,
                        err.code(),
                        err
                    );
                    state.nodes.remove(id);
                    None
                }
            },
            Ok(None) => {
                state.nodes.remove(id);
                None
            }
            Err(err) => {
                mark_degraded(state, "get", &err);
                state.nodes.get(id).cloned()
            }
        }
    }

    /// Puts `node` in the in-memory tier and writes it through.
    pub(crate) fn commit(&self, node: &Node) {
        let mut state = self.write_cache();
        state.nodes.insert(node.id().to_string(), node.clone());
        self.write_through(&mut state, node);
    }

    /// Persists `node` while the caller holds the cache lock, so the durable
    /// copy is written in the same order as the in-memory one.
    fn write_through(&self, state: &mut CacheState, node: &Node) {
        let Some(store) = &self.durable else {
            return;
        };
        match store.store(&node.to_record()) {
            Ok(()) => {
                state.pending.remove(node.id());
                if state.degraded && state.pending.is_empty() {
                    state.degraded = false;
                    info!("event=graph_recover module=graph status=ok mode=durable");
                }
            }
            Err(err) => {
                mark_degraded(state, "store", &err);
                state
                    .pending
                    .insert(node.id().to_string(), PendingWrite::Store);
            }
        }
    }

    fn degrade(&self, operation: &str, err: &StorageError) {
        mark_degraded(&mut self.write_cache(), operation, err);
    }

    fn read_cache(&self) -> RwLockReadGuard<'_, CacheState> {
        self.cache.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_cache(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.cache.write().unwrap_or_else(PoisonError::into_inner)
    }
}

fn mark_degraded(state: &mut CacheState, operation: &str, err: &StorageError) {
    if !state.degraded {
        error!(
            "event=graph_degraded module=graph status=error operation={} node_id={} error={}",
            operation,
            err.node_id.as_deref().unwrap_or("-"),
            err
        );
    } else {
        warn!(
            "event=graph_degraded module=graph status=warn operation={} node_id={} error={}",
            operation,
            err.node_id.as_deref().unwrap_or("-"),
            err
        );
    }
    state.degraded = true;
}
