//! Path resolution and graph consistency check/repair.
//!
//! # Responsibility
//! - Walk parent chains with cycle detection.
//! - Detect and optionally repair broken parent/child agreement, dangling
//!   references, cycles and tier-order violations across the whole graph.
//!
//! # Invariants
//! - A scan starts from the durable provider, not from cached nodes.
//!   Every repair re-reads the nodes involved and re-checks the condition
//!   first, so the scan is safe to run while other writers are active.
//! - Records that cannot be decoded count as missing nodes.
//! - After a repairing run completes uninterrupted, a second run reports
//!   zero inconsistencies.
//! - Scans stop between per-node iterations when interrupted, never inside
//!   one node's repair.

use crate::error::{GraphError, GraphResult};
use crate::interrupt::Interrupt;
use crate::model::node::{Node, NodeId};
use crate::model::tier::Tier;
use crate::service::graph_service::GraphManager;
use log::{info, warn};
use std::collections::HashSet;
use std::time::Instant;

/// One detected violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsistencyIssue {
    /// `parent_id` lists a child that does not exist.
    MissingChild { parent_id: NodeId, child_id: NodeId },
    /// A listed child points to another parent, or to none.
    ChildParentMismatch {
        parent_id: NodeId,
        child_id: NodeId,
        child_parent_id: Option<NodeId>,
    },
    /// `node_id` declares a parent that does not exist.
    DanglingParent { node_id: NodeId, parent_id: NodeId },
    /// The declared parent does not list the node back.
    UnlistedChild { parent_id: NodeId, child_id: NodeId },
    /// A parent chain loops. `node_id -> parent_id` is the link chosen to
    /// break it; `path` is the walk that found the loop.
    Cycle {
        node_id: NodeId,
        parent_id: NodeId,
        path: Vec<NodeId>,
    },
    /// The resolved parent does not sit exactly one tier above.
    TierMismatch {
        node_id: NodeId,
        parent_id: NodeId,
        tier: Tier,
        parent_tier: Tier,
    },
}

impl ConsistencyIssue {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingChild { .. } => "missing_child",
            Self::ChildParentMismatch { .. } => "child_parent_mismatch",
            Self::DanglingParent { .. } => "dangling_parent",
            Self::UnlistedChild { .. } => "unlisted_child",
            Self::Cycle { .. } => "cycle",
            Self::TierMismatch { .. } => "tier_mismatch",
        }
    }
}

/// Outcome of a consistency scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsistencyReport {
    pub checked: usize,
    pub inconsistencies: usize,
    pub repaired: usize,
    pub interrupted: bool,
    pub issues: Vec<ConsistencyIssue>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.inconsistencies == 0
    }

    fn record(&mut self, issue: ConsistencyIssue, repair: bool, repaired: bool) {
        warn!(
            "event=consistency_issue module=consistency status={} code={} issue={:?}",
            if repaired {
                "repaired"
            } else if repair {
                "unrepaired"
            } else {
                "found"
            },
            issue.code(),
            issue
        );
        self.inconsistencies += 1;
        if repaired {
            self.repaired += 1;
        }
        self.issues.push(issue);
    }
}

impl GraphManager {
    /// Nodes from the tier-1 end of the chain down to `id`.
    ///
    /// A missing start node yields an empty path; a missing parent
    /// mid-walk stops the walk and returns what was collected.
    ///
    /// # Errors
    /// - `CircularReference` when the chain revisits a node. Its `path`
    ///   holds the ids collected so far, starting node first.
    pub fn path(&self, id: &str) -> GraphResult<Vec<Node>> {
        let Some(start) = self.get(id)? else {
            return Ok(Vec::new());
        };
        let mut visited = HashSet::from([start.id().to_string()]);
        let mut collected = vec![start];

        loop {
            let current = &collected[collected.len() - 1];
            let Some(parent_id) = current.parent_id() else {
                break;
            };
            if visited.contains(parent_id) {
                return Err(GraphError::CircularReference {
                    node_id: current.id().to_string(),
                    parent_id: parent_id.to_string(),
                    path: collected.iter().map(|node| node.id().to_string()).collect(),
                });
            }
            let parent_id = parent_id.to_string();
            match self.get(&parent_id)? {
                Some(parent) => {
                    visited.insert(parent_id);
                    collected.push(parent);
                }
                None => {
                    warn!(
                        "event=node_path module=consistency status=partial node_id={} missing_parent_id={}",
                        current.id(),
                        parent_id
                    );
                    break;
                }
            }
        }

        collected.reverse();
        Ok(collected)
    }

    /// Full-graph consistency scan. See [`Self::check_consistency_with`].
    pub fn check_consistency(&self, repair: bool) -> GraphResult<ConsistencyReport> {
        self.check_consistency_with(repair, &Interrupt::new())
    }

    /// Full-graph consistency scan, interruptible between nodes.
    ///
    /// Per node, in order: (a) listed children exist, (b) listed children
    /// point back, (c) the declared parent exists, (d) the parent lists the
    /// node. Then every node's path is walked for cycles, and finally each
    /// resolved parent is checked to sit one tier above.
    ///
    /// A cycle is broken at the first link, walking upward from where the
    /// loop closes, whose parent is not exactly one tier above the child.
    /// Every loop has such a link since tiers strictly decrease along valid
    /// links.
    pub fn check_consistency_with(
        &self,
        repair: bool,
        interrupt: &Interrupt,
    ) -> GraphResult<ConsistencyReport> {
        let started_at = Instant::now();
        self.clear_cache();
        let ids: Vec<NodeId> = self.load_all(None).into_keys().collect();
        let mut report = ConsistencyReport::default();

        for id in &ids {
            if interrupt.is_raised() {
                report.interrupted = true;
                break;
            }
            if self.get(id)?.is_none() {
                continue;
            }
            report.checked += 1;
            self.check_children_exist(id, repair, &mut report)?;
            self.check_children_point_back(id, repair, &mut report)?;
            self.check_parent_link(id, repair, &mut report)?;
        }

        if !report.interrupted {
            for id in &ids {
                if interrupt.is_raised() {
                    report.interrupted = true;
                    break;
                }
                self.check_cycle(id, repair, &mut report)?;
            }
        }

        if !report.interrupted {
            for id in &ids {
                if interrupt.is_raised() {
                    report.interrupted = true;
                    break;
                }
                self.check_tier_order(id, repair, &mut report)?;
            }
        }

        info!(
            "event=consistency_check module=consistency status=ok repair={} checked={} inconsistencies={} repaired={} interrupted={} duration_ms={}",
            repair,
            report.checked,
            report.inconsistencies,
            report.repaired,
            report.interrupted,
            started_at.elapsed().as_millis()
        );
        Ok(report)
    }

    // (a)
    fn check_children_exist(
        &self,
        id: &str,
        repair: bool,
        report: &mut ConsistencyReport,
    ) -> GraphResult<()> {
        let Some(node) = self.get(id)? else {
            return Ok(());
        };
        for child_id in node.children_ids() {
            if self.get(child_id)?.is_some() {
                continue;
            }
            let repaired = repair
                && self.reload(child_id).is_none()
                && self
                    .modify(id, |node| Ok(node.remove_child(child_id)))?
                    .is_some_and(|node| !node.has_child(child_id));
            report.record(
                ConsistencyIssue::MissingChild {
                    parent_id: id.to_string(),
                    child_id: child_id.clone(),
                },
                repair,
                repaired,
            );
        }
        Ok(())
    }

    // (b)
    fn check_children_point_back(
        &self,
        id: &str,
        repair: bool,
        report: &mut ConsistencyReport,
    ) -> GraphResult<()> {
        let Some(node) = self.get(id)? else {
            return Ok(());
        };
        for child_id in node.children_ids() {
            let Some(child) = self.get(child_id)? else {
                continue;
            };
            if child.parent_id() == Some(id) {
                continue;
            }
            let child_parent_id = child.parent_id().map(str::to_string);

            let mut repaired = false;
            let still_mismatched = repair
                && self
                    .reload(child_id)
                    .is_some_and(|child| child.parent_id() != Some(id));
            if still_mismatched {
                repaired = match &child_parent_id {
                    None => {
                        let adopted = self.modify(child_id, |child| {
                            if child.parent_id().is_some() {
                                return Ok(false);
                            }
                            child.set_parent_id(Some(id.to_string()));
                            Ok(true)
                        })?;
                        adopted.is_some_and(|child| child.parent_id() == Some(id))
                    }
                    Some(_) => {
                        let released = self.modify(id, |node| Ok(node.remove_child(child_id)))?;
                        released.is_some_and(|node| !node.has_child(child_id))
                    }
                };
            }
            report.record(
                ConsistencyIssue::ChildParentMismatch {
                    parent_id: id.to_string(),
                    child_id: child_id.clone(),
                    child_parent_id,
                },
                repair,
                repaired,
            );
        }
        Ok(())
    }

    // (c) + (d)
    fn check_parent_link(
        &self,
        id: &str,
        repair: bool,
        report: &mut ConsistencyReport,
    ) -> GraphResult<()> {
        let Some(node) = self.get(id)? else {
            return Ok(());
        };
        let Some(parent_id) = node.parent_id().map(str::to_string) else {
            return Ok(());
        };

        match self.get(&parent_id)? {
            None => {
                let repaired = repair && self.clear_dangling_parent(id, &parent_id)?;
                report.record(
                    ConsistencyIssue::DanglingParent {
                        node_id: id.to_string(),
                        parent_id,
                    },
                    repair,
                    repaired,
                );
            }
            Some(parent) if !parent.has_child(id) => {
                let repaired = repair
                    && self
                        .reload(id)
                        .is_some_and(|node| node.parent_id() == Some(parent_id.as_str()))
                    && self
                        .modify(&parent_id, |parent| {
                            parent.add_child(id);
                            Ok(true)
                        })?
                        .is_some_and(|parent| parent.has_child(id));
                report.record(
                    ConsistencyIssue::UnlistedChild {
                        parent_id,
                        child_id: id.to_string(),
                    },
                    repair,
                    repaired,
                );
            }
            Some(_) => {}
        }
        Ok(())
    }

    fn check_cycle(
        &self,
        id: &str,
        repair: bool,
        report: &mut ConsistencyReport,
    ) -> GraphResult<()> {
        match self.path(id) {
            Ok(_) => Ok(()),
            Err(GraphError::CircularReference {
                node_id,
                parent_id,
                path,
            }) => {
                let (node_id, parent_id) = self.cycle_break_point(&path, node_id, parent_id)?;
                let repaired = repair && self.detach_from_parent(&node_id, &parent_id)?;
                report.record(
                    ConsistencyIssue::Cycle {
                        node_id,
                        parent_id,
                        path,
                    },
                    repair,
                    repaired,
                );
                Ok(())
            }
            Err(other) => Err(other),
        }
    }

    /// Picks the link to cut in the loop closed by `closing_id -> closing_parent_id`.
    ///
    /// `path` runs upward from the scanned node; the loop is the part from
    /// `closing_parent_id` to its end. Falls back to the closing link.
    fn cycle_break_point(
        &self,
        path: &[NodeId],
        closing_id: NodeId,
        closing_parent_id: NodeId,
    ) -> GraphResult<(NodeId, NodeId)> {
        let start = path
            .iter()
            .position(|id| *id == closing_parent_id)
            .unwrap_or(0);
        let cycle = &path[start..];
        for (index, child_id) in cycle.iter().enumerate() {
            let parent_id = cycle.get(index + 1).unwrap_or(&closing_parent_id);
            let (Some(child), Some(parent)) = (self.get(child_id)?, self.get(parent_id)?) else {
                continue;
            };
            if child.tier().parent_tier() != Some(parent.tier()) {
                return Ok((child_id.clone(), parent_id.clone()));
            }
        }
        Ok((closing_id, closing_parent_id))
    }

    fn check_tier_order(
        &self,
        id: &str,
        repair: bool,
        report: &mut ConsistencyReport,
    ) -> GraphResult<()> {
        let Some(node) = self.get(id)? else {
            return Ok(());
        };
        let Some(parent_id) = node.parent_id() else {
            return Ok(());
        };
        let Some(parent) = self.get(parent_id)? else {
            return Ok(());
        };
        if node.tier().parent_tier() == Some(parent.tier()) {
            return Ok(());
        }

        let repaired = repair && self.detach_from_parent(id, parent_id)?;
        report.record(
            ConsistencyIssue::TierMismatch {
                node_id: id.to_string(),
                parent_id: parent_id.to_string(),
                tier: node.tier(),
                parent_tier: parent.tier(),
            },
            repair,
            repaired,
        );
        Ok(())
    }

    fn clear_dangling_parent(&self, id: &str, parent_id: &str) -> GraphResult<bool> {
        if self.reload(parent_id).is_some() {
            return Ok(false);
        }
        let cleared = self.modify(id, |node| {
            if node.parent_id() != Some(parent_id) {
                return Ok(false);
            }
            node.set_parent_id(None);
            Ok(true)
        })?;
        Ok(cleared.is_some_and(|node| node.parent_id().is_none()))
    }

    /// Clears `id`'s parent reference and drops `id` from that parent's
    /// children, keeping both sides in agreement.
    fn detach_from_parent(&self, id: &str, parent_id: &str) -> GraphResult<bool> {
        let cleared = self.modify(id, |node| {
            if node.parent_id() != Some(parent_id) {
                return Ok(false);
            }
            node.set_parent_id(None);
            Ok(true)
        })?;
        self.modify(parent_id, |parent| Ok(parent.remove_child(id)))?;
        Ok(cleared.is_some_and(|node| node.parent_id().is_none()))
    }
}
