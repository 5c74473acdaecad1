//! ClusterStateView: the read snapshot one scheduling attempt works on.
//!
//! A view is built by listing the collaborator once. Priorities are
//! resolved exactly once per workload while building, so every
//! comparison inside an attempt sees the same total order. The view can
//! then be kept current by applying watch events; events older than what
//! the view already holds are dropped. Deleted objects leave a tombstone
//! so a late upsert cannot bring them back.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, warn};

use preemptor_core::{Node, NodeId, Phase, Priority, PriorityResolver, Workload, WorkloadId};

use crate::cluster::ClusterSource;
use crate::error::StateResult;

/// A workload together with its resolved priority.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkloadEntry {
    pub workload: Workload,
    pub priority: Priority,
}

impl WorkloadEntry {
    pub fn id(&self) -> &WorkloadId {
        &self.workload.id
    }

    /// Node this workload holds a reservation on, if any.
    pub fn occupied_node(&self) -> Option<&str> {
        if self.workload.phase.occupies_node() {
            self.workload.node.as_deref()
        } else {
            None
        }
    }
}

/// An update delivered by the external observation stream.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    WorkloadUpserted(Workload),
    WorkloadDeleted { id: WorkloadId, resource_version: u64 },
    NodeUpserted(Node),
    NodeDeleted { id: NodeId, resource_version: u64 },
}

/// Point-in-time view of nodes and workloads.
#[derive(Debug, Clone, Default)]
pub struct ClusterStateView {
    nodes: BTreeMap<NodeId, Node>,
    workloads: BTreeMap<WorkloadId, WorkloadEntry>,
    /// Occupying (Bound or Terminating) workloads per node.
    by_node: BTreeMap<NodeId, BTreeSet<WorkloadId>>,
    /// Resource version each deleted workload was last seen at.
    deleted_workloads: BTreeMap<WorkloadId, u64>,
    deleted_nodes: BTreeMap<NodeId, u64>,
}

impl ClusterStateView {
    /// List the cluster once and build a view from the result.
    pub fn load(
        source: &dyn ClusterSource,
        resolver: &dyn PriorityResolver,
    ) -> StateResult<Self> {
        let nodes = source.list_nodes()?;
        let workloads = source.list_workloads()?;
        let view = Self::from_parts(nodes, workloads, resolver);
        debug!(
            nodes = view.nodes.len(),
            workloads = view.workloads.len(),
            "cluster state view loaded"
        );
        Ok(view)
    }

    /// Build a view from already-listed objects. Gone workloads are dropped.
    pub fn from_parts(
        nodes: impl IntoIterator<Item = Node>,
        workloads: impl IntoIterator<Item = Workload>,
        resolver: &dyn PriorityResolver,
    ) -> Self {
        let mut view = Self {
            nodes: nodes.into_iter().map(|n| (n.id.clone(), n)).collect(),
            ..Self::default()
        };
        for workload in workloads {
            view.insert_workload(workload, resolver);
        }
        view
    }

    fn insert_workload(&mut self, workload: Workload, resolver: &dyn PriorityResolver) {
        if workload.phase == Phase::Gone {
            return;
        }
        let priority = Priority::of(&workload, resolver);
        if !priority.is_resolved() {
            warn!(
                workload = %workload.id,
                class = ?workload.priority_class_name,
                "invalid priority reference, ordering workload lowest"
            );
        }
        self.remove_workload(&workload.id);
        let entry = WorkloadEntry { workload, priority };
        if let Some(node) = entry.occupied_node() {
            self.by_node
                .entry(node.to_string())
                .or_default()
                .insert(entry.id().clone());
        }
        self.workloads.insert(entry.id().clone(), entry);
    }

    fn remove_workload(&mut self, id: &WorkloadId) -> Option<WorkloadEntry> {
        let entry = self.workloads.remove(id)?;
        if let Some(node) = entry.occupied_node() {
            if let Some(set) = self.by_node.get_mut(node) {
                set.remove(id);
                if set.is_empty() {
                    self.by_node.remove(node);
                }
            }
        }
        Some(entry)
    }

    /// Apply one watch event. Returns false when the event was stale or
    /// changed nothing.
    ///
    /// An upsert is stale at or below the version the view holds, or the
    /// version of a recorded deletion. A delete carries the version of the
    /// last state its object had, so it applies at or above the version the
    /// view holds and is stale only below it.
    pub fn apply(&mut self, event: WatchEvent, resolver: &dyn PriorityResolver) -> bool {
        match event {
            WatchEvent::WorkloadUpserted(workload) => {
                let held = self
                    .workloads
                    .get(&workload.id)
                    .map(|current| current.workload.resource_version)
                    .or_else(|| self.deleted_workloads.get(&workload.id).copied());
                if held.is_some_and(|held| workload.resource_version <= held) {
                    debug!(workload = %workload.id, "stale workload event ignored");
                    return false;
                }
                self.deleted_workloads.remove(&workload.id);
                if workload.phase == Phase::Gone {
                    self.remove_workload(&workload.id);
                    self.deleted_workloads
                        .insert(workload.id, workload.resource_version);
                } else {
                    self.insert_workload(workload, resolver);
                }
                true
            }
            WatchEvent::WorkloadDeleted { id, resource_version } => {
                match self.workloads.get(&id) {
                    Some(current) if current.workload.resource_version > resource_version => {
                        debug!(workload = %id, "stale workload delete ignored");
                        false
                    }
                    Some(_) => {
                        self.remove_workload(&id);
                        self.deleted_workloads.insert(id, resource_version);
                        true
                    }
                    None => {
                        let tombstone = self.deleted_workloads.entry(id).or_insert(0);
                        *tombstone = (*tombstone).max(resource_version);
                        false
                    }
                }
            }
            WatchEvent::NodeUpserted(node) => {
                let held = self
                    .nodes
                    .get(&node.id)
                    .map(|current| current.resource_version)
                    .or_else(|| self.deleted_nodes.get(&node.id).copied());
                if held.is_some_and(|held| node.resource_version <= held) {
                    debug!(node = %node.id, "stale node event ignored");
                    return false;
                }
                self.deleted_nodes.remove(&node.id);
                self.nodes.insert(node.id.clone(), node);
                true
            }
            WatchEvent::NodeDeleted { id, resource_version } => match self.nodes.get(&id) {
                Some(current) if current.resource_version > resource_version => {
                    debug!(node = %id, "stale node delete ignored");
                    false
                }
                Some(_) => {
                    self.nodes.remove(&id);
                    self.deleted_nodes.insert(id, resource_version);
                    true
                }
                None => {
                    let tombstone = self.deleted_nodes.entry(id).or_insert(0);
                    *tombstone = (*tombstone).max(resource_version);
                    false
                }
            },
        }
    }

    // ── Queries ────────────────────────────────────────────────────

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// All nodes, ordered by identity.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Nodes that accept placements, ordered by identity.
    pub fn schedulable_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values().filter(|n| !n.unschedulable)
    }

    pub fn workload(&self, id: &WorkloadId) -> Option<&WorkloadEntry> {
        self.workloads.get(id)
    }

    pub fn workloads(&self) -> impl Iterator<Item = &WorkloadEntry> {
        self.workloads.values()
    }

    /// Workloads holding a reservation on `node`.
    pub fn workloads_on<'a>(&'a self, node: &str) -> impl Iterator<Item = &'a WorkloadEntry> + 'a {
        self.by_node
            .get(node)
            .into_iter()
            .flatten()
            .filter_map(|id| self.workloads.get(id))
    }

    /// Every workload holding a reservation on some node.
    pub fn occupying(&self) -> impl Iterator<Item = &WorkloadEntry> {
        self.workloads
            .values()
            .filter(|e| e.occupied_node().is_some())
    }

    /// Whether any workload on `node` is still terminating.
    pub fn has_terminating_on(&self, node: &str) -> bool {
        self.workloads_on(node)
            .any(|e| e.workload.phase == Phase::Terminating)
    }

    /// Pending workloads, highest priority first; older before newer on
    /// equal priority, then by identity.
    pub fn pending(&self) -> Vec<&WorkloadEntry> {
        let mut pending: Vec<&WorkloadEntry> = self
            .workloads
            .values()
            .filter(|e| e.workload.phase == Phase::Pending)
            .collect();
        pending.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then(a.workload.created_at.cmp(&b.workload.created_at))
                .then_with(|| a.id().cmp(b.id()))
        });
        pending
    }
}
