//! Victim selection: the smallest set of lower-priority workloads whose
//! eviction lets a pending workload run on a given node.
//!
//! The selector is greedy-then-reinstate:
//!
//! 1. Collect every Bound workload on the node that the pending workload
//!    strictly outranks, lowest first.
//! 2. Give up on the node if evicting all of them still is not enough.
//! 3. Evict in ascending order until the placement becomes feasible.
//! 4. Walk the chosen victims back from the last one added, reinstating
//!    each one whose eviction turns out not to be needed.
//!
//! Once step 2 passes, feasibility only gets easier as more of the
//! collected workloads are removed, so after step 4 every remaining
//! victim is individually required.

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use preemptor_core::{NodeId, Phase, WorkloadId};
use preemptor_state::{ClusterStateView, WorkloadEntry};

use crate::constraints::{ConstraintEvaluator, ConstraintViolation};
use crate::ledger::{Excluded, ResourceLedger};
use crate::priority::PriorityIndex;

/// Workloads to evict from one node, lowest priority first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EvictionDecision {
    pub node: NodeId,
    pub victims: Vec<WorkloadId>,
    /// Sum of the victims' priority weights.
    pub priority_sum: i64,
}

impl EvictionDecision {
    pub fn is_empty(&self) -> bool {
        self.victims.is_empty()
    }

    pub fn len(&self) -> usize {
        self.victims.len()
    }

    pub fn contains(&self, id: &WorkloadId) -> bool {
        self.victims.contains(id)
    }
}

/// Why a node cannot host a pending workload under any eviction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Infeasible {
    #[error("node {0} is not in the current view")]
    NodeNotFound(NodeId),

    #[error("node {0} is cordoned")]
    NodeUnschedulable(NodeId),

    #[error("node {node} rejects the workload: {violation}")]
    NodeAffinityMismatch {
        node: NodeId,
        violation: ConstraintViolation,
    },

    #[error("node {0} lacks capacity even after evicting every lower-priority workload")]
    InsufficientResources(NodeId),

    #[error("node {node} stays in violation after evicting every lower-priority workload: {violation}")]
    ConstraintsUnsatisfiable {
        node: NodeId,
        violation: ConstraintViolation,
    },
}

/// Computes eviction decisions against a single view. Pure: it never
/// touches cluster state.
#[derive(Clone, Copy)]
pub struct VictimSelector<'a> {
    view: &'a ClusterStateView,
    ledger: ResourceLedger<'a>,
    constraints: ConstraintEvaluator<'a>,
}

impl<'a> VictimSelector<'a> {
    pub fn new(view: &'a ClusterStateView) -> Self {
        Self {
            view,
            ledger: ResourceLedger::new(view),
            constraints: ConstraintEvaluator::new(view),
        }
    }

    /// Eviction decision for `pending` on `node`, or `None` when the node
    /// is infeasible. An empty decision means the workload fits as is.
    pub fn select_victims(&self, pending: &WorkloadEntry, node: &str) -> Option<EvictionDecision> {
        match self.evaluate(pending, node) {
            Ok(decision) => Some(decision),
            Err(reason) => {
                debug!(workload = %pending.id(), %node, %reason, "node infeasible for preemption");
                None
            }
        }
    }

    /// Like [`select_victims`](Self::select_victims) but explains a
    /// negative result.
    pub fn evaluate(&self, pending: &WorkloadEntry, node: &str) -> Result<EvictionDecision, Infeasible> {
        let target = self
            .view
            .node(node)
            .ok_or_else(|| Infeasible::NodeNotFound(node.to_string()))?;
        if target.unschedulable {
            return Err(Infeasible::NodeUnschedulable(node.to_string()));
        }
        self.constraints
            .check_node(target, &pending.workload)
            .map_err(|violation| Infeasible::NodeAffinityMismatch {
                node: node.to_string(),
                violation,
            })?;

        let mut removable: Vec<&'a WorkloadEntry> = self
            .view
            .workloads_on(node)
            .filter(|e| {
                e.workload.phase == Phase::Bound
                    && e.id() != pending.id()
                    && PriorityIndex::can_preempt(pending.priority, e.priority)
            })
            .collect();
        PriorityIndex::sort_ascending(&mut removable);

        let everything: Excluded = removable.iter().map(|e| e.id().clone()).collect();
        if !self
            .ledger
            .would_fit(node, &pending.workload.requests, &everything)
        {
            return Err(Infeasible::InsufficientResources(node.to_string()));
        }
        self.constraints
            .check(node, &pending.workload, &everything)
            .map_err(|violation| Infeasible::ConstraintsUnsatisfiable {
                node: node.to_string(),
                violation,
            })?;

        // Greedy, lowest first.
        let mut excluded = Excluded::new();
        let mut chosen: Vec<&'a WorkloadEntry> = Vec::new();
        for &entry in &removable {
            if self.feasible(pending, node, &excluded) {
                break;
            }
            excluded.insert(entry.id().clone());
            chosen.push(entry);
        }

        // Reinstate, most recently added first.
        for i in (0..chosen.len()).rev() {
            let entry = chosen[i];
            excluded.remove(entry.id());
            if self.feasible(pending, node, &excluded) {
                debug!(workload = %pending.id(), victim = %entry.id(), "victim not needed, reinstated");
                chosen.remove(i);
            } else {
                excluded.insert(entry.id().clone());
            }
        }

        let decision = EvictionDecision {
            node: node.to_string(),
            priority_sum: chosen.iter().map(|e| e.priority.weight()).sum(),
            victims: chosen.into_iter().map(|e| e.id().clone()).collect(),
        };
        debug!(
            workload = %pending.id(),
            %node,
            victims = decision.len(),
            priority_sum = decision.priority_sum,
            "eviction set computed"
        );
        Ok(decision)
    }

    fn feasible(&self, pending: &WorkloadEntry, node: &str, excluded: &Excluded) -> bool {
        self.ledger
            .would_fit(node, &pending.workload.requests, excluded)
            && self.constraints.permits(node, &pending.workload, excluded)
    }
}
