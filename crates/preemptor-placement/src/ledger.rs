//! Per-node resource accounting.
//!
//! Allocation is never stored: it is the sum of the requests of the
//! workloads holding a reservation on the node in the current view.

use std::collections::BTreeSet;

use preemptor_core::{ResourceVector, WorkloadId};
use preemptor_state::ClusterStateView;

/// Workloads treated as already removed from their node.
pub type Excluded = BTreeSet<WorkloadId>;

/// Read-only resource ledger over a cluster view.
#[derive(Clone, Copy)]
pub struct ResourceLedger<'a> {
    view: &'a ClusterStateView,
}

impl<'a> ResourceLedger<'a> {
    pub fn new(view: &'a ClusterStateView) -> Self {
        Self { view }
    }

    /// Published capacity of `node`; empty when the node is unknown.
    pub fn capacity(&self, node: &str) -> ResourceVector {
        self.view
            .node(node)
            .map(|n| n.capacity.clone())
            .unwrap_or_default()
    }

    /// Sum of requests held on `node`, skipping `excluding`.
    pub fn allocated(&self, node: &str, excluding: &Excluded) -> ResourceVector {
        let mut total = ResourceVector::new();
        for entry in self.view.workloads_on(node) {
            if !excluding.contains(entry.id()) {
                total.add(&entry.workload.requests);
            }
        }
        total
    }

    /// Capacity left on `node`, clamped at zero per dimension.
    pub fn available(&self, node: &str) -> ResourceVector {
        self.capacity(node)
            .saturating_sub(&self.allocated(node, &Excluded::new()))
    }

    /// Whether `request` fits on `node` once every workload in
    /// `excluding` is gone. Unknown nodes fit nothing.
    pub fn would_fit(&self, node: &str, request: &ResourceVector, excluding: &Excluded) -> bool {
        let Some(n) = self.view.node(node) else {
            return false;
        };
        let allocated = self.allocated(node, excluding);
        request
            .iter()
            .all(|(name, qty)| qty <= n.capacity.get(name) - allocated.get(name))
    }
}
