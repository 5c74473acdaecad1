//! Placement without eviction.

use tracing::debug;

use preemptor_core::NodeId;
use preemptor_state::{ClusterStateView, WorkloadEntry};

use crate::constraints::ConstraintEvaluator;
use crate::ledger::{Excluded, ResourceLedger};

/// First candidate node, in identity order, where `pending` fits and all
/// constraints hold as the cluster stands. Unknown and cordoned
/// candidates are skipped.
pub fn find_fit(
    view: &ClusterStateView,
    pending: &WorkloadEntry,
    candidates: &[NodeId],
) -> Option<NodeId> {
    let ledger = ResourceLedger::new(view);
    let constraints = ConstraintEvaluator::new(view);
    let none = Excluded::new();

    let mut ordered: Vec<&NodeId> = candidates.iter().collect();
    ordered.sort();
    ordered.dedup();

    let found = ordered.into_iter().find(|node| {
        view.node(node).is_some_and(|n| !n.unschedulable)
            && ledger.would_fit(node, &pending.workload.requests, &none)
            && constraints.permits(node, &pending.workload, &none)
    });

    if let Some(node) = found {
        debug!(workload = %pending.id(), %node, "fits without preemption");
    }
    found.cloned()
}
