//! Collaborator interfaces the engine consumes.
//!
//! Cluster storage, watch transport and the kubelet side all live behind
//! these traits. The engine lists through [`ClusterSource`] and mutates
//! only through [`WorkloadEvictor`] and [`ClusterWriter`].

use preemptor_core::{Node, Workload, WorkloadId};

use crate::error::StateResult;

/// Read access to the current cluster objects.
pub trait ClusterSource {
    fn list_nodes(&self) -> StateResult<Vec<Node>>;
    fn list_workloads(&self) -> StateResult<Vec<Workload>>;
}

/// Delete capability. Eviction is fire-and-forget: the workload moves to
/// Terminating and leaves the cluster later, outside the engine.
///
/// Implementations return `StateError::NotFound` when the workload is
/// already gone.
pub trait WorkloadEvictor {
    fn evict(&self, id: &WorkloadId) -> StateResult<Workload>;
}

/// Placement writes: binding and nomination.
pub trait ClusterWriter {
    fn bind(&self, id: &WorkloadId, node: &str) -> StateResult<Workload>;
    fn nominate(&self, id: &WorkloadId, node: Option<&str>) -> StateResult<Workload>;
}
