//! Scheduler error types.

use std::collections::BTreeMap;

use thiserror::Error;

use preemptor_core::{NodeId, WorkloadId};
use preemptor_placement::Infeasible;

/// Errors that abort a scheduling pass.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("state store error: {0}")]
    State(#[from] preemptor_state::StateError),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;

/// No candidate node can host the workload, even with preemption.
///
/// A normal outcome of an attempt, not a failure of the scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{workload} is unschedulable on all {} candidate nodes", .reasons.len())]
pub struct Unschedulable {
    pub workload: WorkloadId,
    /// Why each candidate was rejected.
    pub reasons: BTreeMap<NodeId, Infeasible>,
}
