//! Preemptor placement engine: resource accounting, constraints,
//! priority ordering and victim selection.
//!
//! Everything in this crate is a pure function of a
//! [`ClusterStateView`](preemptor_state::ClusterStateView): nothing here
//! mutates cluster state. Decisions are handed to the scheduler crate,
//! which is the single writer.
//!
//! # Components
//!
//! - **`ledger`**: Per-node allocated/available resources, fit checks
//! - **`constraints`**: Node affinity, pod affinity and anti-affinity
//! - **`priority`**: Total order over workloads, preemption eligibility
//! - **`victims`**: Minimal eviction set for a pending workload on a node
//! - **`fit`**: Plain placement feasibility, no evictions

pub mod constraints;
pub mod fit;
pub mod ledger;
pub mod priority;
pub mod victims;

pub use constraints::{ConstraintEvaluator, ConstraintViolation};
pub use fit::find_fit;
pub use ledger::{Excluded, ResourceLedger};
pub use priority::{PriorityIndex, PriorityKey};
pub use victims::{EvictionDecision, Infeasible, VictimSelector};
