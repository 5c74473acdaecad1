//! preemptor-scheduler: the single writer of scheduling decisions.
//!
//! The placement crate only computes. This crate turns its answers into
//! cluster mutations: binds, evictions and nominations. It is the piece
//! that drives a pending workload through
//! `Pending → victims terminating → Bound`.
//!
//! # Architecture
//!
//! ```text
//! Scheduler (one pass per tick)
//!   ├── ClusterStateView::load (one snapshot per pass)
//!   ├── find_fit            → bind
//!   └── PreemptionCoordinator
//!         ├── VictimSelector per candidate node
//!         └── commit        → evict victims, nominate node
//! ```

pub mod coordinator;
pub mod error;
pub mod scheduler;

pub use coordinator::{CommitOutcome, PreemptionCoordinator};
pub use error::{SchedulerError, SchedulerResult, Unschedulable};
pub use scheduler::{PassReport, ScheduleOutcome, ScheduleRecord, Scheduler};
