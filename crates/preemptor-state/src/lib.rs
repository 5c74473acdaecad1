//! preemptor-state: cluster state as seen by the preemption engine.
//!
//! The engine only ever reads cluster state through the collaborator
//! traits in [`cluster`] and only ever reads it from a
//! [`ClusterStateView`] snapshot taken once per scheduling attempt.
//!
//! # Architecture
//!
//! ```text
//! ClusterSource ──list──▶ ClusterStateView ◀──apply── WatchEvent
//!       ▲                      (snapshot)
//!       │
//! StateStore (redb)  ◀── WorkloadEvictor / ClusterWriter
//! ```
//!
//! [`StateStore`] is the reference backend: all domain types are
//! JSON-serialized into redb's `&[u8]` value columns. It is `Clone`,
//! `Send` and `Sync` (backed by `Arc<Database>`).

pub mod cluster;
pub mod error;
pub mod store;
pub mod tables;
pub mod view;

pub use cluster::{ClusterSource, ClusterWriter, WorkloadEvictor};
pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use view::{ClusterStateView, WatchEvent, WorkloadEntry};
