//! preemptor-core: shared domain types for the preemption engine.
//!
//! Everything the other crates agree on lives here: workload and node
//! records, resource vectors, label selectors, the priority model and
//! the TOML scheduler config.

pub mod config;
pub mod labels;
pub mod priority;
pub mod types;

pub use config::{PriorityClassConfig, SchedulerConfig, SchedulerSettings};
pub use labels::{LabelRequirement, LabelSelector, Labels, Operator};
pub use priority::{
    HIGHEST_USER_DEFINABLE_PRIORITY, Priority, PriorityClass, PriorityClassError,
    PriorityClassRegistry, PriorityResolver, SYSTEM_CLUSTER_CRITICAL, SYSTEM_NODE_CRITICAL,
    SystemCritical,
};
pub use types::*;
