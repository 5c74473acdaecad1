//! Domain types for the preemption engine.
//!
//! These types mirror what the external cluster-state collaborator
//! publishes: workloads, nodes and their resource vectors. All types are
//! serializable to/from JSON for storage and TOML for scenario files.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::labels::{LabelRequirement, LabelSelector, Labels};

/// Unique identifier for a node in the cluster.
pub type NodeId = String;

/// Well-known resource name for CPU, in milli-units.
pub const RESOURCE_CPU: &str = "cpu";

/// Well-known resource name for memory, in bytes.
pub const RESOURCE_MEMORY: &str = "memory";

// ── Identity ──────────────────────────────────────────────────────

/// Namespace-scoped workload identity.
///
/// Ordering is namespace first, then name, which matches the string
/// ordering of the `namespace/name` display form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadId {
    pub namespace: String,
    pub name: String,
}

impl WorkloadId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Build the composite key used by the workloads table.
    pub fn table_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// ── Resources ─────────────────────────────────────────────────────

/// Mapping from resource name to an integer quantity.
///
/// Absent dimensions read as zero. Arithmetic is integer-only; nothing
/// is ever rounded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceVector(BTreeMap<String, i64>);

impl ResourceVector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style setter.
    pub fn with(mut self, name: impl Into<String>, quantity: i64) -> Self {
        self.set(name, quantity);
        self
    }

    pub fn set(&mut self, name: impl Into<String>, quantity: i64) {
        self.0.insert(name.into(), quantity);
    }

    /// Quantity for `name`, zero when the dimension is absent.
    pub fn get(&self, name: &str) -> i64 {
        self.0.get(name).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Add every dimension of `other` into `self`.
    pub fn add(&mut self, other: &ResourceVector) {
        for (name, qty) in &other.0 {
            *self.0.entry(name.clone()).or_insert(0) += qty;
        }
    }

    /// `self - other` per dimension, clamped at zero. Dimensions only
    /// present in `other` are not introduced.
    pub fn saturating_sub(&self, other: &ResourceVector) -> ResourceVector {
        let mut out = self.clone();
        for (name, qty) in out.0.iter_mut() {
            *qty = (*qty - other.get(name)).max(0);
        }
        out
    }

    /// True when every requested dimension is ≤ the same dimension of
    /// `capacity`. A positive request for a dimension `capacity` does not
    /// publish can never fit.
    pub fn fits_within(&self, capacity: &ResourceVector) -> bool {
        self.0.iter().all(|(name, qty)| *qty <= capacity.get(name))
    }
}

impl<K: Into<String>> FromIterator<(K, i64)> for ResourceVector {
    fn from_iter<T: IntoIterator<Item = (K, i64)>>(iter: T) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

// ── Constraints ───────────────────────────────────────────────────

/// Required node affinity: every requirement must match the node labels.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeAffinity {
    #[serde(default)]
    pub required: Vec<LabelRequirement>,
}

/// A pod (anti-)affinity term.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodAffinityTerm {
    pub selector: LabelSelector,
    /// Namespaces the selector applies to. Empty means the namespace of
    /// the workload that owns the term.
    #[serde(default)]
    pub namespaces: Vec<String>,
    /// Node label key that defines the co-location domain.
    pub topology_key: String,
}

impl PodAffinityTerm {
    /// Whether `target` is selected by this term when the term belongs
    /// to a workload in `owner_namespace`.
    pub fn selects(&self, owner_namespace: &str, target: &Workload) -> bool {
        let ns_ok = if self.namespaces.is_empty() {
            target.id.namespace == owner_namespace
        } else {
            self.namespaces.iter().any(|ns| *ns == target.id.namespace)
        };
        ns_ok && self.selector.matches(&target.labels)
    }
}

/// Required-during-scheduling placement constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Affinity {
    #[serde(default)]
    pub node: NodeAffinity,
    #[serde(default)]
    pub pod_affinity: Vec<PodAffinityTerm>,
    #[serde(default)]
    pub pod_anti_affinity: Vec<PodAffinityTerm>,
}

// ── Workload ──────────────────────────────────────────────────────

/// Lifecycle phase of a workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Pending,
    Bound,
    Terminating,
    Gone,
}

impl Phase {
    pub fn can_transition_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Pending, Phase::Bound)
                | (Phase::Pending, Phase::Gone)
                | (Phase::Bound, Phase::Terminating)
                | (Phase::Terminating, Phase::Gone)
        )
    }

    /// Bound and Terminating workloads hold their node reservation.
    pub fn occupies_node(self) -> bool {
        matches!(self, Phase::Bound | Phase::Terminating)
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workload {
    pub id: WorkloadId,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub requests: ResourceVector,
    /// Priority class referenced at submission.
    #[serde(default)]
    pub priority_class_name: Option<String>,
    /// Value stamped at admission; informational for critical classes.
    #[serde(default)]
    pub priority: Option<i32>,
    /// Unix timestamp (seconds) of creation.
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub node_selector: Labels,
    #[serde(default)]
    pub affinity: Affinity,
    /// Node the workload is bound to.
    #[serde(default)]
    pub node: Option<NodeId>,
    /// Node chosen by a preemption decision, awaiting freed capacity.
    #[serde(default)]
    pub nominated_node: Option<NodeId>,
    #[serde(default)]
    pub phase: Phase,
    #[serde(default)]
    pub resource_version: u64,
}

impl Workload {
    /// A pending workload with no constraints, for builders and tests.
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            id: WorkloadId::new(namespace, name),
            labels: Labels::new(),
            requests: ResourceVector::new(),
            priority_class_name: None,
            priority: None,
            created_at: 0,
            node_selector: Labels::new(),
            affinity: Affinity::default(),
            node: None,
            nominated_node: None,
            phase: Phase::Pending,
            resource_version: 0,
        }
    }

    pub fn with_requests(mut self, requests: ResourceVector) -> Self {
        self.requests = requests;
        self
    }

    pub fn with_priority_class(mut self, class: &str) -> Self {
        self.priority_class_name = Some(class.to_string());
        self
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_created_at(mut self, created_at: u64) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_affinity(mut self, affinity: Affinity) -> Self {
        self.affinity = affinity;
        self
    }

    pub fn with_node_selector(mut self, key: &str, value: &str) -> Self {
        self.node_selector.insert(key.to_string(), value.to_string());
        self
    }

    /// Mark the workload as bound to `node`.
    pub fn bound_to(mut self, node: &str) -> Self {
        self.node = Some(node.to_string());
        self.phase = Phase::Bound;
        self
    }
}

// ── Node ──────────────────────────────────────────────────────────

/// A node in the cluster. Allocation is derived from the workloads
/// bound to it and is never stored here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    #[serde(default)]
    pub labels: Labels,
    pub capacity: ResourceVector,
    /// Cordoned nodes accept neither placements nor preemptions.
    #[serde(default)]
    pub unschedulable: bool,
    #[serde(default)]
    pub resource_version: u64,
}

impl Node {
    pub fn new(id: &str, capacity: ResourceVector) -> Self {
        Self {
            id: id.to_string(),
            labels: Labels::new(),
            capacity,
            unschedulable: false,
            resource_version: 0,
        }
    }

    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }
}
