//! Placement constraint evaluation.
//!
//! Checks, in order:
//! 1. Node selector and required node affinity against the node labels.
//! 2. The candidate's anti-affinity terms against surviving workloads.
//! 3. Surviving workloads' anti-affinity terms against the candidate.
//! 4. The candidate's required pod affinity terms.
//!
//! Steps 2 and 3 are why eviction can be needed on a node with plenty of
//! free capacity: a survivor's mere presence may rule the candidate out.
//!
//! Two nodes share a topology domain for a key only when both carry the
//! key with the same value.

use thiserror::Error;

use preemptor_core::{Node, PodAffinityTerm, Workload, WorkloadId};
use preemptor_state::{ClusterStateView, WorkloadEntry};

use crate::ledger::Excluded;

/// Why a candidate may not join a node.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConstraintViolation {
    #[error("node {0} not found")]
    NodeNotFound(String),

    #[error("node selector {key}={value} not satisfied")]
    NodeSelector { key: String, value: String },

    #[error("required node affinity on key {key} not satisfied")]
    NodeAffinity { key: String },

    #[error("anti-affinity term ({topology_key}) matches {existing}")]
    CandidateAntiAffinity {
        existing: WorkloadId,
        topology_key: String,
    },

    #[error("{existing} has an anti-affinity term ({topology_key}) matching the candidate")]
    ExistingAntiAffinity {
        existing: WorkloadId,
        topology_key: String,
    },

    #[error("required pod affinity ({topology_key}) has no match in domain")]
    PodAffinity { topology_key: String },
}

impl ConstraintViolation {
    /// Violations that depend only on the node, never on who runs there.
    pub fn is_node_level(&self) -> bool {
        matches!(
            self,
            ConstraintViolation::NodeNotFound(_)
                | ConstraintViolation::NodeSelector { .. }
                | ConstraintViolation::NodeAffinity { .. }
        )
    }
}

#[derive(Clone, Copy)]
pub struct ConstraintEvaluator<'a> {
    view: &'a ClusterStateView,
}

impl<'a> ConstraintEvaluator<'a> {
    pub fn new(view: &'a ClusterStateView) -> Self {
        Self { view }
    }

    /// Node-only checks: selector and required node affinity.
    pub fn check_node(&self, node: &Node, candidate: &Workload) -> Result<(), ConstraintViolation> {
        for (key, value) in &candidate.node_selector {
            if node.labels.get(key) != Some(value) {
                return Err(ConstraintViolation::NodeSelector {
                    key: key.clone(),
                    value: value.clone(),
                });
            }
        }
        for requirement in &candidate.affinity.node.required {
            if !requirement.matches(&node.labels) {
                return Err(ConstraintViolation::NodeAffinity {
                    key: requirement.key.clone(),
                });
            }
        }
        Ok(())
    }

    /// Whether `candidate` may run on `node` alongside every occupying
    /// workload not in `excluded`.
    pub fn permits(&self, node: &str, candidate: &Workload, excluded: &Excluded) -> bool {
        self.check(node, candidate, excluded).is_ok()
    }

    /// Explanatory form of [`permits`](Self::permits).
    pub fn check(
        &self,
        node: &str,
        candidate: &Workload,
        excluded: &Excluded,
    ) -> Result<(), ConstraintViolation> {
        let target = self
            .view
            .node(node)
            .ok_or_else(|| ConstraintViolation::NodeNotFound(node.to_string()))?;
        self.check_node(target, candidate)?;

        let survivors: Vec<(&WorkloadEntry, &Node)> = self
            .view
            .occupying()
            .filter(|e| e.id() != &candidate.id && !excluded.contains(e.id()))
            .filter_map(|e| {
                // A survivor on a node missing from the view is not present.
                let node = self.view.node(e.occupied_node()?)?;
                Some((e, node))
            })
            .collect();

        let namespace = candidate.id.namespace.as_str();

        for term in &candidate.affinity.pod_anti_affinity {
            let hit = survivors.iter().find(|(e, n)| {
                same_domain(target, n, &term.topology_key) && term.selects(namespace, &e.workload)
            });
            if let Some((e, _)) = hit {
                return Err(ConstraintViolation::CandidateAntiAffinity {
                    existing: e.id().clone(),
                    topology_key: term.topology_key.clone(),
                });
            }
        }

        for (e, n) in &survivors {
            let owner_ns = e.id().namespace.as_str();
            for term in &e.workload.affinity.pod_anti_affinity {
                if same_domain(target, n, &term.topology_key) && term.selects(owner_ns, candidate) {
                    return Err(ConstraintViolation::ExistingAntiAffinity {
                        existing: e.id().clone(),
                        topology_key: term.topology_key.clone(),
                    });
                }
            }
        }

        for term in &candidate.affinity.pod_affinity {
            let satisfied = survivors.iter().any(|(e, n)| {
                same_domain(target, n, &term.topology_key) && term.selects(namespace, &e.workload)
            });
            if !satisfied && !self.first_of_group(candidate, term) {
                return Err(ConstraintViolation::PodAffinity {
                    topology_key: term.topology_key.clone(),
                });
            }
        }

        Ok(())
    }

    /// A required affinity term is waived for the first member of a group:
    /// nothing in the cluster matches it yet and the candidate matches it
    /// itself. Judged against the whole view, independent of evictions.
    fn first_of_group(&self, candidate: &Workload, term: &PodAffinityTerm) -> bool {
        let namespace = candidate.id.namespace.as_str();
        term.selects(namespace, candidate)
            && !self
                .view
                .occupying()
                .any(|e| e.id() != &candidate.id && term.selects(namespace, &e.workload))
    }
}

fn same_domain(a: &Node, b: &Node, topology_key: &str) -> bool {
    match (a.labels.get(topology_key), b.labels.get(topology_key)) {
        (Some(x), Some(y)) => x == y,
        _ => false,
    }
}
