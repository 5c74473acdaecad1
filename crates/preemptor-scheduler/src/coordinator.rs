//! Preemption coordinator.
//!
//! Runs the victim selector over every candidate node, picks the cheapest
//! decision and applies it. Planning is pure and can be abandoned at any
//! point; only [`PreemptionCoordinator::commit`] writes.
//!
//! The coordinator never binds the pending workload after evicting. The
//! victims must first leave the cluster, and a later pass picks the
//! workload up again.

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use preemptor_core::{NodeId, Workload};
use preemptor_placement::{EvictionDecision, Infeasible, VictimSelector};
use preemptor_state::{ClusterStateView, ClusterWriter, WorkloadEntry, WorkloadEvictor};

use crate::error::Unschedulable;

/// Writes issued by a commit, as returned by the cluster.
#[derive(Debug, Clone, Default)]
pub struct CommitOutcome {
    /// Victims now Terminating.
    pub evicted: Vec<Workload>,
    /// The pending workload with its nominated node set.
    pub nominated: Option<Workload>,
    /// Why the nomination write failed, when it did.
    pub nomination_error: Option<String>,
}

pub struct PreemptionCoordinator<'a> {
    selector: VictimSelector<'a>,
}

impl<'a> PreemptionCoordinator<'a> {
    pub fn new(view: &'a ClusterStateView) -> Self {
        Self {
            selector: VictimSelector::new(view),
        }
    }

    /// Cheapest feasible decision across `candidates`: fewest victims,
    /// then lowest priority sum, then lowest node identity.
    pub fn plan(&self, pending: &WorkloadEntry, candidates: &[NodeId]) -> Option<EvictionDecision> {
        self.decide(pending, candidates).ok()
    }

    /// Like [`plan`](Self::plan), with every node's rejection reason when
    /// no node works.
    pub fn decide(
        &self,
        pending: &WorkloadEntry,
        candidates: &[NodeId],
    ) -> Result<EvictionDecision, Unschedulable> {
        let mut decisions = Vec::new();
        let mut reasons: BTreeMap<NodeId, Infeasible> = BTreeMap::new();

        for node in candidates {
            match self.selector.evaluate(pending, node) {
                Ok(decision) => decisions.push(decision),
                Err(reason) => {
                    debug!(workload = %pending.id(), %node, %reason, "candidate rejected");
                    reasons.insert(node.clone(), reason);
                }
            }
        }

        decisions
            .into_iter()
            .min_by(|a, b| {
                a.len()
                    .cmp(&b.len())
                    .then(a.priority_sum.cmp(&b.priority_sum))
                    .then_with(|| a.node.cmp(&b.node))
            })
            .ok_or_else(|| Unschedulable {
                workload: pending.id().clone(),
                reasons,
            })
    }

    /// Evict every victim and nominate the chosen node on the pending
    /// workload.
    ///
    /// A victim that is already gone is skipped. Any other eviction
    /// failure is logged and skipped too; the next pass sees the result
    /// and decides again. A failed nomination is returned in
    /// [`CommitOutcome::nomination_error`].
    pub fn commit<C>(&self, cluster: &C, pending: &WorkloadEntry, decision: &EvictionDecision) -> CommitOutcome
    where
        C: WorkloadEvictor + ClusterWriter + ?Sized,
    {
        let mut outcome = CommitOutcome::default();

        for victim in &decision.victims {
            match cluster.evict(victim) {
                Ok(workload) => {
                    info!(
                        victim = %victim,
                        node = %decision.node,
                        preemptor = %pending.id(),
                        "victim evicted"
                    );
                    outcome.evicted.push(workload);
                }
                Err(e) if e.is_not_found() => {
                    debug!(victim = %victim, "victim already gone");
                }
                Err(e) => {
                    warn!(victim = %victim, error = %e, "eviction failed");
                }
            }
        }

        if decision.is_empty() {
            return outcome;
        }

        match cluster.nominate(pending.id(), Some(decision.node.as_str())) {
            Ok(workload) => {
                info!(
                    workload = %pending.id(),
                    node = %decision.node,
                    victims = decision.len(),
                    "node nominated"
                );
                outcome.nominated = Some(workload);
            }
            Err(e) => {
                warn!(workload = %pending.id(), error = %e, "nomination failed");
                outcome.nomination_error = Some(e.to_string());
            }
        }
        outcome
    }

    /// Plan and commit in one step. Returns the node the workload will
    /// land on once its victims are gone.
    pub fn attempt_preemptive_schedule<C>(
        &self,
        cluster: &C,
        pending: &WorkloadEntry,
        candidates: &[NodeId],
    ) -> Result<NodeId, Unschedulable>
    where
        C: WorkloadEvictor + ClusterWriter + ?Sized,
    {
        let decision = self.decide(pending, candidates)?;
        self.commit(cluster, pending, &decision);
        Ok(decision.node)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::collections::BTreeSet;

    use preemptor_core::{
        Node, PriorityClass, PriorityClassRegistry, ResourceVector, WorkloadId,
    };
    use preemptor_state::{StateError, StateResult};

    use super::*;

    fn registry() -> PriorityClassRegistry {
        PriorityClassRegistry::from_classes([
            PriorityClass::new("low", 1),
            PriorityClass::new("medium", 100),
            PriorityClass::new("high", 1000),
        ])
        .unwrap()
    }

    fn node(id: &str, cpu: i64) -> Node {
        Node::new(id, ResourceVector::new().with("cpu", cpu))
    }

    fn bound(name: &str, node: &str, class: &str, cpu: i64) -> Workload {
        Workload::new("default", name)
            .with_priority_class(class)
            .with_requests(ResourceVector::new().with("cpu", cpu))
            .bound_to(node)
    }

    fn pending(name: &str, class: &str, cpu: i64) -> Workload {
        Workload::new("default", name)
            .with_priority_class(class)
            .with_requests(ResourceVector::new().with("cpu", cpu))
    }

    fn wid(name: &str) -> WorkloadId {
        WorkloadId::new("default", name)
    }

    fn nodes(ids: &[&str]) -> Vec<NodeId> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    /// Records writes; evicting anything in `gone` reports NotFound.
    #[derive(Default)]
    struct Recorder {
        gone: BTreeSet<WorkloadId>,
        reject_nomination: bool,
        evicted: RefCell<Vec<WorkloadId>>,
        nominated: RefCell<Vec<(WorkloadId, Option<String>)>>,
    }

    impl WorkloadEvictor for Recorder {
        fn evict(&self, id: &WorkloadId) -> StateResult<Workload> {
            if self.gone.contains(id) {
                return Err(StateError::NotFound(id.to_string()));
            }
            self.evicted.borrow_mut().push(id.clone());
            Ok(Workload::new(&id.namespace, &id.name))
        }
    }

    impl ClusterWriter for Recorder {
        fn bind(&self, id: &WorkloadId, _node: &str) -> StateResult<Workload> {
            Err(StateError::NotFound(id.to_string()))
        }

        fn nominate(&self, id: &WorkloadId, node: Option<&str>) -> StateResult<Workload> {
            if self.reject_nomination {
                return Err(StateError::Write("conflict".to_string()));
            }
            self.nominated
                .borrow_mut()
                .push((id.clone(), node.map(str::to_string)));
            Ok(Workload::new(&id.namespace, &id.name))
        }
    }

    #[test]
    fn prefers_fewest_victims() {
        let view = ClusterStateView::from_parts(
            [node("n1", 100), node("n2", 100)],
            [
                bound("a", "n1", "low", 50),
                bound("b", "n1", "low", 50),
                bound("c", "n2", "medium", 100),
                pending("p", "high", 100),
            ],
            &registry(),
        );
        let coordinator = PreemptionCoordinator::new(&view);
        let p = view.workload(&wid("p")).unwrap();
        let decision = coordinator.plan(p, &nodes(&["n1", "n2"])).unwrap();
        assert_eq!(decision.node, "n2");
        assert_eq!(decision.victims, vec![wid("c")]);
    }

    #[test]
    fn ties_break_on_priority_sum_then_node() {
        let view = ClusterStateView::from_parts(
            [node("n1", 100), node("n2", 100), node("n3", 100)],
            [
                bound("a", "n1", "medium", 100),
                bound("b", "n2", "low", 100),
                bound("c", "n3", "low", 100),
                pending("p", "high", 100),
            ],
            &registry(),
        );
        let coordinator = PreemptionCoordinator::new(&view);
        let p = view.workload(&wid("p")).unwrap();
        let decision = coordinator.plan(p, &nodes(&["n3", "n1", "n2"])).unwrap();
        assert_eq!(decision.node, "n2");
    }

    #[test]
    fn zero_cost_node_wins() {
        let view = ClusterStateView::from_parts(
            [node("n1", 100), node("n2", 100)],
            [bound("a", "n1", "low", 100), pending("p", "high", 100)],
            &registry(),
        );
        let coordinator = PreemptionCoordinator::new(&view);
        let p = view.workload(&wid("p")).unwrap();
        let decision = coordinator.plan(p, &nodes(&["n1", "n2"])).unwrap();
        assert_eq!(decision.node, "n2");
        assert!(decision.is_empty());
    }

    #[test]
    fn unschedulable_carries_every_reason() {
        let view = ClusterStateView::from_parts(
            [node("n1", 100)],
            [bound("a", "n1", "high", 100), pending("p", "medium", 50)],
            &registry(),
        );
        let coordinator = PreemptionCoordinator::new(&view);
        let p = view.workload(&wid("p")).unwrap();
        let recorder = Recorder::default();

        let err = coordinator
            .attempt_preemptive_schedule(&recorder, p, &nodes(&["n1", "ghost"]))
            .unwrap_err();
        assert_eq!(err.workload, wid("p"));
        assert_eq!(err.reasons.len(), 2);
        assert!(matches!(err.reasons["ghost"], Infeasible::NodeNotFound(_)));
        assert!(recorder.evicted.borrow().is_empty());
        assert!(recorder.nominated.borrow().is_empty());
    }

    #[test]
    fn commit_evicts_and_nominates() {
        let view = ClusterStateView::from_parts(
            [node("n1", 100)],
            [bound("a", "n1", "low", 100), pending("p", "high", 100)],
            &registry(),
        );
        let coordinator = PreemptionCoordinator::new(&view);
        let p = view.workload(&wid("p")).unwrap();
        let recorder = Recorder::default();

        let node = coordinator
            .attempt_preemptive_schedule(&recorder, p, &nodes(&["n1"]))
            .unwrap();
        assert_eq!(node, "n1");
        assert_eq!(*recorder.evicted.borrow(), vec![wid("a")]);
        assert_eq!(
            *recorder.nominated.borrow(),
            vec![(wid("p"), Some("n1".to_string()))]
        );
    }

    #[test]
    fn vanished_victim_does_not_abort_commit() {
        let view = ClusterStateView::from_parts(
            [node("n1", 100)],
            [
                bound("a", "n1", "low", 50),
                bound("b", "n1", "low", 50),
                pending("p", "high", 100),
            ],
            &registry(),
        );
        let coordinator = PreemptionCoordinator::new(&view);
        let p = view.workload(&wid("p")).unwrap();
        let decision = coordinator.plan(p, &nodes(&["n1"])).unwrap();
        let recorder = Recorder {
            gone: BTreeSet::from([wid("a")]),
            ..Recorder::default()
        };

        let outcome = coordinator.commit(&recorder, p, &decision);
        assert_eq!(outcome.evicted.len(), 1);
        assert_eq!(*recorder.evicted.borrow(), vec![wid("b")]);
        assert!(outcome.nominated.is_some());
        assert!(outcome.nomination_error.is_none());
    }

    #[test]
    fn failed_nomination_is_reported() {
        let view = ClusterStateView::from_parts(
            [node("n1", 100)],
            [bound("a", "n1", "low", 100), pending("p", "high", 100)],
            &registry(),
        );
        let coordinator = PreemptionCoordinator::new(&view);
        let p = view.workload(&wid("p")).unwrap();
        let decision = coordinator.plan(p, &nodes(&["n1"])).unwrap();
        let recorder = Recorder {
            reject_nomination: true,
            ..Recorder::default()
        };

        let outcome = coordinator.commit(&recorder, p, &decision);
        assert_eq!(outcome.evicted.len(), 1);
        assert!(outcome.nominated.is_none());
        assert!(outcome.nomination_error.unwrap().contains("conflict"));
    }

    #[test]
    fn empty_decision_writes_nothing() {
        let view = ClusterStateView::from_parts(
            [node("n1", 100)],
            [pending("p", "high", 100)],
            &registry(),
        );
        let coordinator = PreemptionCoordinator::new(&view);
        let p = view.workload(&wid("p")).unwrap();
        let decision = coordinator.plan(p, &nodes(&["n1"])).unwrap();
        let recorder = Recorder::default();

        let outcome = coordinator.commit(&recorder, p, &decision);
        assert!(outcome.evicted.is_empty());
        assert!(outcome.nominated.is_none());
        assert!(recorder.nominated.borrow().is_empty());
    }
}
