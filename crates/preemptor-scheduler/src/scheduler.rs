//! Scheduler: the pass that moves pending workloads forward.
//!
//! One pass takes a single snapshot and walks the pending workloads
//! highest priority first. For each one it either binds it, nominates a
//! node after evicting victims, waits for earlier victims to finish
//! terminating, or reports it unschedulable. Writes made during the pass
//! are folded back into the snapshot so later workloads see them.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use preemptor_core::{NodeId, PriorityClassRegistry, SchedulerConfig, SchedulerSettings, WorkloadId};
use preemptor_placement::find_fit;
use preemptor_state::{
    ClusterSource, ClusterStateView, ClusterWriter, WatchEvent, WorkloadEntry, WorkloadEvictor,
};

use crate::coordinator::PreemptionCoordinator;
use crate::error::{SchedulerError, SchedulerResult};

/// What happened to one pending workload in a pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScheduleOutcome {
    /// Placed without evicting anything.
    Bound { node: NodeId },
    /// Victims were evicted; the workload waits for them to leave.
    Nominated {
        node: NodeId,
        victims: Vec<WorkloadId>,
    },
    /// Nominated earlier; victims on the node are still terminating.
    Waiting { node: NodeId },
    /// No node works, even with preemption.
    Unschedulable { reason: String },
    /// A cluster write for this workload failed; the next pass retries.
    /// `victims` lists any evictions issued before the failure.
    Deferred {
        reason: String,
        #[serde(skip_serializing_if = "Vec::is_empty")]
        victims: Vec<WorkloadId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleRecord {
    pub workload: WorkloadId,
    #[serde(flatten)]
    pub outcome: ScheduleOutcome,
}

/// Outcomes of one pass, in the order workloads were considered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassReport {
    pub records: Vec<ScheduleRecord>,
}

impl PassReport {
    pub fn outcome(&self, workload: &WorkloadId) -> Option<&ScheduleOutcome> {
        self.records
            .iter()
            .find(|r| &r.workload == workload)
            .map(|r| &r.outcome)
    }

    pub fn bound(&self) -> usize {
        self.count(|o| matches!(o, ScheduleOutcome::Bound { .. }))
    }

    pub fn nominated(&self) -> usize {
        self.count(|o| matches!(o, ScheduleOutcome::Nominated { .. }))
    }

    pub fn waiting(&self) -> usize {
        self.count(|o| matches!(o, ScheduleOutcome::Waiting { .. }))
    }

    pub fn unschedulable(&self) -> usize {
        self.count(|o| matches!(o, ScheduleOutcome::Unschedulable { .. }))
    }

    pub fn deferred(&self) -> usize {
        self.count(|o| matches!(o, ScheduleOutcome::Deferred { .. }))
    }

    /// Every workload evicted during the pass.
    pub fn evicted(&self) -> impl Iterator<Item = &WorkloadId> {
        self.records.iter().flat_map(|r| match &r.outcome {
            ScheduleOutcome::Nominated { victims, .. }
            | ScheduleOutcome::Deferred { victims, .. } => victims.as_slice(),
            _ => &[],
        })
    }

    fn count(&self, pred: impl Fn(&ScheduleOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }
}

/// Drives pending workloads through placement and preemption against a
/// cluster collaborator.
pub struct Scheduler<C> {
    cluster: C,
    registry: PriorityClassRegistry,
    settings: SchedulerSettings,
}

impl<C> Scheduler<C>
where
    C: ClusterSource + WorkloadEvictor + ClusterWriter,
{
    pub fn new(cluster: C, registry: PriorityClassRegistry, settings: SchedulerSettings) -> Self {
        Self {
            cluster,
            registry,
            settings,
        }
    }

    /// Build a scheduler from a parsed config file.
    pub fn from_config(cluster: C, config: &SchedulerConfig) -> SchedulerResult<Self> {
        let registry = config
            .priority_registry()
            .map_err(|e| SchedulerError::Config(e.to_string()))?;
        Ok(Self::new(cluster, registry, config.scheduler.clone()))
    }

    pub fn cluster(&self) -> &C {
        &self.cluster
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Run one scheduling pass over every pending workload.
    pub fn schedule_pass(&self) -> SchedulerResult<PassReport> {
        let mut view = ClusterStateView::load(&self.cluster, &self.registry)?;
        let candidates: Vec<NodeId> = view.nodes().map(|n| n.id.clone()).collect();
        let pending: Vec<WorkloadEntry> = view.pending().into_iter().cloned().collect();

        let mut report = PassReport::default();
        for entry in &pending {
            if let Some(outcome) = self.schedule_one(&mut view, entry, &candidates)? {
                report.records.push(ScheduleRecord {
                    workload: entry.id().clone(),
                    outcome,
                });
            }
        }

        info!(
            pending = pending.len(),
            bound = report.bound(),
            nominated = report.nominated(),
            waiting = report.waiting(),
            unschedulable = report.unschedulable(),
            deferred = report.deferred(),
            "scheduling pass complete"
        );
        Ok(report)
    }

    /// `None` when the workload vanished mid-pass.
    fn schedule_one(
        &self,
        view: &mut ClusterStateView,
        entry: &WorkloadEntry,
        candidates: &[NodeId],
    ) -> SchedulerResult<Option<ScheduleOutcome>> {
        let nominated = entry.workload.nominated_node.clone();

        if let Some(node) = &nominated {
            if view.has_terminating_on(node) {
                debug!(workload = %entry.id(), %node, "victims still terminating");
                return Ok(Some(ScheduleOutcome::Waiting { node: node.clone() }));
            }
        }

        // The nominated node is tried first; its capacity was freed for us.
        let fit = nominated
            .as_ref()
            .and_then(|node| find_fit(view, entry, std::slice::from_ref(node)))
            .or_else(|| find_fit(view, entry, candidates));
        if let Some(node) = fit {
            return self.bind(view, entry, node);
        }

        if !self.settings.enable_preemption {
            debug!(workload = %entry.id(), "no fit and preemption disabled");
            return Ok(Some(ScheduleOutcome::Unschedulable {
                reason: "no node fits and preemption is disabled".to_string(),
            }));
        }

        let coordinator = PreemptionCoordinator::new(view);
        let decision = match coordinator.decide(entry, candidates) {
            Ok(decision) => decision,
            Err(unschedulable) => {
                info!(workload = %entry.id(), "unschedulable");
                return Ok(Some(ScheduleOutcome::Unschedulable {
                    reason: unschedulable.to_string(),
                }));
            }
        };
        if decision.is_empty() {
            return self.bind(view, entry, decision.node);
        }
        let committed = coordinator.commit(&self.cluster, entry, &decision);

        for workload in committed.evicted.into_iter().chain(committed.nominated) {
            view.apply(WatchEvent::WorkloadUpserted(workload), &self.registry);
        }
        if let Some(reason) = committed.nomination_error {
            return Ok(Some(ScheduleOutcome::Deferred {
                reason: format!("nominating {} failed: {reason}", decision.node),
                victims: decision.victims,
            }));
        }
        Ok(Some(ScheduleOutcome::Nominated {
            node: decision.node,
            victims: decision.victims,
        }))
    }

    fn bind(
        &self,
        view: &mut ClusterStateView,
        entry: &WorkloadEntry,
        node: NodeId,
    ) -> SchedulerResult<Option<ScheduleOutcome>> {
        match self.cluster.bind(entry.id(), &node) {
            Ok(workload) => {
                info!(workload = %entry.id(), %node, "workload bound");
                view.apply(WatchEvent::WorkloadUpserted(workload), &self.registry);
                Ok(Some(ScheduleOutcome::Bound { node }))
            }
            Err(e) if e.is_not_found() => {
                debug!(workload = %entry.id(), error = %e, "bind target vanished");
                Ok(None)
            }
            Err(e) => {
                warn!(workload = %entry.id(), %node, error = %e, "bind failed");
                Ok(Some(ScheduleOutcome::Deferred {
                    reason: format!("binding to {node} failed: {e}"),
                    victims: Vec::new(),
                }))
            }
        }
    }

    /// Run scheduling passes until `shutdown` changes.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = interval.as_millis() as u64,
            preemption = self.settings.enable_preemption,
            "scheduling loop started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.schedule_pass() {
                        error!(error = %e, "scheduling pass failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("scheduling loop shutting down");
                    break;
                }
            }
        }
    }
}
