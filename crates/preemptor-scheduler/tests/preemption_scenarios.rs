//! End-to-end preemption scenarios.
//!
//! Each test seeds an in-memory store, runs scheduling passes and plays
//! the part of the kubelet by completing terminations between passes.

use preemptor_core::*;
use preemptor_scheduler::{ScheduleOutcome, Scheduler};
use preemptor_state::StateStore;

fn test_store(classes: &[(&str, i32)]) -> StateStore {
    let store = StateStore::open_in_memory().unwrap();
    for (name, value) in classes {
        store.put_priority_class(&PriorityClass::new(name, *value)).unwrap();
    }
    store
}

fn scheduler(store: StateStore) -> Scheduler<StateStore> {
    let registry = store.priority_registry().unwrap();
    Scheduler::new(store, registry, SchedulerSettings::default())
}

fn cpu(milli: i64) -> ResourceVector {
    ResourceVector::new().with(RESOURCE_CPU, milli)
}

fn test_node(id: &str, milli: i64) -> Node {
    Node::new(id, cpu(milli)).with_label("kubernetes.io/hostname", id)
}

fn workload(name: &str, class: &str, milli: i64) -> Workload {
    Workload::new("default", name)
        .with_priority_class(class)
        .with_requests(cpu(milli))
}

/// Store a workload already running on `node`.
fn run_on(store: &StateStore, w: Workload, node: &str) -> WorkloadId {
    let admitted = store.submit_workload(&w).unwrap();
    store.put_workload(&admitted.bound_to(node)).unwrap();
    w.id
}

fn phase_of(store: &StateStore, id: &WorkloadId) -> Option<Phase> {
    store.get_workload(id).unwrap().map(|w| w.phase)
}

#[test]
fn basic_preemption_evicts_only_the_low_priority_workload() {
    let store = test_store(&[("low", 1), ("medium", 100), ("high", 1000)]);
    store.put_node(&test_node("n1", 100)).unwrap();
    store.put_node(&test_node("n2", 100)).unwrap();
    let low = run_on(&store, workload("l", "low", 70), "n1");
    let medium = run_on(&store, workload("m", "medium", 70), "n2");
    let s = scheduler(store);

    let high = s
        .cluster()
        .submit_workload(
            &workload("h", "high", 60).with_node_selector("kubernetes.io/hostname", "n1"),
        )
        .unwrap()
        .id;

    let report = s.schedule_pass().unwrap();
    assert_eq!(
        report.outcome(&high),
        Some(&ScheduleOutcome::Nominated {
            node: "n1".into(),
            victims: vec![low.clone()],
        })
    );
    assert_eq!(phase_of(s.cluster(), &low), Some(Phase::Terminating));
    assert_eq!(phase_of(s.cluster(), &medium), Some(Phase::Bound));

    s.cluster().complete_all_terminations().unwrap();
    let report = s.schedule_pass().unwrap();
    assert_eq!(report.outcome(&high), Some(&ScheduleOutcome::Bound { node: "n1".into() }));
    assert_eq!(phase_of(s.cluster(), &low), None);
    assert_eq!(phase_of(s.cluster(), &medium), Some(Phase::Bound));
}

#[test]
fn critical_workload_preempts_without_a_priority_value() {
    let store = test_store(&[("high", HIGHEST_USER_DEFINABLE_PRIORITY)]);
    store.put_node(&test_node("n1", 500)).unwrap();
    let top = run_on(&store, workload("top", "high", 500), "n1");
    let s = scheduler(store);

    // Written directly: no admission, no stamped value.
    let mut critical = Workload::new("kube-system", "critical")
        .with_priority_class(SYSTEM_CLUSTER_CRITICAL)
        .with_requests(cpu(500));
    critical.priority = Some(0);
    s.cluster().put_workload(&critical).unwrap();

    let report = s.schedule_pass().unwrap();
    assert_eq!(report.evicted().collect::<Vec<_>>(), vec![&top]);

    s.cluster().complete_all_terminations().unwrap();
    let report = s.schedule_pass().unwrap();
    assert_eq!(
        report.outcome(&critical.id),
        Some(&ScheduleOutcome::Bound { node: "n1".into() })
    );
}

#[test]
fn anti_affinity_forces_eviction_with_spare_capacity() {
    let store = test_store(&[("low", 1), ("medium", 100), ("high", 1000)]);
    store.put_node(&test_node("n1", 1000)).unwrap();
    let blocker = run_on(
        &store,
        workload("m", "medium", 100).with_label("service", "blah"),
        "n1",
    );
    let bystander = run_on(&store, workload("l", "low", 100), "n1");
    let s = scheduler(store);

    let anti = Affinity {
        pod_anti_affinity: vec![PodAffinityTerm {
            selector: LabelSelector::default().with_expression(LabelRequirement::new(
                "service",
                Operator::In,
                &["blah", "foo"],
            )),
            namespaces: vec![],
            topology_key: "kubernetes.io/hostname".to_string(),
        }],
        ..Affinity::default()
    };
    let high = s
        .cluster()
        .submit_workload(&workload("h", "high", 100).with_affinity(anti))
        .unwrap()
        .id;

    let report = s.schedule_pass().unwrap();
    assert_eq!(
        report.outcome(&high),
        Some(&ScheduleOutcome::Nominated {
            node: "n1".into(),
            victims: vec![blocker.clone()],
        })
    );
    assert_eq!(phase_of(s.cluster(), &bystander), Some(Phase::Bound));

    s.cluster().complete_all_terminations().unwrap();
    let report = s.schedule_pass().unwrap();
    assert_eq!(report.outcome(&high), Some(&ScheduleOutcome::Bound { node: "n1".into() }));
}

#[test]
fn replicated_tiers_are_not_over_preempted() {
    let store = test_store(&[("p1", 1), ("p2", 2), ("p3", 3), ("p4", 4)]);
    store.put_node(&test_node("n1", 800)).unwrap();

    let mut replicas = Vec::new();
    for (set, class, count, units) in [("rs1", "p1", 5, 40), ("rs2", "p2", 4, 50), ("rs3", "p3", 4, 95)] {
        for i in 0..count {
            let w = workload(&format!("{set}-{i}"), class, units)
                .with_label("rs", set)
                .with_created_at(i as u64);
            replicas.push(run_on(&store, w, "n1"));
        }
    }
    let s = scheduler(store);

    let p4 = s.cluster().submit_workload(&workload("p4", "p4", 400)).unwrap().id;
    let report = s.schedule_pass().unwrap();
    let evicted: Vec<&WorkloadId> = report.evicted().collect();
    let from = |set: &str| evicted.iter().filter(|id| id.name.starts_with(set)).count();
    assert_eq!(from("rs1"), 5);
    assert_eq!(from("rs2"), 4);
    assert_eq!(from("rs3"), 0);

    s.cluster().complete_all_terminations().unwrap();

    // The replica controllers recreate what was evicted.
    for i in 0..5 {
        s.cluster()
            .submit_workload(&workload(&format!("rs1-new-{i}"), "p1", 40).with_created_at(100))
            .unwrap();
    }
    for i in 0..4 {
        s.cluster()
            .submit_workload(&workload(&format!("rs2-new-{i}"), "p2", 50).with_created_at(100))
            .unwrap();
    }

    let report = s.schedule_pass().unwrap();
    assert_eq!(report.outcome(&p4), Some(&ScheduleOutcome::Bound { node: "n1".into() }));
    assert_eq!(report.evicted().count(), 0);
    assert_eq!(report.bound(), 1);
    assert_eq!(report.unschedulable(), 9);

    for id in replicas.iter().filter(|id| id.name.starts_with("rs3")) {
        assert_eq!(phase_of(s.cluster(), id), Some(Phase::Bound));
    }
}

#[test]
fn equal_priority_never_preempts() {
    let store = test_store(&[("same", 10)]);
    store.put_node(&test_node("n1", 100)).unwrap();
    let running = run_on(&store, workload("a", "same", 100), "n1");
    let s = scheduler(store);

    let waiting = s.cluster().submit_workload(&workload("b", "same", 10)).unwrap().id;
    let report = s.schedule_pass().unwrap();
    assert!(matches!(
        report.outcome(&waiting),
        Some(ScheduleOutcome::Unschedulable { .. })
    ));
    assert_eq!(phase_of(s.cluster(), &running), Some(Phase::Bound));
}

#[test]
fn unknown_priority_class_is_admitted_but_never_preempts() {
    let store = test_store(&[("low", 1)]);
    store.put_node(&test_node("n1", 100)).unwrap();
    let running = run_on(&store, workload("a", "low", 100), "n1");
    let s = scheduler(store);

    let orphan = s.cluster().submit_workload(&workload("o", "missing", 10)).unwrap();
    assert_eq!(orphan.priority, None);

    let report = s.schedule_pass().unwrap();
    assert!(matches!(
        report.outcome(&orphan.id),
        Some(ScheduleOutcome::Unschedulable { .. })
    ));
    assert_eq!(phase_of(s.cluster(), &running), Some(Phase::Bound));
}

#[test]
fn preemption_picks_the_cheapest_node() {
    let store = test_store(&[("low", 1), ("medium", 100), ("high", 1000)]);
    store.put_node(&test_node("n1", 100)).unwrap();
    store.put_node(&test_node("n2", 100)).unwrap();
    run_on(&store, workload("a", "low", 50), "n1");
    run_on(&store, workload("b", "low", 50), "n1");
    let c = run_on(&store, workload("c", "medium", 100), "n2");
    let s = scheduler(store);

    let high = s.cluster().submit_workload(&workload("h", "high", 100)).unwrap().id;
    let report = s.schedule_pass().unwrap();
    assert_eq!(
        report.outcome(&high),
        Some(&ScheduleOutcome::Nominated {
            node: "n2".into(),
            victims: vec![c],
        })
    );
}
