//! Total order over workloads for preemption.
//!
//! Ascending by priority, then by creation time (older first), then by
//! identity, so no two distinct workloads ever compare equal.

use std::cmp::Ordering;

use preemptor_core::{Priority, WorkloadId};
use preemptor_state::WorkloadEntry;

/// Sort key realising the order. Field order is comparison order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PriorityKey<'a> {
    pub priority: Priority,
    pub created_at: u64,
    pub id: &'a WorkloadId,
}

impl<'a> PriorityKey<'a> {
    pub fn of(entry: &'a WorkloadEntry) -> Self {
        Self {
            priority: entry.priority,
            created_at: entry.workload.created_at,
            id: &entry.workload.id,
        }
    }
}

pub struct PriorityIndex;

impl PriorityIndex {
    pub fn cmp(a: &WorkloadEntry, b: &WorkloadEntry) -> Ordering {
        PriorityKey::of(a).cmp(&PriorityKey::of(b))
    }

    pub fn less(a: &WorkloadEntry, b: &WorkloadEntry) -> bool {
        Self::cmp(a, b) == Ordering::Less
    }

    /// Preemption requires strict priority superiority. A preemptor whose
    /// class never resolved can preempt nothing.
    pub fn can_preempt(preemptor: Priority, victim: Priority) -> bool {
        preemptor.is_resolved() && victim < preemptor
    }

    /// Sort lowest first: the order victims are considered in.
    pub fn sort_ascending(entries: &mut [&WorkloadEntry]) {
        entries.sort_by(|a, b| Self::cmp(a, b));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::*;
    use preemptor_core::SystemCritical;

    fn entry(name: &str, priority: Priority, created_at: u64) -> WorkloadEntry {
        WorkloadEntry {
            workload: pending(name, "low", 0).with_created_at(created_at),
            priority,
        }
    }

    #[test]
    fn orders_by_priority_first() {
        let low = entry("z", Priority::Value(1), 100);
        let high = entry("a", Priority::Value(1000), 0);
        assert!(PriorityIndex::less(&low, &high));
        assert!(!PriorityIndex::less(&high, &low));
    }

    #[test]
    fn older_sorts_first_on_equal_priority() {
        let old = entry("b", Priority::Value(5), 10);
        let new = entry("a", Priority::Value(5), 20);
        assert!(PriorityIndex::less(&old, &new));
    }

    #[test]
    fn identity_breaks_remaining_ties() {
        let a = entry("a", Priority::Value(5), 10);
        let b = entry("b", Priority::Value(5), 10);
        assert!(PriorityIndex::less(&a, &b));
        assert_eq!(PriorityIndex::cmp(&a, &a), Ordering::Equal);
    }

    #[test]
    fn critical_outranks_any_value() {
        let critical = entry("c", Priority::Critical(SystemCritical::Cluster), 0);
        let max = entry("m", Priority::Value(i32::MAX), 0);
        assert!(PriorityIndex::less(&max, &critical));
    }

    #[test]
    fn preemption_needs_strict_superiority() {
        assert!(PriorityIndex::can_preempt(Priority::Value(2), Priority::Value(1)));
        assert!(!PriorityIndex::can_preempt(Priority::Value(2), Priority::Value(2)));
        assert!(!PriorityIndex::can_preempt(Priority::Value(1), Priority::Value(2)));
        assert!(PriorityIndex::can_preempt(
            Priority::Critical(SystemCritical::Cluster),
            Priority::Value(1_000_000_000)
        ));
        assert!(PriorityIndex::can_preempt(Priority::Value(i32::MIN), Priority::Unresolved));
    }

    #[test]
    fn unresolved_preempts_nothing() {
        assert!(!PriorityIndex::can_preempt(Priority::Unresolved, Priority::Unresolved));
        assert!(!PriorityIndex::can_preempt(Priority::Unresolved, Priority::Value(i32::MIN)));
    }

    #[test]
    fn sort_ascending_is_total() {
        let entries = [
            entry("c", Priority::Value(100), 0),
            entry("b", Priority::Unresolved, 0),
            entry("a", Priority::Value(1), 5),
            entry("d", Priority::Value(1), 1),
        ];
        let mut refs: Vec<&WorkloadEntry> = entries.iter().collect();
        PriorityIndex::sort_ascending(&mut refs);
        let names: Vec<_> = refs.iter().map(|e| e.workload.id.name.as_str()).collect();
        assert_eq!(names, vec!["b", "d", "a", "c"]);
    }
}
