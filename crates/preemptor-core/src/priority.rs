//! Priority classes and the priority total order.
//!
//! A [`Priority`] is what the preemption engine compares. Reserved
//! system-critical classes form a distinguished top segment of the order,
//! above every value a user class can carry, so a single `Ord` comparison
//! covers every case. Workloads whose class cannot be resolved sort below
//! everything.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::types::Workload;

/// Reserved class for cluster-wide critical workloads.
pub const SYSTEM_CLUSTER_CRITICAL: &str = "system-cluster-critical";

/// Reserved class for node-critical workloads.
pub const SYSTEM_NODE_CRITICAL: &str = "system-node-critical";

/// Largest value a user-defined class may carry.
pub const HIGHEST_USER_DEFINABLE_PRIORITY: i32 = 1_000_000_000;

const SYSTEM_PREFIX: &str = "system-";

/// The two reserved critical classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemCritical {
    Cluster,
    Node,
}

impl SystemCritical {
    pub fn from_class_name(name: &str) -> Option<Self> {
        match name {
            SYSTEM_CLUSTER_CRITICAL => Some(Self::Cluster),
            SYSTEM_NODE_CRITICAL => Some(Self::Node),
            _ => None,
        }
    }

    pub fn class_name(self) -> &'static str {
        match self {
            Self::Cluster => SYSTEM_CLUSTER_CRITICAL,
            Self::Node => SYSTEM_NODE_CRITICAL,
        }
    }

    /// Nominal integer value, above any user-definable value.
    pub fn value(self) -> i32 {
        match self {
            Self::Cluster => 2 * HIGHEST_USER_DEFINABLE_PRIORITY,
            Self::Node => 2 * HIGHEST_USER_DEFINABLE_PRIORITY + 1000,
        }
    }
}

/// Resolved priority of a workload.
///
/// Variant order is the comparison order: `Unresolved < Value(_) < Critical(_)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// The workload referenced a class with no resolvable value.
    Unresolved,
    Value(i32),
    Critical(SystemCritical),
}

impl Priority {
    /// Numeric weight used when summing priorities of an eviction set.
    pub fn weight(self) -> i64 {
        match self {
            Priority::Unresolved => i64::from(i32::MIN),
            Priority::Value(v) => i64::from(v),
            Priority::Critical(c) => i64::from(c.value()),
        }
    }

    pub fn is_resolved(self) -> bool {
        !matches!(self, Priority::Unresolved)
    }

    /// Priority of `workload`.
    ///
    /// A reserved class name always wins, whatever value was stamped.
    /// Otherwise the value stamped at admission is used, and only a
    /// workload that was never stamped is resolved through `resolver`.
    pub fn of(workload: &Workload, resolver: &dyn PriorityResolver) -> Priority {
        let class = workload.priority_class_name.as_deref();
        if let Some(critical) = class.and_then(SystemCritical::from_class_name) {
            return Priority::Critical(critical);
        }
        if let Some(value) = workload.priority {
            return Priority::Value(value);
        }
        resolver.resolve(class).unwrap_or(Priority::Unresolved)
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::Unresolved => f.write_str("unresolved"),
            Priority::Value(v) => write!(f, "{v}"),
            Priority::Critical(c) => write!(f, "{}({})", c.class_name(), c.value()),
        }
    }
}

/// An admin-defined priority class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriorityClass {
    pub name: String,
    pub value: i32,
    /// Applied to workloads that name no class.
    #[serde(default)]
    pub global_default: bool,
    #[serde(default)]
    pub description: Option<String>,
}

impl PriorityClass {
    pub fn new(name: &str, value: i32) -> Self {
        Self {
            name: name.to_string(),
            value,
            global_default: false,
            description: None,
        }
    }
}

/// Priority class validation and resolution errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PriorityClassError {
    #[error("priority class name is reserved: {0}")]
    Reserved(String),

    #[error("priority class {name} value {value} exceeds {HIGHEST_USER_DEFINABLE_PRIORITY}")]
    ValueTooHigh { name: String, value: i32 },

    #[error("priority class {name} cannot be global default: {existing} already is")]
    DuplicateGlobalDefault { name: String, existing: String },

    #[error("unknown priority class: {0}")]
    UnknownClass(String),
}

/// Maps a class name to a priority. `None` as input asks for the
/// default applied to workloads that name no class.
pub trait PriorityResolver {
    fn resolve(&self, class_name: Option<&str>) -> Option<Priority>;
}

/// In-memory registry of user-defined classes plus the reserved ones.
#[derive(Debug, Clone, Default)]
pub struct PriorityClassRegistry {
    classes: BTreeMap<String, PriorityClass>,
}

impl PriorityClassRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a list of classes, validating each one.
    pub fn from_classes(
        classes: impl IntoIterator<Item = PriorityClass>,
    ) -> Result<Self, PriorityClassError> {
        let mut registry = Self::new();
        for class in classes {
            registry.register(class)?;
        }
        Ok(registry)
    }

    /// Insert or replace a user-defined class.
    pub fn register(&mut self, class: PriorityClass) -> Result<(), PriorityClassError> {
        if class.name.starts_with(SYSTEM_PREFIX) {
            return Err(PriorityClassError::Reserved(class.name));
        }
        if class.value > HIGHEST_USER_DEFINABLE_PRIORITY {
            return Err(PriorityClassError::ValueTooHigh {
                name: class.name,
                value: class.value,
            });
        }
        if class.global_default {
            if let Some(existing) = self.global_default() {
                if existing.name != class.name {
                    return Err(PriorityClassError::DuplicateGlobalDefault {
                        name: class.name,
                        existing: existing.name.clone(),
                    });
                }
            }
        }
        debug!(name = %class.name, value = class.value, "priority class registered");
        self.classes.insert(class.name.clone(), class);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> Option<PriorityClass> {
        self.classes.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&PriorityClass> {
        self.classes.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &PriorityClass> {
        self.classes.values()
    }

    pub fn global_default(&self) -> Option<&PriorityClass> {
        self.classes.values().find(|c| c.global_default)
    }

    /// Stamp the resolved priority value onto a newly submitted workload.
    ///
    /// A workload naming an unknown class is left unstamped and the error
    /// is returned; the caller decides whether to admit it anyway.
    pub fn admit(&self, workload: &mut Workload) -> Result<Priority, PriorityClassError> {
        let class = workload.priority_class_name.as_deref();
        match self.resolve(class) {
            Some(priority) => {
                workload.priority = match priority {
                    Priority::Value(v) => Some(v),
                    Priority::Critical(c) => Some(c.value()),
                    Priority::Unresolved => None,
                };
                Ok(priority)
            }
            None => Err(PriorityClassError::UnknownClass(
                class.unwrap_or_default().to_string(),
            )),
        }
    }
}

impl PriorityResolver for PriorityClassRegistry {
    fn resolve(&self, class_name: Option<&str>) -> Option<Priority> {
        match class_name {
            Some(name) => {
                if let Some(critical) = SystemCritical::from_class_name(name) {
                    return Some(Priority::Critical(critical));
                }
                self.classes.get(name).map(|c| Priority::Value(c.value))
            }
            None => Some(Priority::Value(
                self.global_default().map(|c| c.value).unwrap_or(0),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PriorityClassRegistry {
        PriorityClassRegistry::from_classes([
            PriorityClass::new("low", 1),
            PriorityClass::new("medium", 100),
            PriorityClass::new("high", 1000),
        ])
        .unwrap()
    }

    #[test]
    fn order_has_critical_on_top_and_unresolved_at_bottom() {
        let top_user = Priority::Value(HIGHEST_USER_DEFINABLE_PRIORITY);
        assert!(Priority::Critical(SystemCritical::Cluster) > top_user);
        assert!(Priority::Critical(SystemCritical::Cluster) > Priority::Value(i32::MAX));
        assert!(Priority::Critical(SystemCritical::Node) > Priority::Critical(SystemCritical::Cluster));
        assert!(Priority::Unresolved < Priority::Value(i32::MIN));
        assert!(Priority::Value(1) < Priority::Value(100));
    }

    #[test]
    fn resolves_user_and_reserved_classes() {
        let r = registry();
        assert_eq!(r.resolve(Some("medium")), Some(Priority::Value(100)));
        assert_eq!(
            r.resolve(Some(SYSTEM_NODE_CRITICAL)),
            Some(Priority::Critical(SystemCritical::Node))
        );
        assert_eq!(r.resolve(Some("nope")), None);
    }

    #[test]
    fn missing_class_uses_global_default_or_zero() {
        let mut r = registry();
        assert_eq!(r.resolve(None), Some(Priority::Value(0)));

        let mut default = PriorityClass::new("standard", 50);
        default.global_default = true;
        r.register(default).unwrap();
        assert_eq!(r.resolve(None), Some(Priority::Value(50)));
    }

    #[test]
    fn rejects_reserved_prefix_and_oversized_values() {
        let mut r = PriorityClassRegistry::new();
        assert!(matches!(
            r.register(PriorityClass::new("system-custom", 5)),
            Err(PriorityClassError::Reserved(_))
        ));
        assert!(matches!(
            r.register(PriorityClass::new("huge", HIGHEST_USER_DEFINABLE_PRIORITY + 1)),
            Err(PriorityClassError::ValueTooHigh { .. })
        ));
        assert!(r.register(PriorityClass::new("max", HIGHEST_USER_DEFINABLE_PRIORITY)).is_ok());
    }

    #[test]
    fn only_one_global_default() {
        let mut r = PriorityClassRegistry::new();
        let mut a = PriorityClass::new("a", 1);
        a.global_default = true;
        let mut b = PriorityClass::new("b", 2);
        b.global_default = true;
        r.register(a.clone()).unwrap();
        assert!(matches!(
            r.register(b),
            Err(PriorityClassError::DuplicateGlobalDefault { .. })
        ));
        // Re-registering the same default is an update, not a conflict.
        a.value = 3;
        assert!(r.register(a).is_ok());
    }

    #[test]
    fn admit_stamps_value() {
        let r = registry();
        let mut w = Workload::new("default", "api").with_priority_class("high");
        assert_eq!(r.admit(&mut w), Ok(Priority::Value(1000)));
        assert_eq!(w.priority, Some(1000));

        let mut bad = Workload::new("default", "x").with_priority_class("ghost");
        assert!(r.admit(&mut bad).is_err());
        assert_eq!(bad.priority, None);
    }

    #[test]
    fn reserved_class_wins_over_stamped_value() {
        let r = registry();
        let mut w = Workload::new("kube-system", "critical").with_priority_class(SYSTEM_CLUSTER_CRITICAL);
        w.priority = Some(0);
        assert_eq!(Priority::of(&w, &r), Priority::Critical(SystemCritical::Cluster));
    }

    #[test]
    fn stamped_value_is_not_re_resolved() {
        let mut r = registry();
        let mut w = Workload::new("default", "api").with_priority_class("low");
        r.admit(&mut w).unwrap();
        r.register(PriorityClass::new("low", 999)).unwrap();
        assert_eq!(Priority::of(&w, &r), Priority::Value(1));
    }

    #[test]
    fn unknown_class_is_unresolved() {
        let r = registry();
        let w = Workload::new("default", "x").with_priority_class("ghost");
        assert_eq!(Priority::of(&w, &r), Priority::Unresolved);
    }

    #[test]
    fn weight_orders_like_priority() {
        assert!(Priority::Unresolved.weight() < Priority::Value(-5).weight());
        assert!(Priority::Value(HIGHEST_USER_DEFINABLE_PRIORITY).weight()
            < Priority::Critical(SystemCritical::Cluster).weight());
    }
}
