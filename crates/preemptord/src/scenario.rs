//! Cluster scenario files.
//!
//! A scenario is a TOML description of a cluster at one moment: priority
//! classes, nodes, and workloads that are either already running on a
//! node or waiting to be scheduled.
//!
//! ```toml
//! [[priority_classes]]
//! name = "low"
//! value = 1
//!
//! [[nodes]]
//! id = "n1"
//! capacity = { cpu = 1000 }
//!
//! [[workloads]]
//! name = "web"
//! priority_class = "low"
//! requests = { cpu = 200 }
//! node = "n1"
//! replicas = 3
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use preemptor_core::{
    Affinity, Labels, Node, NodeId, PriorityClass, PriorityClassConfig, ResourceVector, Workload,
};
use preemptor_state::StateStore;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub priority_classes: Vec<PriorityClassConfig>,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub workloads: Vec<WorkloadSpec>,
}

/// One workload entry, possibly expanded into several replicas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub priority_class: Option<String>,
    #[serde(default)]
    pub requests: ResourceVector,
    #[serde(default)]
    pub labels: Labels,
    #[serde(default)]
    pub node_selector: Labels,
    #[serde(default)]
    pub affinity: Affinity,
    /// Node the workload is already running on. Absent means pending.
    pub node: Option<NodeId>,
    #[serde(default)]
    pub created_at: u64,
    /// Copies named `{name}-{i}`, created one second apart.
    #[serde(default = "default_replicas")]
    pub replicas: u32,
}

fn default_namespace() -> String {
    "default".to_string()
}

fn default_replicas() -> u32 {
    1
}

impl WorkloadSpec {
    /// Expand into concrete workloads.
    pub fn expand(&self) -> Vec<Workload> {
        let names: Vec<(String, u64)> = if self.replicas <= 1 {
            vec![(self.name.clone(), self.created_at)]
        } else {
            (0..self.replicas)
                .map(|i| (format!("{}-{i}", self.name), self.created_at + u64::from(i)))
                .collect()
        };

        names
            .into_iter()
            .map(|(name, created_at)| {
                let mut w = Workload::new(&self.namespace, &name).with_created_at(created_at);
                w.priority_class_name = self.priority_class.clone();
                w.requests = self.requests.clone();
                w.labels = self.labels.clone();
                w.node_selector = self.node_selector.clone();
                w.affinity = self.affinity.clone();
                match &self.node {
                    Some(node) => w.bound_to(node),
                    None => w,
                }
            })
            .collect()
    }
}

impl Scenario {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Write the scenario into `store`. Priority classes go first so that
    /// every workload is admitted against them.
    pub fn load_into(&self, store: &StateStore) -> anyhow::Result<()> {
        for class in &self.priority_classes {
            store.put_priority_class(&PriorityClass::from(class))?;
        }
        for node in &self.nodes {
            store.put_node(node)?;
        }

        let mut count = 0;
        for spec in &self.workloads {
            for workload in spec.expand() {
                let mut admitted = store.submit_workload(&workload)?;
                if workload.node.is_some() {
                    admitted.node = workload.node.clone();
                    admitted.phase = workload.phase;
                    store.put_workload(&admitted)?;
                }
                count += 1;
            }
        }

        debug!(
            classes = self.priority_classes.len(),
            nodes = self.nodes.len(),
            workloads = count,
            "scenario loaded"
        );
        Ok(())
    }
}
