//! StateStore: redb-backed cluster state.
//!
//! Provides typed CRUD over nodes, workloads and priority classes, and
//! implements the collaborator traits the engine consumes. All values are
//! JSON-serialized into redb's `&[u8]` value columns. The store supports
//! both on-disk and in-memory backends (the latter for testing).
//!
//! Every workload write bumps its `resource_version`, so watch consumers
//! can discard stale or reordered updates.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use preemptor_core::{Node, Phase, PriorityClass, PriorityClassRegistry, Workload, WorkloadId};

use crate::cluster::{ClusterSource, ClusterWriter, WorkloadEvictor};
use crate::error::{StateError, StateResult};
use crate::tables::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe state store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent state store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory state store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
        txn.open_table(NODES).map_err(map_err!(Table))?;
        txn.open_table(PRIORITY_CLASSES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Generic table access ───────────────────────────────────────

    fn put<T: Serialize>(&self, def: JsonTable, key: &str, value: &T) -> StateResult<()> {
        let value = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(&self, def: JsonTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn list<T: DeserializeOwned>(&self, def: JsonTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let item: T = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(item);
        }
        Ok(results)
    }

    fn remove(&self, def: JsonTable, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }

    /// Read-modify-write a workload inside one write transaction.
    fn update_workload<F>(&self, id: &WorkloadId, mutate: F) -> StateResult<Workload>
    where
        F: FnOnce(&mut Workload) -> StateResult<()>,
    {
        let key = id.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let updated = {
            let mut table = txn.open_table(WORKLOADS).map_err(map_err!(Table))?;
            let current = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());
            let Some(bytes) = current else {
                return Err(StateError::NotFound(key));
            };
            let mut workload: Workload =
                serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
            mutate(&mut workload)?;
            workload.resource_version += 1;
            let value = serde_json::to_vec(&workload).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            workload
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(updated)
    }

    // ── Nodes ──────────────────────────────────────────────────────

    /// Insert or update a node.
    pub fn put_node(&self, node: &Node) -> StateResult<()> {
        let mut node = node.clone();
        if let Some(existing) = self.get_node(&node.id)? {
            node.resource_version = node.resource_version.max(existing.resource_version + 1);
        }
        self.put(NODES, &node.id, &node)?;
        debug!(node = %node.id, "node stored");
        Ok(())
    }

    /// Get a node by ID.
    pub fn get_node(&self, node_id: &str) -> StateResult<Option<Node>> {
        self.get(NODES, node_id)
    }

    /// Delete a node by ID. Returns true if it existed.
    pub fn delete_node(&self, node_id: &str) -> StateResult<bool> {
        self.remove(NODES, node_id)
    }

    // ── Workloads ──────────────────────────────────────────────────

    /// Insert or overwrite a workload record as-is.
    pub fn put_workload(&self, workload: &Workload) -> StateResult<()> {
        let key = workload.id.table_key();
        self.put(WORKLOADS, &key, workload)?;
        debug!(%key, phase = ?workload.phase, "workload stored");
        Ok(())
    }

    /// Admit a newly submitted workload.
    ///
    /// The priority class is resolved once, here, and its value stamped
    /// onto the record. A workload referencing an unknown class is still
    /// admitted, unstamped; it will sort below every resolvable workload.
    pub fn submit_workload(&self, workload: &Workload) -> StateResult<Workload> {
        let mut workload = workload.clone();
        let registry = self.priority_registry()?;
        if let Err(e) = registry.admit(&mut workload) {
            warn!(workload = %workload.id, error = %e, "admitting workload with invalid priority reference");
        }
        self.put_workload(&workload)?;
        info!(workload = %workload.id, priority = ?workload.priority, "workload submitted");
        Ok(workload)
    }

    /// Get a workload by identity.
    pub fn get_workload(&self, id: &WorkloadId) -> StateResult<Option<Workload>> {
        self.get(WORKLOADS, &id.table_key())
    }

    /// Delete a workload record. Returns true if it existed.
    pub fn delete_workload(&self, id: &WorkloadId) -> StateResult<bool> {
        self.remove(WORKLOADS, &id.table_key())
    }

    /// Finish a termination: the workload leaves the cluster (Gone).
    ///
    /// Returns false if the workload was already gone.
    pub fn complete_termination(&self, id: &WorkloadId) -> StateResult<bool> {
        let Some(workload) = self.get_workload(id)? else {
            return Ok(false);
        };
        if workload.phase != Phase::Terminating {
            return Err(StateError::InvalidTransition {
                id: id.clone(),
                from: workload.phase,
                to: Phase::Gone,
            });
        }
        let existed = self.delete_workload(id)?;
        debug!(workload = %id, "termination completed");
        Ok(existed)
    }

    /// Complete every pending termination. Returns how many finished.
    pub fn complete_all_terminations(&self) -> StateResult<u32> {
        let mut count = 0;
        for workload in self.list_workloads()? {
            if workload.phase == Phase::Terminating && self.complete_termination(&workload.id)? {
                count += 1;
            }
        }
        Ok(count)
    }

    // ── Priority classes ───────────────────────────────────────────

    /// Insert or update a priority class after validating it against the
    /// classes already stored.
    pub fn put_priority_class(&self, class: &PriorityClass) -> StateResult<()> {
        let mut registry = self.priority_registry()?;
        registry.register(class.clone())?;
        self.put(PRIORITY_CLASSES, &class.name, class)?;
        debug!(name = %class.name, value = class.value, "priority class stored");
        Ok(())
    }

    pub fn list_priority_classes(&self) -> StateResult<Vec<PriorityClass>> {
        self.list(PRIORITY_CLASSES)
    }

    pub fn delete_priority_class(&self, name: &str) -> StateResult<bool> {
        self.remove(PRIORITY_CLASSES, name)
    }

    /// Build a resolver over the stored classes.
    pub fn priority_registry(&self) -> StateResult<PriorityClassRegistry> {
        Ok(PriorityClassRegistry::from_classes(self.list_priority_classes()?)?)
    }
}

impl ClusterSource for StateStore {
    fn list_nodes(&self) -> StateResult<Vec<Node>> {
        self.list(NODES)
    }

    fn list_workloads(&self) -> StateResult<Vec<Workload>> {
        self.list(WORKLOADS)
    }
}

impl WorkloadEvictor for StateStore {
    fn evict(&self, id: &WorkloadId) -> StateResult<Workload> {
        self.update_workload(id, |w| match w.phase {
            Phase::Bound => {
                w.phase = Phase::Terminating;
                Ok(())
            }
            // Already on its way out.
            Phase::Terminating => Ok(()),
            from => Err(StateError::InvalidTransition {
                id: w.id.clone(),
                from,
                to: Phase::Terminating,
            }),
        })
    }
}

impl ClusterWriter for StateStore {
    fn bind(&self, id: &WorkloadId, node: &str) -> StateResult<Workload> {
        if self.get_node(node)?.is_none() {
            return Err(StateError::NotFound(format!("node {node}")));
        }
        self.update_workload(id, |w| {
            if !w.phase.can_transition_to(Phase::Bound) {
                return Err(StateError::InvalidTransition {
                    id: w.id.clone(),
                    from: w.phase,
                    to: Phase::Bound,
                });
            }
            w.phase = Phase::Bound;
            w.node = Some(node.to_string());
            w.nominated_node = None;
            Ok(())
        })
    }

    fn nominate(&self, id: &WorkloadId, node: Option<&str>) -> StateResult<Workload> {
        self.update_workload(id, |w| {
            w.nominated_node = node.map(str::to_string);
            Ok(())
        })
    }
}
