//! redb table definitions for the cluster state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).

use redb::TableDefinition;

/// Shape shared by every table.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Workloads keyed by `{namespace}/{name}`.
pub const WORKLOADS: JsonTable = TableDefinition::new("workloads");

/// Nodes keyed by `{node_id}`.
pub const NODES: JsonTable = TableDefinition::new("nodes");

/// Priority classes keyed by `{name}`.
pub const PRIORITY_CLASSES: JsonTable = TableDefinition::new("priority_classes");
