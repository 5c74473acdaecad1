//! Error types for cluster state access.

use preemptor_core::{Phase, WorkloadId};
use thiserror::Error;

/// Result type alias for state operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur while reading or mutating cluster state.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid phase transition for {id}: {from:?} -> {to:?}")]
    InvalidTransition {
        id: WorkloadId,
        from: Phase,
        to: Phase,
    },

    #[error("invalid priority class: {0}")]
    PriorityClass(#[from] preemptor_core::PriorityClassError),
}

impl StateError {
    /// The object was already gone when the operation reached it.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StateError::NotFound(_))
    }
}
