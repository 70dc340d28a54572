//! Error types for the versioning engine.

use crate::types::{BranchName, EntityKind, LogicalId};
use thiserror::Error;

/// Main error type for engine operations.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("record not found: {kind}/{logical_id} on branch {branch}")]
    NotFound {
        kind: EntityKind,
        logical_id: LogicalId,
        branch: BranchName,
    },

    #[error("invalid state for {kind}/{logical_id}: {reason}")]
    InvalidState {
        kind: EntityKind,
        logical_id: LogicalId,
        reason: String,
    },

    #[error("uniqueness conflict on {field} = {value}")]
    UniquenessConflict { field: String, value: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("branch not found: {0}")]
    BranchNotFound(String),

    #[error("branch already exists: {0}")]
    BranchExists(String),

    #[error("entity kind not registered: {0}")]
    UnknownEntity(String),

    #[error("entity kind already registered: {0}")]
    EntityExists(String),

    #[error("operation not permitted on branch {0}")]
    ProtectedBranch(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Serialization(e.to_string())
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;
