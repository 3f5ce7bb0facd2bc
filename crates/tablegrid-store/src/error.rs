//! Error types for the TableGrid document store.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for document store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during document store operations.
///
/// The variants up to `BadRequest` are the outcomes callers branch on; the
/// rest are backend failures that simply propagate. `NotFound` always
/// names a document; a missing container is `ContainerNotFound`.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("too many requests (retry after {retry_after:?})")]
    TooManyRequests { retry_after: Option<Duration> },

    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("bad request: {0}")]
    BadRequest(String),

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

    #[error("blocking store task failed: {0}")]
    Task(String),
}

impl StoreError {
    pub fn is_throttled(&self) -> bool {
        matches!(self, StoreError::TooManyRequests { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_container_not_found(&self) -> bool {
        matches!(self, StoreError::ContainerNotFound(_))
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, StoreError::PreconditionFailed(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}
