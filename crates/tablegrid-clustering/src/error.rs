//! Clustering error types.

use thiserror::Error;

/// Errors that can occur in membership table operations.
#[derive(Debug, Error)]
pub enum ClusteringError {
    #[error("document store error: {0}")]
    Store(#[from] tablegrid_store::StoreError),

    /// A stored document does not decode; the table is corrupt or was
    /// written by an incompatible schema. Never retried.
    #[error("corrupt membership document {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("configuration error: {0}")]
    Config(#[from] tablegrid_core::ConfigError),

    #[error("failed to encode membership document: {0}")]
    Encode(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("table version {version} cannot be incremented")]
    VersionExhausted { version: i32 },

    #[error("{operation} gave up after {attempts} contended attempts")]
    ContentionExhausted {
        operation: &'static str,
        attempts: u32,
    },
}

impl ClusteringError {
    pub(crate) fn decode(id: impl Into<String>, reason: impl ToString) -> Self {
        ClusteringError::Decode {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

pub type ClusteringResult<T> = Result<T, ClusteringError>;
