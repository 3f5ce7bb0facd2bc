//! Reminder table error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReminderError {
    #[error("document store error: {0}")]
    Store(#[from] tablegrid_store::StoreError),

    /// A stored reminder does not decode. Never retried.
    #[error("corrupt reminder document {id}: {reason}")]
    Decode { id: String, reason: String },

    #[error("failed to encode reminder document: {0}")]
    Encode(String),
}

impl ReminderError {
    pub(crate) fn decode(id: impl Into<String>, reason: impl ToString) -> Self {
        ReminderError::Decode {
            id: id.into(),
            reason: reason.to_string(),
        }
    }
}

pub type ReminderResult<T> = Result<T, ReminderError>;
