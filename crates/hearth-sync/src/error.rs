use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced to callers of the channel synchronizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Content failed local validation. Never retried.
    #[error("Invalid content: {0}")]
    InvalidContent(String),

    #[error("Not permitted")]
    Unauthorized,

    /// The target message is tombstoned.
    #[error("Message is deleted")]
    Deleted,

    /// Channel or message does not exist.
    #[error("Not found")]
    NotFound,

    /// Transient store or network failure; the caller may retry with backoff.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Store failure that retrying will not fix.
    #[error("Store failure: {0}")]
    Store(String),
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, SyncError::Unavailable(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => SyncError::Unavailable(reason),
            StoreError::NotFound => SyncError::NotFound,
            StoreError::Tombstoned => SyncError::Deleted,
            StoreError::Fatal(reason) => SyncError::Store(reason),
        }
    }
}
