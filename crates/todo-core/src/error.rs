use thiserror::Error;

use crate::ids::ItemId;
use crate::model::BatchError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ListError {
    /// The list does not exist, or the requester may not see it. The two
    /// cases are indistinguishable to callers.
    #[error("List not found")]
    NotFound,

    #[error("Not authorized")]
    Unauthorized,

    #[error("Invalid mutation batch: {0}")]
    Validation(#[from] BatchError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Concurrent updates kept conflicting after {0} attempts")]
    Contention(u32),
}

impl ListError {
    /// Whether retrying the same operation may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, ListError::Store(StoreError::Unavailable(_)) | ListError::Contention(_))
    }
}

pub type Result<T> = std::result::Result<T, ListError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AgentError {
    #[error("Unknown item: {0}")]
    UnknownItem(ItemId),
}
