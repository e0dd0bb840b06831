//! Store error types

use thiserror::Error;

use crate::core_types::EntityId;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Entity not found: {0}")]
    NotFound(EntityId),

    #[error("Entity already exists: {0}")]
    AlreadyExists(EntityId),

    /// The entity was saved by someone else since it was fetched.
    #[error("Concurrent modification of {id}: expected version {expected}, found {actual}")]
    ConcurrentModification {
        id: EntityId,
        expected: u64,
        actual: u64,
    },

    #[error("Entity {id} is leased by {holder}")]
    LeasedByOther { id: EntityId, holder: String },

    #[error("Store operation timed out after {0}ms")]
    Timeout(u64),

    #[error("Store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Transient conditions that the next poll may resolve on its own.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::ConcurrentModification { .. }
                | StoreError::LeasedByOther { .. }
                | StoreError::Timeout(_)
                | StoreError::Backend(_)
        )
    }

    pub fn code(&self) -> &'static str {
        match self {
            StoreError::NotFound(_) => "NOT_FOUND",
            StoreError::AlreadyExists(_) => "ALREADY_EXISTS",
            StoreError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            StoreError::LeasedByOther { .. } => "LEASED_BY_OTHER",
            StoreError::Timeout(_) => "TIMEOUT",
            StoreError::Backend(_) => "BACKEND_ERROR",
        }
    }
}
