//! Storage error types.

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The entity does not exist.
    #[error("Entity not found: {id}")]
    NotFound {
        /// Debug rendering of the entity id.
        id: String,
    },

    /// Attempted to insert an entity whose id is taken.
    #[error("Entity already exists: {id}")]
    AlreadyExists {
        /// Debug rendering of the entity id.
        id: String,
    },

    /// The backend could not serve the request.
    #[error("Store unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
    },
}

impl StoreError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(id: &impl std::fmt::Debug) -> Self {
        Self::NotFound {
            id: format!("{id:?}"),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(id: &impl std::fmt::Debug) -> Self {
        Self::AlreadyExists {
            id: format!("{id:?}"),
        }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Returns `true` if this is a `NotFound` error.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
