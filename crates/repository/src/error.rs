use cache::CacheError;
use common::EntityKind;
use entity_store::StoreError;
use thiserror::Error;

/// Errors returned by the cache-aside accessors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The row does not exist in the entity store.
    #[error("{entity} {id} not found")]
    NotFound { entity: EntityKind, id: i32 },

    /// No row carries the requested unique name.
    #[error("{entity} named '{name}' not found")]
    NameNotFound { entity: EntityKind, name: String },

    /// The cache mirror could not be read or written.
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    /// The entity store failed.
    #[error("Store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for RepositoryError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RowNotFound { entity, id } => RepositoryError::NotFound { entity, id },
            other => RepositoryError::Store(other),
        }
    }
}

impl RepositoryError {
    /// Returns the missing entity if this is a not-found error.
    pub fn not_found_entity(&self) -> Option<EntityKind> {
        match self {
            RepositoryError::NotFound { entity, .. }
            | RepositoryError::NameNotFound { entity, .. } => Some(*entity),
            _ => None,
        }
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;
