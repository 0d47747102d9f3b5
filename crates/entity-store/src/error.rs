use common::EntityKind;
use thiserror::Error;

use crate::query::QueryValidationError;

/// Errors that can occur when interacting with the entity store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An update or delete targeted a row that does not exist.
    #[error("{entity} {id} not found")]
    RowNotFound { entity: EntityKind, id: i32 },

    /// A unique constraint rejected the write.
    #[error("Unique constraint violated on {entity}: {detail}")]
    UniqueViolation { entity: EntityKind, detail: String },

    /// A foreign key constraint rejected the write.
    #[error("Foreign key violated on {entity}: {detail}")]
    ForeignKeyViolation { entity: EntityKind, detail: String },

    /// A check constraint rejected the write (e.g. negative stock).
    #[error("Check constraint violated on {entity}: {detail}")]
    CheckViolation { entity: EntityKind, detail: String },

    /// The listing query was malformed.
    #[error("Invalid query: {0}")]
    InvalidQuery(#[from] QueryValidationError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl StoreError {
    /// Classifies a sqlx error raised while writing `entity`.
    ///
    /// Constraint violations become their dedicated variants so callers can
    /// tell a duplicate name apart from a lost connection.
    pub(crate) fn from_write(entity: EntityKind, err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(ref db_err) = err {
            let detail = db_err
                .constraint()
                .map(str::to_string)
                .unwrap_or_else(|| db_err.message().to_string());
            if db_err.is_unique_violation() {
                return StoreError::UniqueViolation { entity, detail };
            }
            if db_err.is_foreign_key_violation() {
                return StoreError::ForeignKeyViolation { entity, detail };
            }
            if db_err.is_check_violation() {
                return StoreError::CheckViolation { entity, detail };
            }
        }
        StoreError::Database(err)
    }
}

/// Result type for entity store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
