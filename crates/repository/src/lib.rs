//! Cache-aside accessors.
//!
//! [`CachedRepository`] reads through the cache mirror and falls back to the
//! entity store on a miss, populating the mirror before returning. Writes go
//! to the store first and then overwrite the cached entry. A failed cache
//! write is an error, never a silent fallback.

pub mod defaults;
pub mod error;
pub mod repository;

pub use defaults::{
    DEFAULT_CATEGORY_DESCRIPTION, DEFAULT_CATEGORY_ID, DEFAULT_CATEGORY_NAME, DEFAULT_USER_EMAIL,
    DEFAULT_USER_ID, DEFAULT_USER_NAME, default_category, default_user,
};
pub use error::{RepositoryError, Result};
pub use repository::{CachedRepository, DEFAULT_IMPORT_CHUNK_SIZE, ProductStream};
