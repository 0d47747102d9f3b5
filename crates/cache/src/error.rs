use std::time::Duration;

use thiserror::Error;

/// Errors raised by the cache mirror.
///
/// Every variant means "the cache could not answer", never "the row does not
/// exist"; a miss is reported as `Ok(None)`.
#[derive(Debug, Error)]
pub enum CacheError {
    /// The backend refused or dropped the call.
    #[error("Cache unavailable: {0}")]
    Unavailable(String),

    /// A Redis protocol or connection error occurred.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// The call did not complete within the configured timeout.
    #[error("Cache call timed out after {0:?}")]
    Timeout(Duration),

    /// A cached field could not be decoded into the row type.
    #[error("Cannot decode field '{field}' of cache entry '{key}'")]
    Decode { key: String, field: String },
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
