//! Cache Mirror: a key-value mirror holding one hash per entity row.
//!
//! Entries live under `"<entity>:<id>"` and hold the row's columns as string
//! fields. The mirror is an accelerator only; the entity store stays the
//! source of truth.

pub mod codec;
pub mod error;
pub mod memory;
pub mod mirror;
pub mod redis_cache;

pub use codec::CacheRecord;
pub use error::{CacheError, Result};
pub use memory::InMemoryCache;
pub use mirror::{CacheMirror, CacheMirrorExt, FieldMap, VERSION_FIELD, cache_key};
pub use redis_cache::{RedisCache, RedisCacheConfig};
