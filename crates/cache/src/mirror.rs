use std::collections::HashMap;

use async_trait::async_trait;
use common::EntityKind;

use crate::{CacheRecord, Result};

/// Field holding the version of the row an entry was written from.
pub const VERSION_FIELD: &str = "_version";

/// The fields of one cache entry.
pub type FieldMap = HashMap<String, String>;

/// Builds the key of an entity's cache entry, e.g. `product:42`.
pub fn cache_key(entity: EntityKind, id: i32) -> String {
    format!("{entity}:{id}")
}

/// A hash-per-key cache.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait CacheMirror: Send + Sync {
    /// Returns every field stored under `key`. An absent key yields an empty map.
    async fn get_all(&self, key: &str) -> Result<FieldMap>;

    /// Writes `fields` under `key`, overwriting fields that already exist.
    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<()>;

    /// Writes `fields` together with `version` under `key`, unless the entry
    /// already holds a strictly greater version. An entry without a readable
    /// version counts as older. Returns whether the write was applied.
    ///
    /// The comparison and the write are one atomic step, so writers racing
    /// on a key settle on the newest version whatever order they arrive in.
    async fn set_fields_if_newer(
        &self,
        key: &str,
        fields: &[(String, String)],
        version: i64,
    ) -> Result<bool>;

    /// Removes the entry stored under `key`, if any.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Extension trait reading and writing typed rows through a cache mirror.
#[async_trait]
pub trait CacheMirrorExt: CacheMirror {
    /// Reads and decodes a row. `Ok(None)` is a miss.
    async fn get_record<R: CacheRecord>(&self, id: i32) -> Result<Option<R>> {
        let key = cache_key(R::ENTITY, id);
        let fields = self.get_all(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        R::from_fields(&key, &fields).map(Some)
    }

    /// Writes every field of a row under its key, unless the entry already
    /// mirrors a newer version of the row. Returns whether the write applied.
    async fn put_record<R: CacheRecord>(&self, record: &R) -> Result<bool> {
        let key = cache_key(R::ENTITY, record.cache_id());
        let version = record.version();
        let applied = self
            .set_fields_if_newer(&key, &record.to_fields(), version)
            .await?;
        if !applied {
            tracing::debug!(%key, version, "Cache entry holds a newer version");
        }
        Ok(applied)
    }

    /// Drops the entry of one row.
    async fn evict(&self, entity: EntityKind, id: i32) -> Result<()> {
        self.delete(&cache_key(entity, id)).await
    }
}

impl<T: CacheMirror + ?Sized> CacheMirrorExt for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_joins_entity_and_id() {
        assert_eq!(cache_key(EntityKind::Product, 42), "product:42");
        assert_eq!(cache_key(EntityKind::ProductCategory, 1), "product_category:1");
        assert_eq!(cache_key(EntityKind::OrderItem, 7), "order_item:7");
    }
}
