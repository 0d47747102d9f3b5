use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{CacheError, CacheMirror, FieldMap, Result, VERSION_FIELD};

/// In-memory cache mirror implementation for testing.
///
/// Counts every call and can be switched into an unavailable state to
/// exercise cache failure paths.
#[derive(Clone, Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, FieldMap>>>,
    unavailable: Arc<AtomicBool>,
    fail_on_write: Arc<AtomicBool>,
    gets: Arc<AtomicUsize>,
    sets: Arc<AtomicUsize>,
    deletes: Arc<AtomicUsize>,
}

impl InMemoryCache {
    /// Creates a new empty in-memory cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail with [`CacheError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Makes every subsequent write or delete fail while reads keep working.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    /// Returns the raw fields under `key`, bypassing counters and failure injection.
    pub async fn entry(&self, key: &str) -> Option<FieldMap> {
        self.entries.read().await.get(key).cloned()
    }

    /// Overwrites the raw fields under `key`.
    pub async fn insert_raw(&self, key: &str, fields: FieldMap) {
        self.entries.write().await.insert(key.to_string(), fields);
    }

    /// Returns the number of keys held.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable(
                "in-memory cache switched off".to_string(),
            ));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<()> {
        self.check_available()?;
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(CacheError::Unavailable(
                "in-memory cache rejecting writes".to_string(),
            ));
        }
        Ok(())
    }
}

fn merge(entry: &mut FieldMap, fields: &[(String, String)]) {
    for (field, value) in fields {
        entry.insert(field.clone(), value.clone());
    }
}

#[async_trait]
impl CacheMirror for InMemoryCache {
    async fn get_all(&self, key: &str) -> Result<FieldMap> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        Ok(self
            .entries
            .read()
            .await
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        let mut entries = self.entries.write().await;
        merge(entries.entry(key.to_string()).or_default(), fields);
        Ok(())
    }

    async fn set_fields_if_newer(
        &self,
        key: &str,
        fields: &[(String, String)],
        version: i64,
    ) -> Result<bool> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.to_string()).or_default();
        let current = entry
            .get(VERSION_FIELD)
            .and_then(|v| v.parse::<i64>().ok());
        if current.is_some_and(|current| current > version) {
            return Ok(false);
        }
        merge(entry, fields);
        entry.insert(VERSION_FIELD.to_string(), version.to_string());
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.check_writable()?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}
