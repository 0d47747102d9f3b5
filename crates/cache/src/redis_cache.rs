use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use redis::{AsyncCommands, RedisResult, Script, aio::MultiplexedConnection};
use tokio::time::timeout;

use crate::{CacheError, CacheMirror, FieldMap, Result, VERSION_FIELD};

/// Compares the stored version field with ARGV[2] and writes the hash only
/// when the stored one is not greater. ARGV[3..] are field/value pairs.
const SET_IF_NEWER: &str = r"
local current = redis.call('HGET', KEYS[1], ARGV[1])
if current and tonumber(current) and tonumber(current) > tonumber(ARGV[2]) then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2], unpack(ARGV, 3))
return 1
";

/// Connection settings for [`RedisCache`].
#[derive(Debug, Clone)]
pub struct RedisCacheConfig {
    pub url: String,
    /// Prepended to every key, e.g. `"shop:"`.
    pub key_prefix: String,
    /// Upper bound for each cache call, connection included.
    pub timeout: Duration,
}

impl Default for RedisCacheConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            key_prefix: String::new(),
            timeout: Duration::from_millis(250),
        }
    }
}

/// Redis-backed cache mirror using one hash per entry.
#[derive(Clone)]
pub struct RedisCache {
    connection: MultiplexedConnection,
    prefix: String,
    timeout: Duration,
    set_if_newer: Arc<Script>,
}

impl RedisCache {
    /// Opens a multiplexed connection to the configured server.
    pub async fn connect(config: RedisCacheConfig) -> Result<Self> {
        let client = redis::Client::open(config.url.as_str())?;
        let connection = timeout(config.timeout, client.get_multiplexed_async_connection())
            .await
            .map_err(|_| CacheError::Timeout(config.timeout))??;

        Ok(Self {
            connection,
            prefix: config.key_prefix,
            timeout: config.timeout,
            set_if_newer: Arc::new(Script::new(SET_IF_NEWER)),
        })
    }

    /// Round-trips a PING to verify the connection.
    pub async fn ping(&self) -> Result<()> {
        let mut conn = self.connection.clone();
        let pong: String = self.bounded(redis::cmd("PING").query_async(&mut conn)).await?;
        tracing::debug!(%pong, "Redis reachable");
        Ok(())
    }

    fn prefixed(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    /// Runs one call under the configured timeout.
    ///
    /// A call that times out may still reach the server and be applied
    /// afterwards. Record writes go through the versioned script, so such a
    /// late write cannot replace an entry mirroring a newer row version.
    async fn bounded<T, F>(&self, call: F) -> Result<T>
    where
        F: Future<Output = RedisResult<T>> + Send,
    {
        match timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                tracing::warn!(timeout = ?self.timeout, "Redis call timed out");
                Err(CacheError::Timeout(self.timeout))
            }
        }
    }
}

#[async_trait]
impl CacheMirror for RedisCache {
    async fn get_all(&self, key: &str) -> Result<FieldMap> {
        let key = self.prefixed(key);
        let mut conn = self.connection.clone();
        self.bounded(conn.hgetall::<_, FieldMap>(&key)).await
    }

    async fn set_fields(&self, key: &str, fields: &[(String, String)]) -> Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let key = self.prefixed(key);
        let mut conn = self.connection.clone();
        self.bounded(conn.hset_multiple::<_, _, _, ()>(&key, fields))
            .await
    }

    async fn set_fields_if_newer(
        &self,
        key: &str,
        fields: &[(String, String)],
        version: i64,
    ) -> Result<bool> {
        let key = self.prefixed(key);
        let mut invocation = self.set_if_newer.prepare_invoke();
        invocation.key(&key).arg(VERSION_FIELD).arg(version);
        for (field, value) in fields {
            invocation.arg(field).arg(value);
        }
        let mut conn = self.connection.clone();
        let applied: i64 = self
            .bounded(invocation.invoke_async(&mut conn))
            .await?;
        Ok(applied == 1)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = self.prefixed(key);
        let mut conn = self.connection.clone();
        self.bounded(conn.del::<_, ()>(&key)).await
    }
}
