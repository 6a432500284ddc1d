//! Redis-backed coordination store
//!
//! # Example
//!
//! ```rust,ignore
//! use replicore::store::{RedisStore, RedisStoreConfig};
//!
//! let store = RedisStore::connect(&RedisStoreConfig::default()).await?;
//! let won = store.acquire("replicore:leader", "node-a", Duration::from_secs(10)).await?;
//! ```

use async_trait::async_trait;
use deadpool_redis::{Config as PoolConfig, Pool, Runtime};
use redis::AsyncCommands;
use std::time::Duration;

use super::{generation_key, CoordinationStore, StoreError, StoreResult};

/// Deletes the key only when it still holds the caller's id
const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Redis connection settings
#[derive(Debug, Clone)]
pub struct RedisStoreConfig {
    /// Redis URL (e.g., redis://localhost:6379)
    pub url: String,

    /// Connection pool size
    pub pool_size: usize,

    /// Upper bound on waiting for, creating or recycling a pooled connection
    pub timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            timeout: Duration::from_secs(2),
        }
    }
}

/// Coordination store over a pooled Redis connection
pub struct RedisStore {
    pool: Pool,
    release_script: redis::Script,
}

impl RedisStore {
    /// Build the pool and verify connectivity with a PING
    pub async fn connect(config: &RedisStoreConfig) -> StoreResult<Self> {
        let pool = PoolConfig::from_url(&config.url)
            .builder()
            .map_err(|e| StoreError::Command(format!("Failed to create pool builder: {e}")))?
            .max_size(config.pool_size)
            .wait_timeout(Some(config.timeout))
            .create_timeout(Some(config.timeout))
            .recycle_timeout(Some(config.timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| StoreError::Command(format!("Failed to create Redis pool: {e}")))?;

        let store = Self {
            pool,
            release_script: redis::Script::new(RELEASE_SCRIPT),
        };
        store.ping().await?;

        tracing::info!(url = %config.url, pool_size = config.pool_size, "Connected to Redis");

        Ok(store)
    }

    async fn conn(&self) -> StoreResult<deadpool_redis::Connection> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to get Redis connection: {e}")))
    }
}

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_io_error()
            || err.is_connection_refusal()
            || err.is_connection_dropped()
            || err.is_timeout()
        {
            Self::Connection(err.to_string())
        } else {
            Self::Command(err.to_string())
        }
    }
}

fn millis(ttl: Duration) -> u64 {
    // PX 0 is rejected by Redis
    (ttl.as_millis() as u64).max(1)
}

#[async_trait]
impl CoordinationStore for RedisStore {
    async fn acquire(&self, key: &str, holder: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(holder)
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut *conn)
            .await?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        let value: Option<String> = conn.get(key).await?;
        Ok(value)
    }

    async fn refresh(&self, key: &str, ttl: Duration) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let updated: bool = conn.pexpire(key, millis(ttl) as i64).await?;
        Ok(updated)
    }

    async fn release(&self, key: &str, holder: &str) -> StoreResult<bool> {
        let mut conn = self.conn().await?;
        let deleted: i64 = self
            .release_script
            .key(key)
            .arg(holder)
            .invoke_async(&mut *conn)
            .await?;
        Ok(deleted > 0)
    }

    async fn next_generation(&self, key: &str) -> StoreResult<u64> {
        let mut conn = self.conn().await?;
        let generation: u64 = conn.incr(generation_key(key), 1u64).await?;
        Ok(generation)
    }

    async fn push_batch(&self, list_key: &str, items: &[String]) -> StoreResult<usize> {
        if items.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn().await?;
        let _len: usize = conn.rpush(list_key, items).await?;
        Ok(items.len())
    }

    async fn pop_one(&self, list_key: &str) -> StoreResult<Option<String>> {
        let mut conn = self.conn().await?;
        let item: Option<String> = conn.lpop(list_key, None).await?;
        Ok(item)
    }

    async fn ping(&self) -> StoreResult<()> {
        let mut conn = self.conn().await?;
        let _: String = redis::cmd("PING").query_async(&mut *conn).await?;
        Ok(())
    }
}
