use async_trait::async_trait;
use chrono::Duration;
use redis::AsyncCommands;
use tarmac_offer::{CacheBackend, CacheEntry, CacheError};
use tracing::debug;

const KEY_PREFIX: &str = "availability";

fn redis_key(key: &str) -> String {
    format!("{}:{}", KEY_PREFIX, key)
}

/// Redis keeps at least one second; a zero or negative retention would
/// make `SET EX` fail.
fn retention_seconds(retain_for: Duration) -> u64 {
    retain_for.num_seconds().max(1) as u64
}

fn backend(err: redis::RedisError) -> CacheError {
    CacheError::Backend(err.to_string())
}

/// Availability cache entries in Redis, keyed by the search hash. Redis
/// expiry covers the grace window; freshness is still judged by the
/// cache against its own clock.
#[derive(Clone)]
pub struct RedisCacheBackend {
    client: redis::Client,
}

impl RedisCacheBackend {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CacheBackend for RedisCacheBackend {
    async fn load(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(backend)?;
        let raw: Option<String> = conn.get(redis_key(key)).await.map_err(backend)?;
        raw.map(|raw| serde_json::from_str(&raw).map_err(|e| CacheError::Serialization(e.to_string())))
            .transpose()
    }

    async fn store(&self, entry: &CacheEntry, retain_for: Duration) -> Result<(), CacheError> {
        let payload = serde_json::to_string(entry).map_err(|e| CacheError::Serialization(e.to_string()))?;
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(backend)?;
        conn.set_ex::<_, _, ()>(redis_key(&entry.key), payload, retention_seconds(retain_for))
            .await
            .map_err(backend)?;
        debug!(key = %entry.key, expires_at = %entry.expires_at, "availability cached");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await.map_err(backend)?;
        conn.del::<_, ()>(redis_key(key)).await.map_err(backend)?;
        Ok(())
    }
}
