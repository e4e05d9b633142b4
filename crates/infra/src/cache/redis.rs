//! Redis-backed cache (feature `redis`).

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::instrument;

use super::CacheStore;
use crate::InfraError;

/// Shared Redis cache over a reconnecting multiplexed connection.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl RedisCache {
    /// Connect to `redis_url` (e.g. `"redis://localhost:6379/0"`).
    pub async fn connect(redis_url: impl AsRef<str>) -> Result<Self, InfraError> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| InfraError::Cache(format!("redis connection failed: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| InfraError::Cache(format!("redis connection failed: {e}")))?;
        Ok(Self { conn })
    }
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache").finish_non_exhaustive()
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    #[instrument(skip(self), err)]
    async fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        let mut conn = self.conn.clone();
        conn.get(key)
            .await
            .map_err(|e| InfraError::Cache(format!("redis GET failed: {e}")))
    }

    #[instrument(skip(self, value), err)]
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), InfraError> {
        let mut conn = self.conn.clone();
        // SETEX rejects a zero expiry.
        let secs = ttl.as_secs().max(1);
        conn.set_ex(key, value, secs)
            .await
            .map_err(|e| InfraError::Cache(format!("redis SETEX failed: {e}")))
    }

    #[instrument(skip(self), err)]
    async fn del(&self, key: &str) -> Result<bool, InfraError> {
        let mut conn = self.conn.clone();
        let deleted: i64 = conn
            .del(key)
            .await
            .map_err(|e| InfraError::Cache(format!("redis DEL failed: {e}")))?;
        Ok(deleted > 0)
    }

    #[instrument(skip(self), err)]
    async fn exists(&self, key: &str) -> Result<bool, InfraError> {
        let mut conn = self.conn.clone();
        conn.exists(key)
            .await
            .map_err(|e| InfraError::Cache(format!("redis EXISTS failed: {e}")))
    }
}
