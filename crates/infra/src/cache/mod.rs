//! Fast key/value cache boundary.
//!
//! The permission cache and the session registry only need string blobs with
//! a TTL; richer values are JSON-encoded on the way in.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::InfraError;

pub use in_memory::InMemoryCache;
#[cfg(feature = "redis")]
pub use self::redis::RedisCache;

/// Key/value cache with per-entry TTL.
///
/// Implementations must never serve an entry past its TTL.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, InfraError>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), InfraError>;

    /// Delete `key`, returning whether a live entry was removed.
    async fn del(&self, key: &str) -> Result<bool, InfraError>;

    async fn exists(&self, key: &str) -> Result<bool, InfraError> {
        Ok(self.get(key).await?.is_some())
    }
}

#[async_trait]
impl<C> CacheStore for Arc<C>
where
    C: CacheStore + ?Sized,
{
    async fn get(&self, key: &str) -> Result<Option<String>, InfraError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), InfraError> {
        (**self).set(key, value, ttl).await
    }

    async fn del(&self, key: &str) -> Result<bool, InfraError> {
        (**self).del(key).await
    }

    async fn exists(&self, key: &str) -> Result<bool, InfraError> {
        (**self).exists(key).await
    }
}

/// JSON-encode `value` and store it under `key`.
pub async fn set_object<T>(
    cache: &dyn CacheStore,
    key: &str,
    value: &T,
    ttl: Duration,
) -> Result<(), InfraError>
where
    T: Serialize + Sync + ?Sized,
{
    let payload =
        serde_json::to_string(value).map_err(|e| InfraError::Serialization(e.to_string()))?;
    cache.set(key, payload, ttl).await
}
