//! Optional server-side record of issued refresh sessions.
//!
//! With [`NoopSessions`] credentials are purely self-contained and revocation
//! has no durable effect. [`CacheSessions`] keeps one cache entry per refresh
//! session under `auth:{sub}:session:{sid}`; refresh consumes the entry and
//! revoke deletes it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use warden_core::{AccountId, SessionId};

use crate::cache::CacheStore;
use crate::InfraError;

pub fn session_key(sub: AccountId, sid: SessionId) -> String {
    format!("auth:{sub}:session:{sid}")
}

#[async_trait]
pub trait SessionRegistry: Send + Sync {
    /// Record a freshly issued session that stays valid for `ttl`.
    async fn record(&self, sub: AccountId, sid: SessionId, ttl: Duration) -> Result<(), InfraError>;

    /// Remove a session so it cannot be refreshed again.
    ///
    /// Returns `false` when the session is unknown (already consumed, revoked,
    /// or expired).
    async fn consume(&self, sub: AccountId, sid: SessionId) -> Result<bool, InfraError>;

    /// Whether the registry enforces anything at all.
    fn is_tracking(&self) -> bool;
}

/// Tracks nothing; every session is accepted.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSessions;

#[async_trait]
impl SessionRegistry for NoopSessions {
    async fn record(&self, _: AccountId, _: SessionId, _: Duration) -> Result<(), InfraError> {
        Ok(())
    }

    async fn consume(&self, _: AccountId, _: SessionId) -> Result<bool, InfraError> {
        Ok(true)
    }

    fn is_tracking(&self) -> bool {
        false
    }
}

pub struct CacheSessions {
    cache: Arc<dyn CacheStore>,
}

impl CacheSessions {
    pub fn new(cache: Arc<dyn CacheStore>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl SessionRegistry for CacheSessions {
    async fn record(&self, sub: AccountId, sid: SessionId, ttl: Duration) -> Result<(), InfraError> {
        let key = session_key(sub, sid);
        debug!(%key, "recording session");
        self.cache.set(&key, sid.to_string(), ttl).await
    }

    async fn consume(&self, sub: AccountId, sid: SessionId) -> Result<bool, InfraError> {
        self.cache.del(&session_key(sub, sid)).await
    }

    fn is_tracking(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCache;

    #[test]
    fn session_key_layout() {
        let sub = AccountId::new();
        let sid = SessionId::new();
        assert_eq!(session_key(sub, sid), format!("auth:{sub}:session:{sid}"));
    }

    #[tokio::test]
    async fn session_can_be_consumed_once() {
        let sessions = CacheSessions::new(Arc::new(InMemoryCache::new()));
        let (sub, sid) = (AccountId::new(), SessionId::new());

        sessions.record(sub, sid, Duration::from_secs(60)).await.unwrap();
        assert!(sessions.consume(sub, sid).await.unwrap());
        assert!(!sessions.consume(sub, sid).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_session_is_unknown() {
        let sessions = CacheSessions::new(Arc::new(InMemoryCache::new()));
        let (sub, sid) = (AccountId::new(), SessionId::new());

        sessions.record(sub, sid, Duration::from_secs(10)).await.unwrap();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!sessions.consume(sub, sid).await.unwrap());
    }

    #[tokio::test]
    async fn noop_accepts_everything() {
        let sessions = NoopSessions;
        assert!(sessions.consume(AccountId::new(), SessionId::new()).await.unwrap());
        assert!(!sessions.is_tracking());
    }
}
