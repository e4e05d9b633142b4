//! Store selection and service wiring.

use std::sync::Arc;

use tracing::info;

use warden_auth::JwtCodec;
use warden_infra::cache::{CacheStore, InMemoryCache, RedisCache};
use warden_infra::config::{AppConfig, CacheBackend};
use warden_infra::store::{
    AccountStore, InMemoryAccountStore, InMemoryPermissionStore, InMemoryPolicyAdapter, PermissionRuleStore, PgStore,
    PolicyAdapter,
};
use warden_infra::{
    CacheSessions, InfraError, NoopSessions, PermissionCache, PolicyEngine, SessionRegistry, TokenService,
};

use crate::audit::AuditSink;
use crate::interceptor::AuthInterceptor;

/// Backing stores of the pipeline.
#[derive(Clone)]
pub struct Stores {
    pub permissions: Arc<dyn PermissionRuleStore>,
    pub policies: Arc<dyn PolicyAdapter>,
    pub accounts: Arc<dyn AccountStore>,
    pub cache: Arc<dyn CacheStore>,
}

/// In-memory stores with typed handles, for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryStores {
    pub permissions: Arc<InMemoryPermissionStore>,
    pub policies: Arc<InMemoryPolicyAdapter>,
    pub accounts: Arc<InMemoryAccountStore>,
    pub cache: Arc<InMemoryCache>,
}

impl InMemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stores(&self) -> Stores {
        Stores {
            permissions: self.permissions.clone(),
            policies: self.policies.clone(),
            accounts: self.accounts.clone(),
            cache: self.cache.clone(),
        }
    }
}

impl Stores {
    /// Postgres when `database.url` is set, otherwise in-memory; cache per
    /// `cache.backend`.
    pub async fn from_config(config: &AppConfig) -> Result<Self, InfraError> {
        let cache: Arc<dyn CacheStore> = match config.cache.backend {
            CacheBackend::Memory => Arc::new(InMemoryCache::new()),
            CacheBackend::Redis => Arc::new(RedisCache::connect(&config.cache.redis_url).await?),
        };

        match &config.database.url {
            Some(url) => {
                let pg = PgStore::connect(url).await?;
                pg.migrate().await?;
                info!(backend = ?config.cache.backend, "using postgres stores");
                let pg = Arc::new(pg);
                Ok(Self {
                    permissions: pg.clone(),
                    policies: pg.clone(),
                    accounts: pg,
                    cache,
                })
            }
            None => {
                info!(backend = ?config.cache.backend, "using in-memory stores");
                let memory = InMemoryStores::new();
                Ok(Self { cache, ..memory.stores() })
            }
        }
    }
}

/// Long-lived services shared by every call.
#[derive(Debug, Clone)]
pub struct Services {
    pub permissions: Arc<PermissionCache>,
    pub policy: Arc<PolicyEngine>,
    pub tokens: Arc<TokenService>,
    pub interceptor: Arc<AuthInterceptor>,
}

pub async fn build_services(config: &AppConfig, stores: Stores) -> Result<Services, InfraError> {
    let store_timeout = config.cache.store_timeout();

    let permissions = Arc::new(
        PermissionCache::new(stores.permissions, stores.cache.clone())
            .with_ttl(config.cache.permissions_ttl())
            .with_store_timeout(store_timeout)
            .with_single_flight(config.interceptor.single_flight),
    );

    let policy = Arc::new(PolicyEngine::with_store_timeout(stores.policies, store_timeout).await?);

    let sessions: Arc<dyn SessionRegistry> = if config.auth.track_sessions {
        Arc::new(CacheSessions::new(stores.cache))
    } else {
        Arc::new(NoopSessions)
    };

    let codec = JwtCodec::new(config.app.secret.as_bytes()).with_leeway(config.auth.leeway_secs);
    let tokens = Arc::new(
        TokenService::new(Arc::new(codec), stores.accounts)
            .with_ttls(config.auth.access_ttl(), config.auth.refresh_ttl())
            .with_sessions(sessions)
            .with_store_timeout(store_timeout),
    );

    let mut interceptor = AuthInterceptor::new(permissions.clone(), tokens.clone(), policy.clone())
        .with_order(config.interceptor.order)
        .with_lookup_failure(config.interceptor.on_lookup_failure);
    if config.interceptor.audit {
        interceptor = interceptor.with_audit(AuditSink::spawn(config.interceptor.audit_queue_capacity));
    }

    Ok(Services {
        permissions,
        policy,
        tokens,
        interceptor: Arc::new(interceptor),
    })
}
