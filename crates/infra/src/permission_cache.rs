//! Cache-aside lookup of per-procedure authorization requirements.
//!
//! The whole rule set lives under one cache key as a JSON object keyed by
//! procedure. A miss loads every active rule from the store, hands the map to
//! the caller, and writes it back to the cache on a spawned task.
//!
//! [`PermissionCache::get_all`] is fail-open: if the store cannot be read the
//! caller gets an empty map (every procedure treated as public). Callers that
//! need to tell "no rules" apart from "store down" use
//! [`PermissionCache::try_get_all`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use warden_auth::{PermissionMap, PermissionRule};

use crate::cache::{CacheStore, set_object};
use crate::error::bounded;
use crate::store::PermissionRuleStore;
use crate::InfraError;

pub const PERMISSIONS_CACHE_KEY: &str = "auth:permissions";

/// Seven days.
pub const DEFAULT_PERMISSIONS_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);

type SharedLoad = Shared<BoxFuture<'static, Result<Arc<PermissionMap>, InfraError>>>;

pub struct PermissionCache {
    store: Arc<dyn PermissionRuleStore>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    store_timeout: Duration,
    single_flight: bool,
    in_flight: Mutex<Option<SharedLoad>>,
}

impl PermissionCache {
    pub fn new(store: Arc<dyn PermissionRuleStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self {
            store,
            cache,
            ttl: DEFAULT_PERMISSIONS_TTL,
            store_timeout: DEFAULT_STORE_TIMEOUT,
            single_flight: false,
            in_flight: Mutex::new(None),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Share one in-flight store query between concurrent misses.
    pub fn with_single_flight(mut self, enabled: bool) -> Self {
        self.single_flight = enabled;
        self
    }

    /// Full rule map, empty when the store is unreachable.
    pub async fn get_all(&self) -> Arc<PermissionMap> {
        match self.try_get_all().await {
            Ok(map) => map,
            Err(err) => {
                warn!(error = %err, "permission rules unavailable; treating every procedure as public");
                Arc::new(PermissionMap::new())
            }
        }
    }

    /// Full rule map, surfacing store failures.
    #[instrument(skip(self), err)]
    pub async fn try_get_all(&self) -> Result<Arc<PermissionMap>, InfraError> {
        if let Some(map) = self.read_cached().await {
            return Ok(map);
        }

        if self.single_flight {
            self.load_single_flight().await
        } else {
            self.loader().await
        }
    }

    /// Requirement for one procedure; `None` means the procedure is public.
    pub async fn lookup(&self, procedure: &str) -> Option<PermissionRule> {
        self.get_all().await.get(procedure).cloned()
    }

    /// Drop the cached map so the next lookup reloads from the store.
    pub async fn invalidate(&self) -> Result<bool, InfraError> {
        let cache = Arc::clone(&self.cache);
        bounded("cache.del", self.store_timeout, async move {
            cache.del(PERMISSIONS_CACHE_KEY).await
        })
        .await
    }

    async fn read_cached(&self) -> Option<Arc<PermissionMap>> {
        let cache = Arc::clone(&self.cache);
        let blob = bounded("cache.get", self.store_timeout, async move {
            cache.get(PERMISSIONS_CACHE_KEY).await
        })
        .await;

        match blob {
            Ok(Some(blob)) => match serde_json::from_str::<PermissionMap>(&blob) {
                Ok(map) => Some(Arc::new(map)),
                Err(err) => {
                    warn!(error = %err, "undecodable permission cache entry; reloading");
                    None
                }
            },
            Ok(None) => None,
            Err(err) => {
                warn!(error = %err, "permission cache read failed; reloading");
                None
            }
        }
    }

    fn loader(&self) -> BoxFuture<'static, Result<Arc<PermissionMap>, InfraError>> {
        load_and_populate(
            Arc::clone(&self.store),
            Arc::clone(&self.cache),
            self.ttl,
            self.store_timeout,
        )
        .boxed()
    }

    async fn load_single_flight(&self) -> Result<Arc<PermissionMap>, InfraError> {
        let load = {
            let mut slot = self.in_flight.lock();
            match slot.as_ref() {
                Some(existing) => existing.clone(),
                None => {
                    let load = self.loader().shared();
                    *slot = Some(load.clone());
                    load
                }
            }
        };

        let result = load.clone().await;

        let mut slot = self.in_flight.lock();
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&load)) {
            *slot = None;
        }
        result
    }
}

impl std::fmt::Debug for PermissionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionCache")
            .field("ttl", &self.ttl)
            .field("store_timeout", &self.store_timeout)
            .field("single_flight", &self.single_flight)
            .finish_non_exhaustive()
    }
}

async fn load_and_populate(
    store: Arc<dyn PermissionRuleStore>,
    cache: Arc<dyn CacheStore>,
    ttl: Duration,
    store_timeout: Duration,
) -> Result<Arc<PermissionMap>, InfraError> {
    let rules = bounded("permissions.find_active", store_timeout, store.find_active()).await?;
    let map = Arc::new(build_map(rules));
    debug!(rules = map.len(), "loaded permission rules from store");

    let snapshot = Arc::clone(&map);
    tokio::spawn(async move {
        let write = set_object(cache.as_ref(), PERMISSIONS_CACHE_KEY, snapshot.as_ref(), ttl);
        if let Err(err) = bounded("cache.set", store_timeout, write).await {
            warn!(error = %err, "failed to write permission rules back to cache");
        }
    });

    Ok(map)
}

/// Key rules by procedure. Input is newest first, so the newest rule wins.
fn build_map(rules: Vec<PermissionRule>) -> PermissionMap {
    let mut map = PermissionMap::with_capacity(rules.len());
    for rule in rules.into_iter().filter(|r| !r.is_deleted()) {
        map.entry(rule.procedure.clone()).or_insert(rule);
    }
    map
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};

    use super::*;
    use crate::cache::InMemoryCache;
    use crate::store::InMemoryPermissionStore;

    /// Counts `find_active` calls and optionally stalls or fails.
    struct CountingStore {
        inner: InMemoryPermissionStore,
        calls: AtomicUsize,
        delay: Option<Duration>,
        fail: bool,
    }

    impl CountingStore {
        fn new(rules: Vec<PermissionRule>) -> Self {
            Self {
                inner: InMemoryPermissionStore::with_rules(rules),
                calls: AtomicUsize::new(0),
                delay: None,
                fail: false,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PermissionRuleStore for CountingStore {
        async fn find_active(&self) -> Result<Vec<PermissionRule>, InfraError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(InfraError::Store("connection refused".into()));
            }
            self.inner.find_active().await
        }
    }

    async fn wait_for_write_back(cache: &InMemoryCache) {
        for _ in 0..100 {
            if cache.exists(PERMISSIONS_CACHE_KEY).await.unwrap() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("permission map was never written back");
    }

    fn rules() -> Vec<PermissionRule> {
        vec![
            PermissionRule::new("pkg.Svc/Method", true, false),
            PermissionRule::new("pkg.Svc/Public", false, false),
        ]
    }

    #[tokio::test]
    async fn second_lookup_within_ttl_is_served_from_cache() {
        let store = Arc::new(CountingStore::new(rules()));
        let cache = Arc::new(InMemoryCache::new());
        let permissions = PermissionCache::new(store.clone(), cache.clone());

        let first = permissions.get_all().await;
        wait_for_write_back(&cache).await;
        let second = permissions.get_all().await;

        assert_eq!(first, second);
        assert_eq!(first.len(), 2);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn newest_rule_wins_for_duplicate_procedure() {
        let mut old = PermissionRule::new("pkg.Svc/Method", false, false);
        old.created_at = Utc::now() - ChronoDuration::hours(1);
        let new = PermissionRule::new("pkg.Svc/Method", true, true);

        let store = Arc::new(InMemoryPermissionStore::with_rules([old, new]));
        let permissions = PermissionCache::new(store, Arc::new(InMemoryCache::new()));

        let rule = permissions.lookup("pkg.Svc/Method").await.unwrap();
        assert!(rule.require_auth);
        assert!(rule.require_hash);
    }

    #[tokio::test]
    async fn store_failure_fails_open_but_is_visible_to_try_get_all() {
        let mut store = CountingStore::new(rules());
        store.fail = true;
        let permissions = PermissionCache::new(Arc::new(store), Arc::new(InMemoryCache::new()));

        assert!(permissions.get_all().await.is_empty());
        assert!(matches!(permissions.try_get_all().await, Err(InfraError::Store(_))));
        assert!(permissions.lookup("pkg.Svc/Method").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_is_cut_off_by_timeout() {
        let mut store = CountingStore::new(rules());
        store.delay = Some(Duration::from_secs(30));
        let permissions = PermissionCache::new(Arc::new(store), Arc::new(InMemoryCache::new()))
            .with_store_timeout(Duration::from_millis(500));

        let err = permissions.try_get_all().await.unwrap_err();
        assert!(matches!(err, InfraError::Timeout { operation: "permissions.find_active", .. }));
    }

    #[tokio::test]
    async fn undecodable_cache_entry_is_a_miss() {
        let store = Arc::new(CountingStore::new(rules()));
        let cache = Arc::new(InMemoryCache::new());
        cache
            .set(PERMISSIONS_CACHE_KEY, "not json".into(), Duration::from_secs(60))
            .await
            .unwrap();

        let permissions = PermissionCache::new(store.clone(), cache);
        assert_eq!(permissions.get_all().await.len(), 2);
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let store = Arc::new(CountingStore::new(rules()));
        let cache = Arc::new(InMemoryCache::new());
        let permissions = PermissionCache::new(store.clone(), cache.clone());

        permissions.get_all().await;
        wait_for_write_back(&cache).await;
        assert!(permissions.invalidate().await.unwrap());

        permissions.get_all().await;
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expiry_triggers_reload() {
        let store = Arc::new(CountingStore::new(rules()));
        let cache = Arc::new(InMemoryCache::new());
        let permissions = PermissionCache::new(store.clone(), cache.clone())
            .with_ttl(Duration::from_secs(60));

        permissions.get_all().await;
        wait_for_write_back(&cache).await;
        tokio::time::advance(Duration::from_secs(61)).await;

        permissions.get_all().await;
        assert_eq!(store.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn single_flight_shares_one_store_query() {
        let mut store = CountingStore::new(rules());
        store.delay = Some(Duration::from_millis(100));
        let store = Arc::new(store);
        let permissions = PermissionCache::new(store.clone(), Arc::new(InMemoryCache::new()))
            .with_single_flight(true);

        let maps = futures::future::join_all((0..8).map(|_| permissions.get_all())).await;

        assert!(maps.iter().all(|m| m.len() == 2));
        assert_eq!(store.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_misses_each_query_without_single_flight() {
        let mut store = CountingStore::new(rules());
        store.delay = Some(Duration::from_millis(100));
        let store = Arc::new(store);
        let permissions = PermissionCache::new(store.clone(), Arc::new(InMemoryCache::new()));

        futures::future::join_all((0..4).map(|_| permissions.get_all())).await;

        assert_eq!(store.calls(), 4);
    }
}
