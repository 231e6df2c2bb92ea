use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use lru::LruCache;
use serde::{de::DeserializeOwned, Serialize};

use crate::telemetry::CacheMetrics;

/// Logical data classes; the policy table binds each one to a tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheClass {
    Queries,
    Reports,
    Dashboards,
    Metrics,
}

impl CacheClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheClass::Queries => "queries",
            CacheClass::Reports => "reports",
            CacheClass::Dashboards => "dashboards",
            CacheClass::Metrics => "metrics",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheTier {
    Local,
    Remote,
}

/// Which tier serves which class. Classes bound to `Remote` fall back to
/// the local tier when no remote store is attached.
#[derive(Clone, Debug)]
pub struct CachePolicy {
    assignments: HashMap<CacheClass, CacheTier>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            assignments: [
                (CacheClass::Queries, CacheTier::Local),
                (CacheClass::Metrics, CacheTier::Local),
                (CacheClass::Reports, CacheTier::Remote),
                (CacheClass::Dashboards, CacheTier::Remote),
            ]
            .into_iter()
            .collect(),
        }
    }
}

impl CachePolicy {
    pub fn tier_for(&self, class: CacheClass) -> CacheTier {
        self.assignments
            .get(&class)
            .copied()
            .unwrap_or(CacheTier::Local)
    }

    pub fn assign(mut self, class: CacheClass, tier: CacheTier) -> Self {
        self.assignments.insert(class, tier);
        self
    }
}

/// The optional distributed tier. Implementations own their own
/// connection handling; errors are absorbed by the cache as misses.
#[async_trait]
pub trait RemoteCache: Send + Sync {
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()>;
    async fn invalidate(&self, key: &str) -> anyhow::Result<()>;
}

struct LocalEntry {
    bytes: Vec<u8>,
    // write-time expiry: stamped on put, checked on get
    expires_at: Instant,
}

/// Two-tier cache: a bounded in-process LRU plus an optional remote
/// key/value store. Values cross the boundary as bytes. Concurrent
/// builders for the same key share one construction via
/// [`HubCache::get_or_build`].
pub struct HubCache {
    local: Mutex<LruCache<String, LocalEntry>>,
    remote: Option<Arc<dyn RemoteCache>>,
    policy: CachePolicy,
    default_ttl: Duration,
    building: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    metrics: CacheMetrics,
}

impl HubCache {
    pub fn new(capacity: usize, default_ttl: Duration, metrics: CacheMetrics) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
        Self {
            local: Mutex::new(LruCache::new(capacity)),
            remote: None,
            policy: CachePolicy::default(),
            default_ttl,
            building: DashMap::new(),
            metrics,
        }
    }

    pub fn with_remote(mut self, remote: Arc<dyn RemoteCache>) -> Self {
        self.remote = Some(remote);
        self
    }

    pub fn with_policy(mut self, policy: CachePolicy) -> Self {
        self.policy = policy;
        self
    }

    fn scoped_key(class: CacheClass, key: &str) -> String {
        format!("{}:{}", class.as_str(), key)
    }

    fn local_get(&self, scoped: &str) -> Option<Vec<u8>> {
        let mut local = self.local.lock().unwrap();
        match local.get(scoped) {
            Some(entry) if entry.expires_at > Instant::now() => Some(entry.bytes.clone()),
            Some(_) => {
                // expired on read; drop it so the slot frees up
                local.pop(scoped);
                None
            }
            None => None,
        }
    }

    fn local_put(&self, scoped: String, bytes: Vec<u8>, ttl: Duration) {
        let entry = LocalEntry {
            bytes,
            expires_at: Instant::now() + ttl,
        };
        let mut local = self.local.lock().unwrap();
        if let Some((evicted_key, _)) = local.push(scoped.clone(), entry) {
            if evicted_key != scoped {
                self.metrics.evictions.add(1, &[]);
            }
        }
    }

    pub async fn get(&self, class: CacheClass, key: &str) -> Option<Vec<u8>> {
        let scoped = Self::scoped_key(class, key);

        if let Some(bytes) = self.local_get(&scoped) {
            self.metrics.hits.add(1, &[]);
            return Some(bytes);
        }

        if self.policy.tier_for(class) == CacheTier::Remote {
            if let Some(remote) = &self.remote {
                match remote.get(&scoped).await {
                    Ok(Some(bytes)) => {
                        // refill the local tier so repeat reads stay cheap
                        self.local_put(scoped, bytes.clone(), self.default_ttl);
                        self.metrics.hits.add(1, &[]);
                        return Some(bytes);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        tracing::warn!("Remote cache read failed for {}: {:?}", scoped, err);
                    }
                }
            }
        }

        self.metrics.misses.add(1, &[]);
        None
    }

    pub async fn put(&self, class: CacheClass, key: &str, bytes: Vec<u8>, ttl: Option<Duration>) {
        let scoped = Self::scoped_key(class, key);
        let ttl = ttl.unwrap_or(self.default_ttl);

        self.local_put(scoped.clone(), bytes.clone(), ttl);

        if self.policy.tier_for(class) == CacheTier::Remote {
            if let Some(remote) = &self.remote {
                if let Err(err) = remote.put(&scoped, bytes, ttl).await {
                    tracing::warn!("Remote cache write failed for {}: {:?}", scoped, err);
                }
            }
        }
    }

    pub async fn invalidate(&self, class: CacheClass, key: &str) {
        let scoped = Self::scoped_key(class, key);
        self.local.lock().unwrap().pop(&scoped);

        if let Some(remote) = &self.remote {
            if let Err(err) = remote.invalidate(&scoped).await {
                tracing::warn!("Remote cache invalidate failed for {}: {:?}", scoped, err);
            }
        }
    }

    /// Typed read. A malformed entry (failed deserialize) counts as a
    /// miss and is dropped from the local tier.
    pub async fn get_json<T: DeserializeOwned>(&self, class: CacheClass, key: &str) -> Option<T> {
        let bytes = self.get(class, key).await?;
        match serde_json::from_slice(&bytes) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!("Malformed cache entry for {} ({}), treating as miss", key, err);
                self.invalidate(class, key).await;
                self.metrics.misses.add(1, &[]);
                None
            }
        }
    }

    pub async fn put_json<T: Serialize>(
        &self,
        class: CacheClass,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) {
        match serde_json::to_vec(value) {
            Ok(bytes) => self.put(class, key, bytes, ttl).await,
            Err(err) => {
                tracing::warn!("Failed to serialize cache entry for {}: {:?}", key, err);
            }
        }
    }

    /// Single-flight read-through: on a miss, at most one caller runs the
    /// builder per key; everyone else waits on the same gate and then
    /// reads the freshly cached value.
    pub async fn get_or_build<T, F, Fut>(
        &self,
        class: CacheClass,
        key: &str,
        ttl: Option<Duration>,
        build: F,
    ) -> anyhow::Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        if let Some(value) = self.get_json(class, key).await {
            return Ok(value);
        }

        let scoped = Self::scoped_key(class, key);
        let gate = self
            .building
            .entry(scoped.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        let _guard = gate.lock().await;

        // another caller may have built while we waited on the gate
        if let Some(value) = self.get_json(class, key).await {
            return Ok(value);
        }

        let result = build().await;
        self.building.remove(&scoped);

        let value = result?;
        self.put_json(class, key, &value, ttl).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_cache(capacity: usize) -> HubCache {
        let meter = opentelemetry::global::meter("test");
        HubCache::new(
            capacity,
            Duration::from_secs(60),
            CacheMetrics::init(&meter),
        )
    }

    #[tokio::test]
    async fn put_get_round_trip() {
        let cache = test_cache(8);
        cache
            .put(CacheClass::Queries, "k1", b"hello".to_vec(), None)
            .await;
        assert_eq!(
            cache.get(CacheClass::Queries, "k1").await,
            Some(b"hello".to_vec())
        );
        assert_eq!(cache.get(CacheClass::Queries, "missing").await, None);
    }

    #[tokio::test]
    async fn classes_do_not_collide() {
        let cache = test_cache(8);
        cache
            .put(CacheClass::Queries, "k", b"queries".to_vec(), None)
            .await;
        assert_eq!(cache.get(CacheClass::Metrics, "k").await, None);
    }

    #[tokio::test]
    async fn write_time_expiry() {
        let cache = test_cache(8);
        cache
            .put(
                CacheClass::Queries,
                "short",
                b"v".to_vec(),
                Some(Duration::from_millis(10)),
            )
            .await;
        assert!(cache.get(CacheClass::Queries, "short").await.is_some());

        tokio::time::sleep(Duration::from_millis(25)).await;
        assert_eq!(cache.get(CacheClass::Queries, "short").await, None);
    }

    #[tokio::test]
    async fn lru_bound_evicts_oldest() {
        let cache = test_cache(2);
        cache.put(CacheClass::Queries, "a", b"1".to_vec(), None).await;
        cache.put(CacheClass::Queries, "b", b"2".to_vec(), None).await;
        cache.put(CacheClass::Queries, "c", b"3".to_vec(), None).await;

        assert_eq!(cache.get(CacheClass::Queries, "a").await, None);
        assert!(cache.get(CacheClass::Queries, "c").await.is_some());
    }

    #[tokio::test]
    async fn malformed_entry_is_a_miss() {
        let cache = test_cache(8);
        cache
            .put(CacheClass::Queries, "bad", b"not json".to_vec(), None)
            .await;

        let parsed: Option<Vec<u64>> = cache.get_json(CacheClass::Queries, "bad").await;
        assert!(parsed.is_none());

        // and the bad entry was dropped
        assert_eq!(cache.get(CacheClass::Queries, "bad").await, None);
    }

    #[tokio::test]
    async fn single_flight_builds_once() {
        let cache = Arc::new(test_cache(8));
        let builds = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            let builds = builds.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_build(CacheClass::Queries, "expensive", None, || async move {
                        builds.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        Ok(42u64)
                    })
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn build_errors_are_not_cached() {
        let cache = test_cache(8);

        let err = cache
            .get_or_build::<u64, _, _>(CacheClass::Queries, "boom", None, || async {
                Err(anyhow::anyhow!("downstream down"))
            })
            .await;
        assert!(err.is_err());

        // next build succeeds and is cached
        let ok = cache
            .get_or_build(CacheClass::Queries, "boom", None, || async { Ok(7u64) })
            .await
            .unwrap();
        assert_eq!(ok, 7);
        let cached: Option<u64> = cache.get_json(CacheClass::Queries, "boom").await;
        assert_eq!(cached, Some(7));
    }
}
