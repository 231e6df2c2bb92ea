use std::sync::Arc;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use utils::telemetry::IntegrationMetrics;
use vertex_types::{Integration, IntegrationId};

use super::connector::Connector;
use super::error::IntegrationError;

struct CachedInstance {
    connector: Arc<dyn Connector>,
    fingerprint: String,
    last_used: Mutex<Instant>,
}

/// Cache of live connector instances keyed by integration id. An entry
/// is only reused while its fingerprint matches the integration's
/// current config + credential; construction happens at most once per
/// fingerprint because it runs under the map's entry lock.
pub struct ConnectorInstances {
    instances: DashMap<IntegrationId, Arc<CachedInstance>>,
    max_instances: usize,
    idle_ttl: Duration,
    metrics: IntegrationMetrics,
}

impl ConnectorInstances {
    pub fn new(max_instances: usize, idle_ttl: Duration, metrics: IntegrationMetrics) -> Self {
        Self {
            instances: DashMap::new(),
            max_instances: max_instances.max(1),
            idle_ttl,
            metrics,
        }
    }

    pub fn get_or_build<F>(
        &self,
        integration: &Integration,
        build: F,
    ) -> Result<Arc<dyn Connector>, IntegrationError>
    where
        F: FnOnce() -> Result<Arc<dyn Connector>, IntegrationError>,
    {
        let fingerprint = integration.fingerprint();

        match self.instances.entry(integration.id) {
            Entry::Occupied(mut entry) => {
                if entry.get().fingerprint == fingerprint {
                    let cached = entry.get().clone();
                    *cached.last_used.lock().unwrap() = Instant::now();
                    return Ok(cached.connector.clone());
                }

                // stale config or rotated credential: rebuild in place
                tracing::debug!(
                    "Connector instance for {} is stale, rebuilding",
                    integration.id
                );
                self.metrics.instances_evicted.add(1, &[]);
                let connector = build()?;
                self.metrics.instances_built.add(1, &[]);
                entry.insert(Arc::new(CachedInstance {
                    connector: connector.clone(),
                    fingerprint,
                    last_used: Mutex::new(Instant::now()),
                }));
                Ok(connector)
            }
            Entry::Vacant(entry) => {
                let connector = build()?;
                self.metrics.instances_built.add(1, &[]);
                entry.insert(Arc::new(CachedInstance {
                    connector: connector.clone(),
                    fingerprint,
                    last_used: Mutex::new(Instant::now()),
                }));
                Ok(connector)
            }
        }
    }

    pub fn evict(&self, id: &IntegrationId) {
        if self.instances.remove(id).is_some() {
            self.metrics.instances_evicted.add(1, &[]);
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Drops idle entries, then trims the least-recently-used entries if
    /// the cache is still over its bound. Called from a periodic task.
    pub fn sweep(&self) {
        let now = Instant::now();
        let mut evicted = 0u64;

        self.instances.retain(|_, cached| {
            let keep = now.duration_since(*cached.last_used.lock().unwrap()) < self.idle_ttl;
            if !keep {
                evicted += 1;
            }
            keep
        });

        if self.instances.len() > self.max_instances {
            let mut by_age: Vec<(IntegrationId, Instant)> = self
                .instances
                .iter()
                .map(|e| (*e.key(), *e.value().last_used.lock().unwrap()))
                .collect();
            by_age.sort_by_key(|(_, last_used)| *last_used);

            let excess = self.instances.len() - self.max_instances;
            for (id, _) in by_age.into_iter().take(excess) {
                self.instances.remove(&id);
                evicted += 1;
            }
        }

        if evicted > 0 {
            self.metrics.instances_evicted.add(evicted, &[]);
            tracing::debug!("Swept {} connector instances", evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use vertex_types::{Capabilities, IntegrationKind, OwnerId, TestOutcome};

    use crate::subsystems::integrations::error::ConnectorError;

    struct NullConnector;

    #[async_trait]
    impl Connector for NullConnector {
        async fn test(&self) -> TestOutcome {
            TestOutcome {
                ok: true,
                latency_ms: 0,
                diagnostics: vec![],
            }
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::new()
        }

        async fn execute(&self, operation: &str, _params: &Value) -> Result<Value, ConnectorError> {
            Err(ConnectorError::UnsupportedOperation(operation.to_string()))
        }
    }

    fn sample_integration() -> Integration {
        let now = chrono::Utc::now();
        Integration {
            id: IntegrationId::generate(),
            owner: OwnerId::new("alice").unwrap(),
            kind: IntegrationKind::Chat,
            name: "chat".to_string(),
            config: [(
                "webhook_url".to_string(),
                serde_json::json!("http://chat.example/hook"),
            )]
            .into_iter()
            .collect(),
            credential_ref: "k1".to_string(),
            tags: vec![],
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn metrics() -> IntegrationMetrics {
        IntegrationMetrics::init(&opentelemetry::global::meter("test"))
    }

    #[test]
    fn builds_once_per_fingerprint() {
        let cache = ConnectorInstances::new(8, Duration::from_secs(60), metrics());
        let integration = sample_integration();
        let builds = AtomicUsize::new(0);

        for _ in 0..3 {
            cache
                .get_or_build(&integration, || {
                    builds.fetch_add(1, Ordering::SeqCst);
                    Ok(Arc::new(NullConnector))
                })
                .unwrap();
        }
        assert_eq!(builds.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn credential_rotation_rebuilds() {
        let cache = ConnectorInstances::new(8, Duration::from_secs(60), metrics());
        let mut integration = sample_integration();
        let builds = AtomicUsize::new(0);

        let mut build = || {
            builds.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullConnector) as Arc<dyn Connector>)
        };

        cache.get_or_build(&integration, &mut build).unwrap();
        integration.credential_ref = "k2".to_string();
        cache.get_or_build(&integration, &mut build).unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn explicit_eviction() {
        let cache = ConnectorInstances::new(8, Duration::from_secs(60), metrics());
        let integration = sample_integration();

        cache
            .get_or_build(&integration, || Ok(Arc::new(NullConnector)))
            .unwrap();
        assert_eq!(cache.len(), 1);

        cache.evict(&integration.id);
        assert!(cache.is_empty());
    }

    #[test]
    fn sweep_trims_over_capacity() {
        let cache = ConnectorInstances::new(2, Duration::from_secs(60), metrics());
        for _ in 0..4 {
            let integration = sample_integration();
            cache
                .get_or_build(&integration, || Ok(Arc::new(NullConnector)))
                .unwrap();
        }
        assert_eq!(cache.len(), 4);

        cache.sweep();
        assert_eq!(cache.len(), 2);
    }
}
