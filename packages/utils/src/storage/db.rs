use std::any::Any;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::anyhow;
use dashmap::DashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Table {
    Integrations,
    Webhooks,
    WebhookDeliveries,
    NotificationTemplates,
    NotificationDeliveries,
    Subscriptions,
    Events,
    Reports,
    ReportTemplates,
    ReportExecutions,
    Test(&'static str),
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::Integrations => "integrations",
            Table::Webhooks => "webhooks",
            Table::WebhookDeliveries => "webhook-deliveries",
            Table::NotificationTemplates => "notification-templates",
            Table::NotificationDeliveries => "notification-deliveries",
            Table::Subscriptions => "subscriptions",
            Table::Events => "events",
            Table::Reports => "reports",
            Table::ReportTemplates => "report-templates",
            Table::ReportExecutions => "report-executions",
            Table::Test(name) => name,
        }
    }
}

/// Compile-time binding of a table to its key/value types. Handles are
/// declared as consts (see [`handles`]), so a table can only ever be
/// touched with one type pair.
#[derive(Copy, Clone)]
pub struct TableHandle<K, V> {
    table: Table,
    _marker: PhantomData<(K, V)>,
}

impl<K, V> TableHandle<K, V> {
    pub const fn new(table: Table) -> Self {
        Self {
            table,
            _marker: PhantomData,
        }
    }

    pub const fn table(&self) -> Table {
        self.table
    }
}

impl<K, V> fmt::Debug for TableHandle<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableHandle({})", self.table.name())
    }
}

pub mod handles {
    use super::{Table, TableHandle};
    use vertex_types::{
        DeliveryId, EventId, ExecutionId, Integration, IntegrationId, NotificationDelivery,
        NotificationId, NotificationTemplate, Report, ReportExecution, ReportId, ReportTemplate,
        ReportTemplateId, Subscription, SubscriptionId, TemplateId, Webhook, WebhookDelivery,
        WebhookId,
    };
    use vertex_types::Event;

    pub const INTEGRATIONS: TableHandle<IntegrationId, Integration> =
        TableHandle::new(Table::Integrations);
    pub const WEBHOOKS: TableHandle<WebhookId, Webhook> = TableHandle::new(Table::Webhooks);
    pub const WEBHOOK_DELIVERIES: TableHandle<DeliveryId, WebhookDelivery> =
        TableHandle::new(Table::WebhookDeliveries);
    pub const NOTIFICATION_TEMPLATES: TableHandle<TemplateId, NotificationTemplate> =
        TableHandle::new(Table::NotificationTemplates);
    pub const NOTIFICATION_DELIVERIES: TableHandle<NotificationId, NotificationDelivery> =
        TableHandle::new(Table::NotificationDeliveries);
    pub const SUBSCRIPTIONS: TableHandle<SubscriptionId, Subscription> =
        TableHandle::new(Table::Subscriptions);
    pub const EVENTS: TableHandle<EventId, Event> = TableHandle::new(Table::Events);
    pub const REPORTS: TableHandle<ReportId, Report> = TableHandle::new(Table::Reports);
    pub const REPORT_TEMPLATES: TableHandle<ReportTemplateId, ReportTemplate> =
        TableHandle::new(Table::ReportTemplates);
    pub const REPORT_EXECUTIONS: TableHandle<ExecutionId, ReportExecution> =
        TableHandle::new(Table::ReportExecutions);
}

pub type DBError = anyhow::Error;

type ErasedTable = Arc<dyn Any + Send + Sync>;

/// Process-local multi-table store. Tables materialize on first touch
/// and are typed through their [`TableHandle`]; every operation is
/// per-entry atomic (DashMap shards underneath).
#[derive(Clone, Default)]
pub struct HubDb {
    tables: Arc<DashMap<Table, ErasedTable>>,
}

impl HubDb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves (creating if needed) the typed map behind a handle.
    fn open<K, V>(&self, handle: &TableHandle<K, V>) -> Result<Arc<DashMap<K, V>>, DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        let erased = self
            .tables
            .entry(handle.table())
            .or_insert_with(|| {
                let fresh: ErasedTable = Arc::new(DashMap::<K, V>::new());
                fresh
            })
            .clone();

        erased.downcast::<DashMap<K, V>>().map_err(|_| {
            anyhow!(
                "table {} was opened with a different type pair",
                handle.table().name()
            )
        })
    }

    pub fn set<K, V>(&self, handle: &TableHandle<K, V>, key: K, value: V) -> Result<(), DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.open(handle)?.insert(key, value);
        Ok(())
    }

    pub fn get<K, V>(&self, handle: &TableHandle<K, V>, key: &K) -> Result<Option<V>, DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Ok(self.open(handle)?.get(key).map(|entry| entry.value().clone()))
    }

    pub fn remove<K, V>(&self, handle: &TableHandle<K, V>, key: &K) -> Result<Option<V>, DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Ok(self.open(handle)?.remove(key).map(|(_, value)| value))
    }

    pub fn contains_key<K, V>(&self, handle: &TableHandle<K, V>, key: &K) -> Result<bool, DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Ok(self.open(handle)?.contains_key(key))
    }

    pub fn count<K, V>(&self, handle: &TableHandle<K, V>) -> Result<usize, DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        Ok(self.open(handle)?.len())
    }

    /// Read-modify-write under the entry lock. State transitions (e.g.
    /// delivery attempts) go through here so concurrent workers never
    /// interleave on one record. Returns the updated value, or None when
    /// the key is absent.
    pub fn update<K, V, F>(
        &self,
        handle: &TableHandle<K, V>,
        key: &K,
        f: F,
    ) -> Result<Option<V>, DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: FnOnce(&mut V),
    {
        let map = self.open(handle)?;
        let Some(mut entry) = map.get_mut(key) else {
            return Ok(None);
        };
        f(entry.value_mut());
        Ok(Some(entry.value().clone()))
    }

    pub fn clear_table<K, V>(&self, handle: &TableHandle<K, V>) -> Result<(), DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
    {
        self.open(handle)?.clear();
        Ok(())
    }

    /// Filter-map over a whole table. The closure runs per entry while
    /// that entry's shard is read-locked, so it must stay cheap; results
    /// come back as owned values in no particular order.
    pub fn scan<K, V, T, F>(&self, handle: &TableHandle<K, V>, mut f: F) -> Result<Vec<T>, DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: FnMut(&K, &V) -> Option<T>,
    {
        let map = self.open(handle)?;
        Ok(map
            .iter()
            .filter_map(|entry| f(entry.key(), entry.value()))
            .collect())
    }

    /// First value matching the predicate, if any. Short-circuits the
    /// table walk.
    pub fn find<K, V, F>(
        &self,
        handle: &TableHandle<K, V>,
        mut predicate: F,
    ) -> Result<Option<V>, DBError>
    where
        K: Eq + Hash + Clone + Send + Sync + 'static,
        V: Clone + Send + Sync + 'static,
        F: FnMut(&K, &V) -> bool,
    {
        let map = self.open(handle)?;
        let found = map.iter().find_map(|entry| {
            predicate(entry.key(), entry.value()).then(|| entry.value().clone())
        });
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tables_materialize_lazily() {
        let db = HubDb::new();
        let handle: TableHandle<String, u64> = TableHandle::new(Table::Test("lazy"));

        assert_eq!(db.count(&handle).unwrap(), 0);
        db.set(&handle, "k".to_string(), 1).unwrap();
        assert_eq!(db.count(&handle).unwrap(), 1);
        assert_eq!(db.get(&handle, &"k".to_string()).unwrap(), Some(1));
    }

    #[test]
    fn remove_returns_the_old_value() {
        let db = HubDb::new();
        let handle: TableHandle<u32, &'static str> = TableHandle::new(Table::Test("remove"));

        db.set(&handle, 1, "one").unwrap();
        assert!(db.contains_key(&handle, &1).unwrap());

        assert_eq!(db.remove(&handle, &1).unwrap(), Some("one"));
        assert_eq!(db.remove(&handle, &1).unwrap(), None);
        assert!(!db.contains_key(&handle, &1).unwrap());
    }

    #[test]
    fn update_runs_under_the_entry_lock() {
        let db = HubDb::new();
        let handle: TableHandle<String, i64> = TableHandle::new(Table::Test("update"));

        // absent key: closure never runs
        assert!(db
            .update(&handle, &"a".to_string(), |_| panic!("should not run"))
            .unwrap()
            .is_none());

        db.set(&handle, "a".to_string(), 1).unwrap();
        let updated = db.update(&handle, &"a".to_string(), |v| *v += 41).unwrap();
        assert_eq!(updated, Some(42));
        assert_eq!(db.get(&handle, &"a".to_string()).unwrap(), Some(42));
    }

    #[test]
    fn scan_filter_maps_and_find_short_circuits() {
        let db = HubDb::new();
        let handle: TableHandle<u32, u32> = TableHandle::new(Table::Test("scan"));
        for i in 0..10 {
            db.set(&handle, i, i * 10).unwrap();
        }

        let mut evens = db
            .scan(&handle, |key, value| (key % 2 == 0).then_some(*value))
            .unwrap();
        evens.sort();
        assert_eq!(evens, vec![0, 20, 40, 60, 80]);

        let found = db.find(&handle, |_, value| *value > 70).unwrap();
        assert!(matches!(found, Some(v) if v > 70));
        assert_eq!(db.find(&handle, |_, value| *value > 1_000).unwrap(), None);
    }

    #[test]
    fn reopening_with_another_type_pair_errors() {
        let db = HubDb::new();
        let as_u64: TableHandle<String, u64> = TableHandle::new(Table::Test("clash"));
        let as_str: TableHandle<String, String> = TableHandle::new(Table::Test("clash"));

        db.set(&as_u64, "k".to_string(), 7).unwrap();
        let err = db.get(&as_str, &"k".to_string()).unwrap_err();
        assert!(err.to_string().contains("different type pair"));
    }

    #[test]
    fn clear_table_only_touches_its_table() {
        let db = HubDb::new();
        let first: TableHandle<u32, u32> = TableHandle::new(Table::Test("clear-a"));
        let second: TableHandle<u32, u32> = TableHandle::new(Table::Test("clear-b"));

        db.set(&first, 1, 1).unwrap();
        db.set(&second, 2, 2).unwrap();

        db.clear_table(&first).unwrap();
        assert_eq!(db.count(&first).unwrap(), 0);
        assert_eq!(db.count(&second).unwrap(), 1);
    }
}
