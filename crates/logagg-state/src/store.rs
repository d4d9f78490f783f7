//! StateStore — redb-backed persistence for tenants, components and
//! queue resources.
//!
//! All values are JSON-serialized into redb's `&[u8]` value columns. The
//! store supports both on-disk and in-memory backends (the latter for
//! testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableHandle};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Outcome of a compare-and-set on a tenant secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SecretSwap {
    /// The secret was replaced; holds the updated record.
    Swapped(Tenant),
    /// The stored secret did not equal the expected one. Nothing changed.
    Mismatch,
    NotFound,
}

/// Thread-safe tenant store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "tenant store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory tenant store opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(TENANTS).map_err(map_err!(Table))?;
        txn.open_table(COMPONENTS).map_err(map_err!(Table))?;
        txn.open_table(QUEUE_RESOURCES).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Insert a new tenant. Fails with `DuplicateKey` if the name is taken.
    pub fn insert_tenant(&self, tenant: &Tenant) -> StateResult<()> {
        self.insert_unique(TENANTS, &tenant.name, tenant)?;
        debug!(tenant = %tenant.name, "tenant stored");
        Ok(())
    }

    /// Get a tenant by name.
    pub fn get_tenant(&self, name: &str) -> StateResult<Option<Tenant>> {
        self.get(TENANTS, name)
    }

    /// List all tenants.
    pub fn list_tenants(&self) -> StateResult<Vec<Tenant>> {
        self.scan(TENANTS, "")
    }

    /// Replace a tenant's secret if the stored one equals `expected`.
    ///
    /// `expected = None` forces the replacement. The read and the write
    /// happen in one write transaction, so of two racing swaps from the same
    /// old secret exactly one observes a match.
    pub fn swap_secret(
        &self,
        name: &str,
        expected: Option<&str>,
        new_secret: &str,
    ) -> StateResult<SecretSwap> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let outcome = {
            let mut table = txn.open_table(TENANTS).map_err(map_err!(Table))?;
            let current: Option<Tenant> = match table.get(name).map_err(map_err!(Read))? {
                Some(guard) => Some(decode(guard.value())?),
                None => None,
            };
            match current {
                None => SecretSwap::NotFound,
                Some(t) if expected.is_some_and(|old| old != t.secret) => SecretSwap::Mismatch,
                Some(mut tenant) => {
                    tenant.secret = new_secret.to_string();
                    let value = serde_json::to_vec(&tenant).map_err(map_err!(Serialize))?;
                    table
                        .insert(name, value.as_slice())
                        .map_err(map_err!(Write))?;
                    SecretSwap::Swapped(tenant)
                }
            }
        };
        match outcome {
            SecretSwap::Swapped(_) => txn.commit().map_err(map_err!(Transaction))?,
            _ => txn.abort().map_err(map_err!(Transaction))?,
        }
        debug!(tenant = %name, swapped = matches!(outcome, SecretSwap::Swapped(_)), "secret swap");
        Ok(outcome)
    }

    // ── Components ─────────────────────────────────────────────────

    /// Insert or overwrite a component, stamping `updated_at`.
    ///
    /// Returns the record as stored.
    pub fn upsert_component(&self, component: &Component) -> StateResult<Component> {
        let mut component = component.clone();
        component.updated_at = epoch_secs();
        let key = component.table_key();
        let value = serde_json::to_vec(&component).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(COMPONENTS).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "component upserted");
        Ok(component)
    }

    /// Get a component by its composite key.
    pub fn get_component(&self, key: &str) -> StateResult<Option<Component>> {
        self.get(COMPONENTS, key)
    }

    /// List all components registered under a tenant.
    pub fn list_components_for_tenant(&self, tenant: &str) -> StateResult<Vec<Component>> {
        self.scan(COMPONENTS, &format!("{tenant}/"))
    }

    /// The most recently updated component of `role` within a tenant.
    pub fn find_component(
        &self,
        tenant: &str,
        role: &ComponentRole,
    ) -> StateResult<Option<Component>> {
        let prefix = format!("{tenant}/{role}/");
        let components: Vec<Component> = self.scan(COMPONENTS, &prefix)?;
        Ok(components.into_iter().max_by_key(|c| c.updated_at))
    }

    // ── Queue resources ────────────────────────────────────────────

    /// Register a queue backend. Fails with `DuplicateKey` if the
    /// `(tcp_address, http_address)` pair is already present.
    pub fn insert_queue_resource(&self, resource: &QueueResourceRef) -> StateResult<()> {
        let key = resource.table_key();
        self.insert_unique(QUEUE_RESOURCES, &key, resource)?;
        debug!(%key, "queue resource stored");
        Ok(())
    }

    /// List all registered queue backends.
    pub fn list_queue_resources(&self) -> StateResult<Vec<QueueResourceRef>> {
        self.scan(QUEUE_RESOURCES, "")
    }

    // ── Helpers ────────────────────────────────────────────────────

    fn insert_unique<T: serde::Serialize>(
        &self,
        def: JsonTable,
        key: &str,
        record: &T,
    ) -> StateResult<()> {
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let inserted = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let exists = table.get(key).map_err(map_err!(Read))?.is_some();
            if !exists {
                table.insert(key, value.as_slice()).map_err(map_err!(Write))?;
            }
            !exists
        };
        if !inserted {
            txn.abort().map_err(map_err!(Transaction))?;
            return Err(StateError::DuplicateKey(format!("{}: {key}", def.name())));
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        key: &str,
    ) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => Ok(Some(decode(guard.value())?)),
            None => Ok(None),
        }
    }

    /// Decode every record whose key starts with `prefix`.
    fn scan<T: DeserializeOwned>(
        &self,
        def: JsonTable,
        prefix: &str,
    ) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (key, value) = entry.map_err(map_err!(Read))?;
            if key.value().starts_with(prefix) {
                results.push(decode(value.value())?);
            }
        }
        Ok(results)
    }
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> StateResult<T> {
    serde_json::from_slice(bytes).map_err(map_err!(Deserialize))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_queue(n: u16) -> QueueResourceRef {
        QueueResourceRef::new(
            &format!("10.0.1.{n}:4150"),
            &format!("10.0.1.{n}:4151"),
            None,
        )
    }

    fn test_tenant(name: &str) -> Tenant {
        Tenant::new(name, "5cc299d1", test_queue(1))
    }

    fn test_component(tenant: &str, role: ComponentRole, port: &str) -> Component {
        Component::new(tenant, role, "10.0.0.1", port)
    }

    // ── Tenants ────────────────────────────────────────────────────

    #[test]
    fn tenant_insert_and_get() {
        let store = StateStore::open_in_memory().unwrap();
        let tenant = test_tenant("logs");

        store.insert_tenant(&tenant).unwrap();
        assert_eq!(store.get_tenant("logs").unwrap(), Some(tenant));
        assert!(store.get_tenant("nope").unwrap().is_none());
    }

    #[test]
    fn tenant_duplicate_insert_is_rejected_and_keeps_first() {
        let store = StateStore::open_in_memory().unwrap();
        let first = test_tenant("logs");
        store.insert_tenant(&first).unwrap();

        let mut second = test_tenant("logs");
        second.secret = "other".to_string();
        let err = store.insert_tenant(&second).unwrap_err();
        assert!(matches!(err, StateError::DuplicateKey(_)));

        assert_eq!(store.get_tenant("logs").unwrap().unwrap().secret, "5cc299d1");
        assert_eq!(store.list_tenants().unwrap().len(), 1);
    }

    #[test]
    fn swap_secret_requires_matching_old_secret() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_tenant(&test_tenant("logs")).unwrap();

        assert_eq!(
            store.swap_secret("logs", Some("wrong"), "qwerty").unwrap(),
            SecretSwap::Mismatch
        );
        assert_eq!(store.get_tenant("logs").unwrap().unwrap().secret, "5cc299d1");

        match store.swap_secret("logs", Some("5cc299d1"), "qwerty").unwrap() {
            SecretSwap::Swapped(t) => assert_eq!(t.secret, "qwerty"),
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The old secret no longer matches.
        assert_eq!(
            store.swap_secret("logs", Some("5cc299d1"), "again").unwrap(),
            SecretSwap::Mismatch
        );
    }

    #[test]
    fn swap_secret_forced_and_missing() {
        let store = StateStore::open_in_memory().unwrap();
        assert_eq!(
            store.swap_secret("ghost", None, "x").unwrap(),
            SecretSwap::NotFound
        );

        store.insert_tenant(&test_tenant("logs")).unwrap();
        assert!(matches!(
            store.swap_secret("logs", None, "forced").unwrap(),
            SecretSwap::Swapped(_)
        ));
        assert_eq!(store.get_tenant("logs").unwrap().unwrap().secret, "forced");
    }

    #[test]
    fn concurrent_swaps_from_same_secret_have_one_winner() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_tenant(&test_tenant("logs")).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store
                        .swap_secret("logs", Some("5cc299d1"), &format!("new-{i}"))
                        .unwrap()
                })
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|o| matches!(o, SecretSwap::Swapped(_)))
            .count();
        assert_eq!(winners, 1);
    }

    // ── Components ─────────────────────────────────────────────────

    #[test]
    fn component_upsert_overwrites_same_key() {
        let store = StateStore::open_in_memory().unwrap();
        let mut attrs = Attrs::new();
        attrs.insert("version".into(), "1".into());
        let c = test_component("logs", ComponentRole::Collector, "9001").with_attrs(attrs);
        store.upsert_component(&c).unwrap();

        let mut attrs = Attrs::new();
        attrs.insert("version".into(), "2".into());
        let c = test_component("logs", ComponentRole::Collector, "9001").with_attrs(attrs);
        let stored = store.upsert_component(&c).unwrap();
        assert!(stored.updated_at > 0);

        let all = store.list_components_for_tenant("logs").unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].last_seen_attrs["version"], "2");
    }

    #[test]
    fn components_are_scoped_by_tenant() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .upsert_component(&test_component("logs", ComponentRole::Collector, "9001"))
            .unwrap();
        store
            .upsert_component(&test_component("logs", ComponentRole::QueueApi, "1077"))
            .unwrap();
        store
            .upsert_component(&test_component("logs2", ComponentRole::Collector, "9001"))
            .unwrap();

        assert_eq!(store.list_components_for_tenant("logs").unwrap().len(), 2);
        assert_eq!(store.list_components_for_tenant("logs2").unwrap().len(), 1);
        assert!(store.list_components_for_tenant("log").unwrap().is_empty());
    }

    #[test]
    fn find_component_by_role() {
        let store = StateStore::open_in_memory().unwrap();
        store
            .upsert_component(&test_component("logs", ComponentRole::Collector, "9001"))
            .unwrap();
        assert!(store
            .find_component("logs", &ComponentRole::QueueApi)
            .unwrap()
            .is_none());

        store
            .upsert_component(&test_component("logs", ComponentRole::QueueApi, "1077"))
            .unwrap();
        let api = store
            .find_component("logs", &ComponentRole::QueueApi)
            .unwrap()
            .unwrap();
        assert_eq!(api.address(), "10.0.0.1:1077");
    }

    // ── Queue resources ────────────────────────────────────────────

    #[test]
    fn queue_resource_pair_is_unique() {
        let store = StateStore::open_in_memory().unwrap();
        store.insert_queue_resource(&test_queue(1)).unwrap();
        store.insert_queue_resource(&test_queue(2)).unwrap();

        let err = store.insert_queue_resource(&test_queue(1)).unwrap_err();
        assert!(matches!(err, StateError::DuplicateKey(_)));
        assert_eq!(store.list_queue_resources().unwrap().len(), 2);
    }

    // ── Persistence (on-disk) ──────────────────────────────────────

    #[test]
    fn persistence_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("master.redb");

        {
            let store = StateStore::open(&db_path).unwrap();
            store.insert_tenant(&test_tenant("prod")).unwrap();
        }

        let store = StateStore::open(&db_path).unwrap();
        let tenant = store.get_tenant("prod").unwrap();
        assert_eq!(tenant.map(|t| t.name), Some("prod".to_string()));
    }

    #[test]
    fn empty_store_operations() {
        let store = StateStore::open_in_memory().unwrap();

        assert!(store.list_tenants().unwrap().is_empty());
        assert!(store.list_queue_resources().unwrap().is_empty());
        assert!(store.list_components_for_tenant("any").unwrap().is_empty());
        assert!(store.get_component("any/collector/h/1").unwrap().is_none());
    }
}
