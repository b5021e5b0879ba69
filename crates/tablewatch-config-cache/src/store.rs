//! In-memory mirror of one namespace, and the subscriber that keeps it current

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use tracing::{debug, info};

use tablewatch_core::{ChangeEvent, ConfigRow, Error, Operation, Result, Subscriber};

use crate::schema;

/// Lifecycle of a config cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Constructed, no connection activity yet
    Created,
    /// Subscribed and loading the namespace
    Loading,
    /// Loaded; kept current by notifications while the watcher listens
    Ready,
}

impl CacheState {
    fn as_u8(self) -> u8 {
        match self {
            CacheState::Created => 0,
            CacheState::Loading => 1,
            CacheState::Ready => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => CacheState::Loading,
            2 => CacheState::Ready,
            _ => CacheState::Created,
        }
    }
}

/// Local key/value copy for one namespace
///
/// Writers are the bootstrap load, notifications and resync; notifications
/// arriving while the bootstrap load is running are queued and replayed on
/// top of the loaded rows.
pub(crate) struct CacheStore {
    pool: PgPool,
    table: String,
    namespace: String,
    entries: RwLock<HashMap<String, String>>,
    state: AtomicU8,
    pending: Mutex<Vec<ChangeEvent<ConfigRow>>>,
}

impl CacheStore {
    pub(crate) fn new(pool: PgPool, table: String, namespace: String) -> Self {
        Self {
            pool,
            table,
            namespace,
            entries: RwLock::new(HashMap::new()),
            state: AtomicU8::new(CacheState::Created.as_u8()),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn namespace(&self) -> &str {
        &self.namespace
    }

    pub(crate) fn table(&self) -> &str {
        &self.table
    }

    pub(crate) fn state(&self) -> CacheState {
        CacheState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: CacheState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    pub(crate) fn get(&self, key: &str) -> Option<String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub(crate) fn list(&self) -> HashMap<String, String> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn pending(&self) -> MutexGuard<'_, Vec<ChangeEvent<ConfigRow>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move from `Created` to `Loading`
    ///
    /// # Errors
    /// - `Error::AlreadyInitialized` from any other state
    pub(crate) fn begin_loading(&self) -> Result<()> {
        self.state
            .compare_exchange(
                CacheState::Created.as_u8(),
                CacheState::Loading.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .map(|_| ())
            .map_err(|current| {
                Error::AlreadyInitialized(format!(
                    "Config cache for namespace '{}' is {:?}",
                    self.namespace,
                    CacheState::from_u8(current)
                ))
            })
    }

    /// Return to `Created`, dropping anything queued during loading
    pub(crate) fn reset(&self) {
        let mut pending = self.pending();
        pending.clear();
        self.set_state(CacheState::Created);
    }

    /// Read every row of the namespace
    ///
    /// # Errors
    /// - `Error::Database` if the query fails
    pub(crate) async fn load(&self) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(&schema::select_namespace_sql(&self.table))
            .bind(&self.namespace)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(format!(
                    "Failed to load namespace '{}' from {}: {}",
                    self.namespace, self.table, e
                ))
            })?;

        let mut entries = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row
                .try_get("key")
                .map_err(|e| Error::Database(format!("Failed to extract key: {}", e)))?;
            let value: String = row
                .try_get("value")
                .map_err(|e| Error::Database(format!("Failed to extract value: {}", e)))?;
            entries.insert(key, value);
        }

        Ok(entries)
    }

    /// Load the namespace and become `Ready`
    pub(crate) async fn bootstrap(&self) -> Result<usize> {
        let entries = self.load().await?;
        Ok(self.install_snapshot(entries))
    }

    /// Replace the local copy with `entries`, replay queued events, become `Ready`
    ///
    /// Returns the number of keys afterwards.
    pub(crate) fn install_snapshot(&self, entries: HashMap<String, String>) -> usize {
        let mut pending = self.pending();

        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries;

        let queued = std::mem::take(&mut *pending);
        if !queued.is_empty() {
            debug!(
                "Replaying {} events queued while loading namespace {}",
                queued.len(),
                self.namespace
            );
        }
        for event in &queued {
            self.apply(event);
        }

        self.set_state(CacheState::Ready);
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Apply one event for this namespace to the local copy
    fn apply(&self, event: &ChangeEvent<ConfigRow>) {
        let record = event.record();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        match event.operation() {
            Operation::Delete => {
                entries.remove(&record.key);
            }
            Operation::Insert | Operation::Update => {
                entries.insert(record.key.clone(), record.value.clone());
            }
        }

        debug!(
            "Applied {} for {}/{}",
            event.operation(),
            record.namespace,
            record.key
        );
    }

    /// Create the backing table if it does not exist
    ///
    /// # Errors
    /// - `Error::Ddl` if the statement fails
    pub(crate) async fn create_table(&self) -> Result<()> {
        sqlx::query(&schema::create_table_sql(&self.table))
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Ddl(format!("Failed to create table {}: {}", self.table, e)))?;
        Ok(())
    }

    /// Upsert `(namespace, key)` remotely
    pub(crate) async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(&schema::upsert_sql(&self.table))
            .bind(&self.namespace)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(format!(
                    "Failed to set {}/{}: {}",
                    self.namespace, key, e
                ))
            })?;
        Ok(())
    }

    /// Delete `(namespace, key)` remotely
    pub(crate) async fn remove(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(&schema::delete_sql(&self.table))
            .bind(&self.namespace)
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(format!(
                    "Failed to remove {}/{}: {}",
                    self.namespace, key, e
                ))
            })?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl Subscriber<ConfigRow> for CacheStore {
    async fn notify(&self, event: &ChangeEvent<ConfigRow>) -> Result<()> {
        // Table and channel are shared across namespaces
        if event.record().namespace != self.namespace {
            return Ok(());
        }

        let mut pending = self.pending();
        match self.state() {
            CacheState::Loading => pending.push(event.clone()),
            CacheState::Ready => self.apply(event),
            CacheState::Created => {
                debug!(
                    "Dropping {} for {} before initialize",
                    event.operation(),
                    self.namespace
                );
            }
        }

        Ok(())
    }

    async fn resync(&self) -> Result<()> {
        // A cache still loading picks up current rows on its own
        if self.state() != CacheState::Ready {
            return Ok(());
        }

        let entries = self.load().await?;
        let count = entries.len();
        *self.entries.write().unwrap_or_else(PoisonError::into_inner) = entries;

        info!(
            "Reloaded namespace {} from {} after reconnect ({} keys)",
            self.namespace, self.table, count
        );
        Ok(())
    }

    fn name(&self) -> &str {
        "config-cache"
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;

    pub(crate) fn lazy_pool() -> PgPool {
        sqlx::postgres::PgPoolOptions::new()
            .acquire_timeout(Duration::from_millis(200))
            .connect_lazy("postgres://nobody@127.0.0.1:1/none")
            .unwrap()
    }

    fn store(namespace: &str) -> CacheStore {
        CacheStore::new(lazy_pool(), "configs".to_string(), namespace.to_string())
    }

    fn event(operation: Operation, namespace: &str, key: &str, value: &str) -> ChangeEvent<ConfigRow> {
        ChangeEvent::new(operation, ConfigRow::new(namespace, key, value))
    }

    fn ready_store(namespace: &str) -> CacheStore {
        let store = store(namespace);
        store.begin_loading().unwrap();
        store.install_snapshot(HashMap::new());
        store
    }

    #[tokio::test]
    async fn test_new_store_is_created_and_empty() {
        let store = store("prod");
        assert_eq!(store.state(), CacheState::Created);
        assert!(store.list().is_empty());
        assert_eq!(store.get("db.host"), None);
    }

    #[tokio::test]
    async fn test_insert_update_delete() {
        let store = ready_store("prod");

        store
            .notify(&event(Operation::Insert, "prod", "db.host", "localhost"))
            .await
            .unwrap();
        assert_eq!(store.get("db.host"), Some("localhost".to_string()));

        store
            .notify(&event(Operation::Update, "prod", "db.host", "db.internal"))
            .await
            .unwrap();
        assert_eq!(store.get("db.host"), Some("db.internal".to_string()));

        store
            .notify(&event(Operation::Delete, "prod", "db.host", "db.internal"))
            .await
            .unwrap();
        assert_eq!(store.get("db.host"), None);
    }

    #[tokio::test]
    async fn test_other_namespace_is_ignored() {
        let store = ready_store("prod");

        store
            .notify(&event(Operation::Insert, "staging", "db.host", "staging-db"))
            .await
            .unwrap();

        assert_eq!(store.get("db.host"), None);
        assert!(store.list().is_empty());
    }

    #[tokio::test]
    async fn test_delete_removes_only_that_key_and_reinsert_restores() {
        let store = ready_store("prod");
        for (key, value) in [("a", "1"), ("b", "2"), ("c", "3")] {
            store
                .notify(&event(Operation::Insert, "prod", key, value))
                .await
                .unwrap();
        }

        store
            .notify(&event(Operation::Delete, "prod", "b", "2"))
            .await
            .unwrap();
        let list = store.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list.get("a"), Some(&"1".to_string()));
        assert_eq!(list.get("c"), Some(&"3".to_string()));

        store
            .notify(&event(Operation::Insert, "prod", "b", "again"))
            .await
            .unwrap();
        assert_eq!(store.get("b"), Some("again".to_string()));
    }

    #[tokio::test]
    async fn test_delete_of_unknown_key_is_harmless() {
        let store = ready_store("prod");
        store
            .notify(&event(Operation::Insert, "prod", "a", "1"))
            .await
            .unwrap();
        store
            .notify(&event(Operation::Delete, "prod", "missing", "x"))
            .await
            .unwrap();
        assert_eq!(store.list().len(), 1);
    }

    #[tokio::test]
    async fn test_events_while_loading_are_replayed_over_snapshot() {
        let store = store("prod");
        store.begin_loading().unwrap();

        store
            .notify(&event(Operation::Update, "prod", "a", "new"))
            .await
            .unwrap();
        store
            .notify(&event(Operation::Delete, "prod", "b", "old"))
            .await
            .unwrap();
        store
            .notify(&event(Operation::Insert, "other", "c", "x"))
            .await
            .unwrap();
        assert!(store.list().is_empty());

        let snapshot = HashMap::from([
            ("a".to_string(), "old".to_string()),
            ("b".to_string(), "old".to_string()),
        ]);
        let count = store.install_snapshot(snapshot);

        assert_eq!(count, 1);
        assert_eq!(store.state(), CacheState::Ready);
        assert_eq!(store.get("a"), Some("new".to_string()));
        assert_eq!(store.get("b"), None);
        assert_eq!(store.get("c"), None);
    }

    #[tokio::test]
    async fn test_events_before_initialize_are_dropped() {
        let store = store("prod");
        store
            .notify(&event(Operation::Insert, "prod", "a", "1"))
            .await
            .unwrap();

        store.begin_loading().unwrap();
        store.install_snapshot(HashMap::new());
        assert_eq!(store.get("a"), None);
    }

    #[tokio::test]
    async fn test_begin_loading_only_from_created() {
        let store = store("prod");
        store.begin_loading().unwrap();
        assert!(matches!(
            store.begin_loading(),
            Err(Error::AlreadyInitialized(_))
        ));

        store.reset();
        assert_eq!(store.state(), CacheState::Created);
        store.begin_loading().unwrap();
        store.install_snapshot(HashMap::new());
        assert!(matches!(
            store.begin_loading(),
            Err(Error::AlreadyInitialized(_))
        ));
    }

    #[tokio::test]
    async fn test_list_is_a_snapshot() {
        let store = ready_store("prod");
        store
            .notify(&event(Operation::Insert, "prod", "a", "1"))
            .await
            .unwrap();

        let before = store.list();
        store
            .notify(&event(Operation::Update, "prod", "a", "2"))
            .await
            .unwrap();

        assert_eq!(before.get("a"), Some(&"1".to_string()));
        assert_eq!(store.get("a"), Some("2".to_string()));
    }

    #[tokio::test]
    async fn test_list_converges_to_table_state() {
        let store = ready_store("prod");
        let mut table: HashMap<(String, String), String> = HashMap::new();

        // Mixed writes across two namespaces, in the order a trigger would emit them
        let writes = [
            (Operation::Insert, "prod", "a", "1"),
            (Operation::Insert, "staging", "a", "s1"),
            (Operation::Insert, "prod", "b", "2"),
            (Operation::Update, "prod", "a", "3"),
            (Operation::Delete, "prod", "b", "2"),
            (Operation::Insert, "prod", "c", "4"),
            (Operation::Update, "staging", "a", "s2"),
            (Operation::Insert, "prod", "b", "5"),
            (Operation::Delete, "prod", "c", "4"),
        ];

        for (operation, namespace, key, value) in writes {
            let row = (namespace.to_string(), key.to_string());
            match operation {
                Operation::Delete => {
                    table.remove(&row);
                }
                _ => {
                    table.insert(row, value.to_string());
                }
            }
            store
                .notify(&event(operation, namespace, key, value))
                .await
                .unwrap();
        }

        let expected: HashMap<String, String> = table
            .into_iter()
            .filter(|((namespace, _), _)| namespace == "prod")
            .map(|((_, key), value)| (key, value))
            .collect();
        assert_eq!(store.list(), expected);
    }

    #[tokio::test]
    async fn test_resync_before_ready_is_a_no_op() {
        let store = store("prod");
        store.begin_loading().unwrap();
        assert!(store.resync().await.is_ok());
        assert_eq!(store.state(), CacheState::Loading);
    }

    #[tokio::test]
    async fn test_resync_failure_keeps_entries() {
        let store = ready_store("prod");
        store
            .notify(&event(Operation::Insert, "prod", "a", "1"))
            .await
            .unwrap();

        let result = store.resync().await;
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(store.get("a"), Some("1".to_string()));
    }

    #[tokio::test]
    async fn test_set_failure_leaves_cache_unchanged() {
        let store = ready_store("prod");
        store
            .notify(&event(Operation::Insert, "prod", "a", "1"))
            .await
            .unwrap();

        let result = store.set("a", "2").await;
        assert!(matches!(result, Err(Error::Database(_))));
        assert_eq!(store.get("a"), Some("1".to_string()));
    }
}
