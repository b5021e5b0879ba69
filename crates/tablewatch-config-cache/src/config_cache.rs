//! Namespaced config cache kept current by a table watcher

use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use tablewatch_core::{ConfigRow, Error, Result, Subscriber};
use tablewatch_postgres::{Subscription, TableWatcher};

use crate::options::ConfigCacheOptions;
use crate::store::{CacheState, CacheStore};

/// In-memory view of one namespace of a configuration table
///
/// Reads are served from memory only. Writes go to the database and become
/// visible locally once their change notification has been processed.
pub struct ConfigCache {
    store: Arc<CacheStore>,
    watcher: Arc<TableWatcher<ConfigRow>>,
    owns_watcher: bool,
    subscription: Mutex<Option<Subscription<ConfigRow>>>,
}

impl ConfigCache {
    /// Create a cache with its own watcher on `options.table`
    ///
    /// # Errors
    /// - `Error::InvalidIdentifier` for an unusable table or channel name
    pub fn new(pool: PgPool, options: ConfigCacheOptions) -> Result<Self> {
        let watcher = TableWatcher::new(pool.clone(), options.watch_config())?;
        let store = CacheStore::new(pool, options.table, options.namespace);

        Ok(Self {
            store: Arc::new(store),
            watcher: Arc::new(watcher),
            owns_watcher: true,
            subscription: Mutex::new(None),
        })
    }

    /// Create a cache for `namespace` on a watcher shared with other consumers
    ///
    /// The watcher is started by `initialize` if it is not listening yet and
    /// is left running by `shutdown`.
    pub fn with_watcher(namespace: impl Into<String>, watcher: Arc<TableWatcher<ConfigRow>>) -> Self {
        let store = CacheStore::new(
            watcher.pool().clone(),
            watcher.table().to_string(),
            namespace.into(),
        );

        Self {
            store: Arc::new(store),
            watcher,
            owns_watcher: false,
            subscription: Mutex::new(None),
        }
    }

    pub fn namespace(&self) -> &str {
        self.store.namespace()
    }

    pub fn table(&self) -> &str {
        self.store.table()
    }

    pub fn state(&self) -> CacheState {
        self.store.state()
    }

    /// True while the namespace is loaded and its watcher is listening
    ///
    /// Turns false during a reconnect and for good once the watcher's
    /// listening loop has ended; cached reads may be stale from then on.
    pub fn is_ready(&self) -> bool {
        self.store.state() == CacheState::Ready && self.watcher.is_ready()
    }

    pub fn watcher(&self) -> &Arc<TableWatcher<ConfigRow>> {
        &self.watcher
    }

    /// Create the table if needed and install its change trigger
    ///
    /// # Errors
    /// - `Error::Ddl` if either step fails
    pub async fn build(&self) -> Result<()> {
        self.store.create_table().await?;
        self.watcher.build().await
    }

    /// Subscribe, start listening and load the namespace
    ///
    /// Changes that arrive while the namespace is loading are applied on top
    /// of the loaded rows. On failure the cache returns to `Created` and
    /// may be initialized again.
    ///
    /// # Errors
    /// - `Error::AlreadyInitialized` unless the cache is `Created`
    /// - `Error::Connection` if the watcher cannot start listening
    /// - `Error::Database` if the namespace cannot be read
    pub async fn initialize(&self) -> Result<()> {
        self.store.begin_loading()?;

        let subscriber: Arc<dyn Subscriber<ConfigRow>> = self.store.clone();
        let subscription = self.watcher.subscribe(subscriber);

        match self.start().await {
            Ok(count) => {
                *self
                    .subscription
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner) = Some(subscription);
                info!(
                    "Config cache ready for namespace {} of {} ({} keys)",
                    self.namespace(),
                    self.table(),
                    count
                );
                Ok(())
            }
            Err(e) => {
                subscription.unsubscribe();
                self.store.reset();
                warn!(
                    "Failed to initialize config cache for namespace {}: {}",
                    self.namespace(),
                    e
                );
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<usize> {
        if !self.watcher.is_ready() {
            match self.watcher.initialize().await {
                Ok(()) | Err(Error::AlreadyInitialized(_)) => {}
                Err(e) => return Err(e),
            }
        }
        self.store.bootstrap().await
    }

    /// Cached value for `key`, without touching the database
    pub fn get(&self, key: &str) -> Option<String> {
        self.store.get(key)
    }

    /// Copy of every cached key and value
    pub fn list(&self) -> HashMap<String, String> {
        self.store.list()
    }

    /// Insert or overwrite `key` in the database
    ///
    /// The local copy is updated when the change notification arrives.
    ///
    /// # Errors
    /// - `Error::Database` if the write fails
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.store.set(key, value).await
    }

    /// Delete `key` from the database
    ///
    /// Returns whether a row was deleted. The local copy is updated when the
    /// change notification arrives.
    ///
    /// # Errors
    /// - `Error::Database` if the delete fails
    pub async fn remove(&self, key: &str) -> Result<bool> {
        self.store.remove(key).await
    }

    /// Stop receiving changes
    ///
    /// Cached values stay readable but are no longer kept current. An owned
    /// watcher is shut down; a shared one keeps running.
    pub async fn shutdown(&self) -> Result<()> {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(subscription) = subscription {
            subscription.unsubscribe();
        }

        // Keeps the entries but stops reporting them as current
        self.store.reset();

        if self.owns_watcher {
            self.watcher.shutdown().await
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for ConfigCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigCache")
            .field("table", &self.table())
            .field("namespace", &self.namespace())
            .field("state", &self.state())
            .field("listening", &self.watcher.is_ready())
            .finish()
    }
}
