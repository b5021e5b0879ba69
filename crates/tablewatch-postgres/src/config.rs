//! Connection pool shared by watchers and caches

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tablewatch_core::{Error, Result};
use tracing::info;

/// Sizing of the pool handed to watchers and caches
///
/// Every initialized watcher keeps one pool connection for `LISTEN`, so
/// `max_connections` must leave room for queries next to it.
///
/// ```
/// use tablewatch_postgres::PoolConfig;
///
/// let config = PoolConfig::default().with_max_connections(4);
/// assert_eq!(config.min_connections, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    /// How long a query or listener waits for a free connection
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: 10,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolConfig {
    pub fn with_max_connections(mut self, max_connections: u32) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_min_connections(mut self, min_connections: u32) -> Self {
        self.min_connections = min_connections;
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Open a connection pool
///
/// # Errors
/// - `Error::Config` if `max_connections` is 0 or below `min_connections`
/// - `Error::Connection` if the database cannot be reached
pub async fn connect(database_url: &str, config: &PoolConfig) -> Result<PgPool> {
    if config.max_connections == 0 || config.max_connections < config.min_connections {
        return Err(Error::Config(format!(
            "Invalid pool size: max_connections={} min_connections={}",
            config.max_connections, config.min_connections
        )));
    }

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect(database_url)
        .await
        .map_err(|e| Error::Connection(format!("Failed to connect to PostgreSQL: {}", e)))?;

    info!(
        "Connected to PostgreSQL (max_connections={}, min_connections={})",
        config.max_connections, config.min_connections
    );

    Ok(pool)
}
