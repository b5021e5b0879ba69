//! Namespaced configuration cache backed by a PostgreSQL table
//!
//! A [`ConfigCache`] mirrors the rows of one namespace of a shared
//! `(namespace, key, value)` table into memory. It loads the namespace once
//! on `initialize()` and is then kept current exclusively by change
//! notifications from a [`TableWatcher`](tablewatch_postgres::TableWatcher).
//!
//! # Consistency
//! - `get`/`list` never touch the database
//! - `set`/`remove` only confirm the remote write; the local copy changes
//!   when the resulting notification comes back, so a `get` right after a
//!   `set` may still return the previous value
//! - After a lost listening connection the namespace is reloaded in full
//!
//! # Example
//! ```no_run
//! # use tablewatch_config_cache::{ConfigCache, ConfigCacheOptions};
//! # use tablewatch_postgres::{PoolConfig, connect};
//! # async fn example() -> tablewatch_core::Result<()> {
//! let pool = connect("postgres://localhost/app", &PoolConfig::default()).await?;
//! let cache = ConfigCache::new(pool, ConfigCacheOptions::default().with_namespace("prod"))?;
//! cache.build().await?;
//! cache.initialize().await?;
//!
//! cache.set("db.port", "5432").await?;
//! let host = cache.get("db.host");
//! # Ok(())
//! # }
//! ```

mod config_cache;
mod options;
mod schema;
mod store;

pub use config_cache::ConfigCache;
pub use options::{ConfigCacheOptions, DEFAULT_NAMESPACE, DEFAULT_TABLE_NAME};
pub use store::CacheState;
