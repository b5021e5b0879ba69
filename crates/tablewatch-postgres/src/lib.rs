//! PostgreSQL change capture for tablewatch
//!
//! This crate turns row changes on a PostgreSQL table into in-process
//! events using a trigger plus `LISTEN`/`NOTIFY`:
//!
//! # Features
//! - Idempotent installation of the `notify_changes()` function and a
//!   per-table `<table>_changed` trigger
//! - One dedicated listening connection per watcher
//! - Ordered fan-out to any number of [`Subscriber`]s
//! - Reconnect with subscriber resync after a lost connection
//! - Prometheus metrics for dispatch and failures
//!
//! # Example
//! ```no_run
//! # use tablewatch_core::{ConfigRow, WatchConfig};
//! # use tablewatch_postgres::{PoolConfig, TableWatcher, connect};
//! # async fn example() -> tablewatch_core::Result<()> {
//! let pool = connect("postgres://localhost/app", &PoolConfig::default()).await?;
//! let watcher: TableWatcher<ConfigRow> = TableWatcher::new(pool, WatchConfig::new("configs"))?;
//! watcher.build().await?;
//! watcher.initialize().await?;
//! # Ok(())
//! # }
//! ```
//!
//! [`Subscriber`]: tablewatch_core::Subscriber

mod config;
pub mod ddl;
mod metrics;
mod registry;
mod table_watcher;

pub use config::{PoolConfig, connect};
pub use metrics::WatcherMetrics;
pub use registry::Subscription;
pub use table_watcher::{DispatchOutcome, TableWatcher};
