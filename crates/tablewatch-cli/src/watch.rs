use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use tablewatch_config_cache::ConfigCache;
use tablewatch_core::{ChangeEvent, ConfigRow, Result, Subscriber};

/// Logs every change seen on the table, across all namespaces
struct ChangeLogger;

#[async_trait]
impl Subscriber<ConfigRow> for ChangeLogger {
    async fn notify(&self, event: &ChangeEvent<ConfigRow>) -> Result<()> {
        let row = event.record();
        if event.is_delete() {
            info!("{} {}/{}", event.operation(), row.namespace, row.key);
        } else {
            info!(
                "{} {}/{} = {}",
                event.operation(),
                row.namespace,
                row.key,
                row.value
            );
        }
        Ok(())
    }

    async fn resync(&self) -> Result<()> {
        warn!("Listener reconnected, changes made while disconnected were not logged");
        Ok(())
    }

    fn name(&self) -> &str {
        "change-logger"
    }
}

/// Keep the cache live and log changes until a shutdown signal or a fatal listener error
pub async fn run(cache: &ConfigCache) -> anyhow::Result<()> {
    let _subscription = cache.watcher().subscribe(Arc::new(ChangeLogger));
    cache.initialize().await?;

    info!(
        "Watching {} ({} keys in namespace {}), press Ctrl+C to stop",
        cache.table(),
        cache.list().len(),
        cache.namespace()
    );

    tokio::select! {
        _ = shutdown_signal() => {}
        result = cache.watcher().closed() => {
            result?;
        }
    }

    cache.shutdown().await?;
    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
