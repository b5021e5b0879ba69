//! TableWatcher - fans PostgreSQL row change notifications out to subscribers

use futures::future::join_all;
use serde::de::DeserializeOwned;
use sqlx::PgPool;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tablewatch_core::{
    ChangeEvent, Error, RawChangeEvent, ReconnectPolicy, Result, Subscriber, WatchConfig,
};

use crate::ddl;
use crate::metrics::WatcherMetrics;
use crate::registry::{SubscriberRegistry, Subscription};

/// What happened to one received notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Sent on a channel this watcher does not own
    Ignored,
    /// Payload could not be decoded into a change event
    Malformed,
    /// Delivered to `subscribers`, of which `failures` returned an error
    Delivered { subscribers: usize, failures: usize },
}

/// State shared between the watcher handle and its listening task
pub(crate) struct WatcherShared<R> {
    pub(crate) channel: String,
    pub(crate) registry: Arc<SubscriberRegistry<R>>,
    pub(crate) metrics: WatcherMetrics,
    pub(crate) ready: AtomicBool,
}

impl<R> WatcherShared<R>
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    pub(crate) fn new(channel: String) -> Result<Self> {
        let metrics = WatcherMetrics::new()
            .map_err(|e| Error::Config(format!("Failed to create watcher metrics: {}", e)))?;

        Ok(Self {
            channel,
            registry: Arc::new(SubscriberRegistry::new()),
            metrics,
            ready: AtomicBool::new(false),
        })
    }

    /// Deliver one raw notification to every current subscriber
    ///
    /// Subscribers are notified concurrently and all of them are awaited
    /// before this returns, so the listening loop reads the next
    /// notification only after every subscriber has handled this one. All
    /// subscribers therefore observe events in the channel's delivery order,
    /// and one slow subscriber delays the next event for all of them.
    pub(crate) async fn dispatch(&self, channel: &str, payload: &str) -> DispatchOutcome {
        if channel != self.channel {
            self.metrics.record_ignored();
            debug!("Ignoring notification on channel {}", channel);
            return DispatchOutcome::Ignored;
        }

        self.metrics.record_received();

        let event: ChangeEvent<R> = match RawChangeEvent::parse(payload).and_then(|raw| raw.decode())
        {
            Ok(event) => event,
            Err(e) => {
                self.metrics.record_malformed();
                warn!("Dropping notification on channel {}: {}", self.channel, e);
                return DispatchOutcome::Malformed;
            }
        };

        let subscribers = self.registry.snapshot();
        let started = Instant::now();

        let results = join_all(subscribers.iter().map(|(id, subscriber)| {
            let event = &event;
            async move { (*id, subscriber.name(), subscriber.notify(event).await) }
        }))
        .await;

        let mut failures = 0;
        for (id, name, result) in results {
            if let Err(e) = result {
                failures += 1;
                self.metrics.record_subscriber_error(name, "notify");
                error!(
                    "Subscriber {} ({}) failed to handle {} event: {}",
                    id,
                    name,
                    event.operation(),
                    e
                );
            }
        }

        self.metrics
            .record_dispatched(event.operation().as_str(), started.elapsed().as_secs_f64());
        debug!(
            "Dispatched {} event on channel {} to {} subscribers",
            event.operation(),
            self.channel,
            subscribers.len()
        );

        DispatchOutcome::Delivered {
            subscribers: subscribers.len(),
            failures,
        }
    }

    /// Ask every subscriber to rebuild its state, waiting for all of them
    pub(crate) async fn resync_all(&self) {
        let subscribers = self.registry.snapshot();
        let results = join_all(subscribers.iter().map(|(id, subscriber)| async move {
            (*id, subscriber.name(), subscriber.resync().await)
        }))
        .await;

        for (id, name, result) in results {
            if let Err(e) = result {
                self.metrics.record_subscriber_error(name, "resync");
                error!("Subscriber {} ({}) failed to resync: {}", id, name, e);
            }
        }
    }
}

/// Watches one table and delivers its row changes to subscribers
///
/// Rows are decoded into `R` before delivery; `R` must accept the JSON
/// produced by `row_to_json` for the table.
///
/// Lifecycle:
/// 1. [`build`](Self::build) installs the trigger (idempotent)
/// 2. [`initialize`](Self::initialize) opens the listening connection
/// 3. [`subscribe`](Self::subscribe) attaches consumers, at any time
/// 4. [`shutdown`](Self::shutdown) closes the connection and releases all
///    subscribers; dropping the watcher also stops the listening task
pub struct TableWatcher<R> {
    pool: PgPool,
    config: WatchConfig,
    shared: Arc<WatcherShared<R>>,
    started: AtomicBool,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl<R> TableWatcher<R>
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    /// Create a watcher for `config.table()`
    ///
    /// No connection activity happens until `build` or `initialize`.
    ///
    /// # Errors
    /// - `Error::InvalidIdentifier` / `Error::Config` if the configuration is invalid
    pub fn new(pool: PgPool, config: WatchConfig) -> Result<Self> {
        config.validate()?;
        let shared = WatcherShared::new(config.channel())?;

        Ok(Self {
            pool,
            config,
            shared: Arc::new(shared),
            started: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            task: Mutex::new(None),
        })
    }

    pub fn table(&self) -> &str {
        self.config.table()
    }

    pub fn channel(&self) -> &str {
        &self.shared.channel
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn metrics(&self) -> &WatcherMetrics {
        &self.shared.metrics
    }

    /// True while the listening loop is connected and consuming notifications
    pub fn is_ready(&self) -> bool {
        self.shared.ready.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.registry.len()
    }

    /// Install or refresh the change publisher for the table
    ///
    /// # Errors
    /// - `Error::Ddl` if the function or trigger cannot be created
    pub async fn build(&self) -> Result<()> {
        ddl::install(&self.pool, &self.config).await
    }

    /// Attach a subscriber
    ///
    /// It receives events dispatched from now on; past events are not
    /// replayed.
    pub fn subscribe(&self, subscriber: Arc<dyn Subscriber<R>>) -> Subscription<R> {
        let id = self.shared.registry.insert(subscriber);
        Subscription::new(id, &self.shared.registry)
    }

    /// Open the listening connection and start dispatching
    ///
    /// Changes committed before this returns are not delivered. If a
    /// previous listening loop has terminated, this starts a new one and
    /// asks every subscriber to resync first.
    ///
    /// # Errors
    /// - `Error::AlreadyInitialized` if the listening loop is running
    /// - `Error::Closed` after `shutdown`
    /// - `Error::Connection` if the connection or `LISTEN` fails
    pub async fn initialize(&self) -> Result<()> {
        if self.shutdown.is_cancelled() {
            return Err(Error::Closed(format!(
                "Watcher for table '{}' has been shut down",
                self.table()
            )));
        }

        let mut task = self.task.lock().await;
        if let Some(handle) = task.as_ref()
            && !handle.is_finished()
        {
            return Err(Error::AlreadyInitialized(format!(
                "Watcher for table '{}' is already listening",
                self.table()
            )));
        }

        let listener = open_listener(&self.pool, &self.shared.channel).await?;

        if let Some(previous) = task.take() {
            if let Err(e) = flatten(previous.await) {
                debug!("Previous listening loop ended with: {}", e);
            }
        }

        if self.started.swap(true, Ordering::SeqCst) {
            info!("Restarting listener on channel {}", self.shared.channel);
            self.shared.resync_all().await;
        }

        self.shared.ready.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let pool = self.pool.clone();
        let policy = self.config.reconnect().clone();
        let shutdown = self.shutdown.clone();
        *task = Some(tokio::spawn(async move {
            listen_loop(shared, pool, policy, listener, shutdown).await
        }));

        info!(
            "Listening for changes to {} on channel {}",
            self.table(),
            self.shared.channel
        );

        Ok(())
    }

    /// Wait for the listening loop to end and return how it ended
    ///
    /// Returns immediately with `Ok(())` if no loop is running.
    pub async fn closed(&self) -> Result<()> {
        let mut task = self.task.lock().await;
        match task.as_mut() {
            Some(handle) => {
                let result = flatten(handle.await);
                *task = None;
                result
            }
            None => Ok(()),
        }
    }

    /// Stop listening, close the connection and release all subscribers
    ///
    /// An in-flight dispatch completes first. The watcher cannot be
    /// initialized again afterwards.
    ///
    /// # Errors
    /// - The listening loop's terminal error, if it had already failed
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        let result = self.closed().await;

        self.shared.ready.store(false, Ordering::SeqCst);
        let released = self.shared.registry.len();
        self.shared.registry.clear();

        info!(
            "Watcher for {} shut down, released {} subscribers",
            self.table(),
            released
        );

        result
    }
}

impl<R> Drop for TableWatcher<R> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn flatten(joined: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    joined.map_err(|e| Error::Connection(format!("Listening task failed: {}", e)))?
}

async fn open_listener(pool: &PgPool, channel: &str) -> Result<PgListener> {
    let mut listener = PgListener::connect_with(pool)
        .await
        .map_err(|e| Error::Connection(format!("Failed to create listener: {}", e)))?;

    listener.listen(channel).await.map_err(|e| {
        Error::Connection(format!("Failed to listen to channel {}: {}", channel, e))
    })?;

    Ok(listener)
}

async fn listen_loop<R>(
    shared: Arc<WatcherShared<R>>,
    pool: PgPool,
    policy: ReconnectPolicy,
    mut listener: PgListener,
    shutdown: CancellationToken,
) -> Result<()>
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    let result = loop {
        let received = tokio::select! {
            biased;
            _ = shutdown.cancelled() => break Ok(()),
            received = listener.try_recv() => received,
        };

        match received {
            Ok(Some(notification)) => {
                shared
                    .dispatch(notification.channel(), notification.payload())
                    .await;
                continue;
            }
            Ok(None) => {
                warn!("Lost listening connection on channel {}", shared.channel);
            }
            Err(e) => {
                warn!("Listener error on channel {}: {}", shared.channel, e);
            }
        }

        match reconnect(&shared, &pool, &policy, &shutdown).await {
            Ok(Some(reconnected)) => listener = reconnected,
            Ok(None) => break Ok(()),
            Err(e) => break Err(e),
        }
    };

    shared.ready.store(false, Ordering::SeqCst);
    match &result {
        Ok(()) => info!("Stopped listening on channel {}", shared.channel),
        Err(e) => error!("Listening on channel {} terminated: {}", shared.channel, e),
    }

    result
}

/// Replace a lost listener, then resync subscribers before consuming more
///
/// Returns `Ok(None)` if shutdown was requested while reconnecting.
async fn reconnect<R>(
    shared: &WatcherShared<R>,
    pool: &PgPool,
    policy: &ReconnectPolicy,
    shutdown: &CancellationToken,
) -> Result<Option<PgListener>>
where
    R: DeserializeOwned + Send + Sync + 'static,
{
    shared.ready.store(false, Ordering::SeqCst);

    for attempt in 1..=policy.max_attempts {
        tokio::select! {
            _ = shutdown.cancelled() => return Ok(None),
            _ = tokio::time::sleep(policy.delay) => {}
        }

        match open_listener(pool, &shared.channel).await {
            Ok(listener) => {
                shared.metrics.record_reconnect();
                info!(
                    "Reconnected listener on channel {} (attempt {}/{})",
                    shared.channel, attempt, policy.max_attempts
                );

                shared.resync_all().await;
                shared.ready.store(true, Ordering::SeqCst);
                return Ok(Some(listener));
            }
            Err(e) => {
                warn!(
                    "Reconnect attempt {}/{} on channel {} failed: {}",
                    attempt, policy.max_attempts, shared.channel, e
                );
            }
        }
    }

    Err(Error::Connection(format!(
        "Lost listening connection on channel '{}' and gave up after {} reconnect attempts",
        shared.channel, policy.max_attempts
    )))
}
