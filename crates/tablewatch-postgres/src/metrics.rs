//! Metrics for a table watcher
//!
//! Provides Prometheus metrics for monitoring change delivery:
//! - Notifications received and ignored (foreign channel)
//! - Events dispatched per operation, and dispatch latency
//! - Malformed payloads and subscriber failures
//! - Listening connection reconnects

use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector for one table watcher
#[derive(Clone)]
pub struct WatcherMetrics {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Notifications received on the watched channel
    pub notifications_received_total: IntCounter,
    /// Notifications for other channels
    pub notifications_ignored_total: IntCounter,
    /// Payloads that failed to parse or decode
    pub payloads_malformed_total: IntCounter,
    /// Events delivered to subscribers
    pub events_dispatched_total: IntCounterVec,
    /// Subscriber `notify`/`resync` failures
    pub subscriber_errors_total: IntCounterVec,
    /// Successful reconnects of the listening connection
    pub reconnects_total: IntCounter,
    /// Time from decoded event to all subscribers finished
    pub dispatch_duration_seconds: Histogram,
}

impl WatcherMetrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let notifications_received_total = IntCounter::with_opts(Opts::new(
            "table_watcher_notifications_received_total",
            "Total number of notifications received on the watched channel",
        ))?;

        let notifications_ignored_total = IntCounter::with_opts(Opts::new(
            "table_watcher_notifications_ignored_total",
            "Total number of notifications received for other channels",
        ))?;

        let payloads_malformed_total = IntCounter::with_opts(Opts::new(
            "table_watcher_payloads_malformed_total",
            "Total number of notification payloads that could not be decoded",
        ))?;

        let events_dispatched_total = IntCounterVec::new(
            Opts::new(
                "table_watcher_events_dispatched_total",
                "Total number of change events delivered to subscribers",
            ),
            &["operation"],
        )?;

        let subscriber_errors_total = IntCounterVec::new(
            Opts::new(
                "table_watcher_subscriber_errors_total",
                "Total number of subscriber failures",
            ),
            &["subscriber", "phase"],
        )?;

        let reconnects_total = IntCounter::with_opts(Opts::new(
            "table_watcher_reconnects_total",
            "Total number of listening connection reconnects",
        ))?;

        let dispatch_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "table_watcher_dispatch_duration_seconds",
                "Time for all subscribers to handle one event in seconds",
            )
            .buckets(vec![
                0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
            ]),
        )?;

        // Register all metrics
        registry.register(Box::new(notifications_received_total.clone()))?;
        registry.register(Box::new(notifications_ignored_total.clone()))?;
        registry.register(Box::new(payloads_malformed_total.clone()))?;
        registry.register(Box::new(events_dispatched_total.clone()))?;
        registry.register(Box::new(subscriber_errors_total.clone()))?;
        registry.register(Box::new(reconnects_total.clone()))?;
        registry.register(Box::new(dispatch_duration_seconds.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            notifications_received_total,
            notifications_ignored_total,
            payloads_malformed_total,
            events_dispatched_total,
            subscriber_errors_total,
            reconnects_total,
            dispatch_duration_seconds,
        })
    }

    /// Get the Prometheus registry for exporting metrics
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_received(&self) {
        self.notifications_received_total.inc();
    }

    pub fn record_ignored(&self) {
        self.notifications_ignored_total.inc();
    }

    pub fn record_malformed(&self) {
        self.payloads_malformed_total.inc();
    }

    pub fn record_dispatched(&self, operation: &str, duration_secs: f64) {
        self.events_dispatched_total
            .with_label_values(&[operation])
            .inc();
        self.dispatch_duration_seconds.observe(duration_secs);
    }

    pub fn record_subscriber_error(&self, subscriber: &str, phase: &str) {
        self.subscriber_errors_total
            .with_label_values(&[subscriber, phase])
            .inc();
    }

    pub fn record_reconnect(&self) {
        self.reconnects_total.inc();
    }
}
