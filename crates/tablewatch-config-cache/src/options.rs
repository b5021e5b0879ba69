//! Options for constructing a config cache

use tablewatch_core::{Operation, ReconnectPolicy, WatchConfig};

/// Table used when none is configured
pub const DEFAULT_TABLE_NAME: &str = "configs";

/// Namespace used when none is configured
pub const DEFAULT_NAMESPACE: &str = "default";

/// Which table, namespace and channel a [`ConfigCache`](crate::ConfigCache) mirrors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCacheOptions {
    pub table: String,
    pub namespace: String,
    /// Channel override; `<table>_notifications` when absent
    pub notification_channel: Option<String>,
    /// Row changes the trigger publishes
    pub events: Vec<Operation>,
    pub reconnect: ReconnectPolicy,
}

impl Default for ConfigCacheOptions {
    fn default() -> Self {
        Self {
            table: default_table(),
            namespace: default_namespace(),
            notification_channel: None,
            events: Operation::ALL.to_vec(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl ConfigCacheOptions {
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_notification_channel(mut self, channel: impl Into<String>) -> Self {
        self.notification_channel = Some(channel.into());
        self
    }

    pub fn with_events(mut self, events: impl IntoIterator<Item = Operation>) -> Self {
        self.events = events.into_iter().collect();
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Watch configuration for the cache's own watcher
    pub fn watch_config(&self) -> WatchConfig {
        let config = WatchConfig::new(self.table.clone())
            .with_events(self.events.iter().copied())
            .with_reconnect(self.reconnect.clone());
        match &self.notification_channel {
            Some(channel) => config.with_channel(channel.clone()),
            None => config,
        }
    }
}

fn default_table() -> String {
    DEFAULT_TABLE_NAME.to_string()
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ConfigCacheOptions::default();
        assert_eq!(options.table, "configs");
        assert_eq!(options.namespace, "default");
        assert!(options.notification_channel.is_none());

        let watch = options.watch_config();
        assert_eq!(watch.table(), "configs");
        assert_eq!(watch.channel(), "configs_notifications");
    }

    #[test]
    fn test_channel_override() {
        let options = ConfigCacheOptions::default()
            .with_table("settings")
            .with_namespace("prod")
            .with_notification_channel("settings_changes");

        let watch = options.watch_config();
        assert_eq!(watch.table(), "settings");
        assert_eq!(watch.channel(), "settings_changes");
    }

    #[test]
    fn test_events_are_passed_through() {
        let watch = ConfigCacheOptions::default().watch_config();
        assert_eq!(watch.events(), &Operation::ALL);

        let watch = ConfigCacheOptions::default()
            .with_events([Operation::Delete])
            .watch_config();
        assert_eq!(watch.events(), &[Operation::Delete]);
    }

    #[test]
    fn test_reconnect_policy_is_passed_through() {
        let options = ConfigCacheOptions::default().with_reconnect(ReconnectPolicy::disabled());
        assert_eq!(options.watch_config().reconnect().max_attempts, 0);
    }
}
