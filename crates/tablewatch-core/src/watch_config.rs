//! Configuration for a single table watcher

use std::time::Duration;

use crate::ident::validate_identifier;
use crate::{Error, Operation, Result};

/// Suffix of the trigger installed on a watched table
pub const TRIGGER_SUFFIX: &str = "_changed";

/// Suffix of the channel name derived from the table name
pub const CHANNEL_SUFFIX: &str = "_notifications";

/// How a watcher re-establishes a lost listening connection
///
/// # Example
/// ```
/// use tablewatch_core::ReconnectPolicy;
/// use std::time::Duration;
///
/// let policy = ReconnectPolicy::default()
///     .with_max_attempts(10)
///     .with_delay(Duration::from_millis(500));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Attempts before the watcher gives up (0 makes connection loss fatal)
    pub max_attempts: u32,

    /// Pause before each attempt
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay: Duration::from_secs(1),
        }
    }
}

impl ReconnectPolicy {
    /// Policy under which any connection loss ends the watcher
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

/// What a table watcher listens to
///
/// Immutable once handed to a watcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchConfig {
    table: String,
    channel: Option<String>,
    events: Vec<Operation>,
    reconnect: ReconnectPolicy,
}

impl WatchConfig {
    /// Watch `table` for all three operations on the default channel
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            channel: None,
            events: Operation::ALL.to_vec(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Publish on `channel` instead of `<table>_notifications`
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self
    }

    /// Restrict the trigger to the given operations (duplicates are dropped)
    pub fn with_events(mut self, events: impl IntoIterator<Item = Operation>) -> Self {
        let mut unique = Vec::new();
        for event in events {
            if !unique.contains(&event) {
                unique.push(event);
            }
        }
        self.events = unique;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Notification channel, derived from the table name when not set
    pub fn channel(&self) -> String {
        self.channel
            .clone()
            .unwrap_or_else(|| format!("{}{}", self.table, CHANNEL_SUFFIX))
    }

    /// Name of the trigger installed on the table
    pub fn trigger_name(&self) -> String {
        format!("{}{}", self.table, TRIGGER_SUFFIX)
    }

    pub fn events(&self) -> &[Operation] {
        &self.events
    }

    pub fn reconnect(&self) -> &ReconnectPolicy {
        &self.reconnect
    }

    /// Check names and events before any SQL is generated
    ///
    /// # Errors
    /// - `Error::InvalidIdentifier` for an unusable table, channel or trigger name
    /// - `Error::Config` if no trigger events are configured
    pub fn validate(&self) -> Result<()> {
        validate_identifier("table", &self.table)?;
        validate_identifier("channel", &self.channel())?;
        // Postgres would truncate an overlong trigger name instead of rejecting it
        validate_identifier("trigger", &self.trigger_name())?;

        if self.events.is_empty() {
            return Err(Error::Config(format!(
                "No trigger events configured for table '{}'",
                self.table
            )));
        }

        Ok(())
    }
}
