//! Subscriber trait for table change fan-out
//!
//! A table watcher delivers every decoded change event to all of its
//! subscribers and waits for all of them before reading the next
//! notification. Any number of subscribers, including several instances of
//! the same type, can attach to one watcher.

use async_trait::async_trait;
use std::fmt;

use crate::{ChangeEvent, Result};

/// Opaque identity issued to a subscriber when it registers
///
/// Identities are assigned in increasing order, which is also the order in
/// which a watcher's subscribers are listed for delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscriber-{}", self.0)
    }
}

/// Consumer of change events for rows of type `R`
///
/// # Example
/// ```
/// # use async_trait::async_trait;
/// # use tablewatch_core::{ChangeEvent, ConfigRow, Result, Subscriber};
/// struct Printer;
///
/// #[async_trait]
/// impl Subscriber<ConfigRow> for Printer {
///     async fn notify(&self, event: &ChangeEvent<ConfigRow>) -> Result<()> {
///         println!("{} {}", event.operation(), event.record().key);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Subscriber<R>: Send + Sync {
    /// Handle one change event
    ///
    /// Returning an error is reported by the watcher but does not stop
    /// delivery to other subscribers or of later events.
    async fn notify(&self, event: &ChangeEvent<R>) -> Result<()>;

    /// Rebuild any derived state from the source table
    ///
    /// Called after the watcher re-establishes a lost listening connection,
    /// before it consumes further notifications. Events emitted while the
    /// connection was down are never redelivered.
    async fn resync(&self) -> Result<()> {
        Ok(())
    }

    /// Name used in logs
    fn name(&self) -> &str {
        "subscriber"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ConfigRow, Operation};
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Subscriber<ConfigRow> for Recorder {
        async fn notify(&self, event: &ChangeEvent<ConfigRow>) -> Result<()> {
            self.seen.lock().unwrap().push(event.record().key.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_default_methods() {
        let recorder = Recorder {
            seen: Mutex::new(Vec::new()),
        };
        let event = ChangeEvent::new(Operation::Insert, ConfigRow::new("ns", "k", "v"));

        recorder.notify(&event).await.unwrap();
        recorder.resync().await.unwrap();

        assert_eq!(recorder.name(), "subscriber");
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["k".to_string()]);
    }

    #[test]
    fn test_subscriber_id_ordering() {
        let first = SubscriberId::new(1);
        let second = SubscriberId::new(2);
        assert!(first < second);
        assert_eq!(first.to_string(), "subscriber-1");
        assert_eq!(second.as_u64(), 2);
    }
}
