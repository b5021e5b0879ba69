//! Subscriber registry owned by a table watcher

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tablewatch_core::{Subscriber, SubscriberId};
use tracing::debug;

/// Subscribers of one watcher, keyed by the identity issued at registration
///
/// Uses DashMap so subscribe/unsubscribe never block an in-flight dispatch;
/// dispatch works on a [`snapshot`](Self::snapshot) taken per message.
pub(crate) struct SubscriberRegistry<R> {
    next_id: AtomicU64,
    entries: DashMap<SubscriberId, Arc<dyn Subscriber<R>>>,
}

impl<R> SubscriberRegistry<R>
where
    R: Send + Sync + 'static,
{
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            entries: DashMap::new(),
        }
    }

    /// Register under a fresh identity
    pub(crate) fn insert(&self, subscriber: Arc<dyn Subscriber<R>>) -> SubscriberId {
        let id = SubscriberId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.insert_with_id(id, subscriber);
        id
    }

    /// Register under `id`, replacing whatever was registered there
    pub(crate) fn insert_with_id(&self, id: SubscriberId, subscriber: Arc<dyn Subscriber<R>>) {
        debug!("Registering {} ({})", id, subscriber.name());
        if self.entries.insert(id, subscriber).is_some() {
            debug!("Replaced existing registration for {}", id);
        }
    }

    pub(crate) fn remove(&self, id: SubscriberId) -> bool {
        self.entries.remove(&id).is_some()
    }

    /// Current subscribers in registration order
    pub(crate) fn snapshot(&self) -> Vec<(SubscriberId, Arc<dyn Subscriber<R>>)> {
        let mut subscribers: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        subscribers.sort_by_key(|(id, _)| *id);
        subscribers
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn clear(&self) {
        self.entries.clear();
    }
}

/// Handle returned by `TableWatcher::subscribe`
///
/// Dropping the handle keeps the subscriber registered; call
/// [`unsubscribe`](Self::unsubscribe) to detach it.
pub struct Subscription<R> {
    id: SubscriberId,
    registry: Weak<SubscriberRegistry<R>>,
}

impl<R> Subscription<R>
where
    R: Send + Sync + 'static,
{
    pub(crate) fn new(id: SubscriberId, registry: &Arc<SubscriberRegistry<R>>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Detach the subscriber
    ///
    /// Returns false if it was already gone (for example after the watcher
    /// shut down and released its subscribers).
    pub fn unsubscribe(self) -> bool {
        match self.registry.upgrade() {
            Some(registry) => registry.remove(self.id),
            None => false,
        }
    }
}

impl<R> std::fmt::Debug for Subscription<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tablewatch_core::{ChangeEvent, Result};

    struct Named(&'static str);

    #[async_trait]
    impl Subscriber<String> for Named {
        async fn notify(&self, _event: &ChangeEvent<String>) -> Result<()> {
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_same_type_subscribers_do_not_replace_each_other() {
        let registry = SubscriberRegistry::<String>::new();
        let first = registry.insert(Arc::new(Named("a")));
        let second = registry.insert(Arc::new(Named("b")));

        assert_ne!(first, second);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_snapshot_is_in_registration_order() {
        let registry = SubscriberRegistry::<String>::new();
        for name in ["first", "second", "third"] {
            registry.insert(Arc::new(Named(name)));
        }

        let names: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|(_, s)| s.name().to_string())
            .collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_insert_with_existing_id_replaces() {
        let registry = SubscriberRegistry::<String>::new();
        let id = registry.insert(Arc::new(Named("old")));
        registry.insert_with_id(id, Arc::new(Named("new")));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1.name(), "new");
    }

    #[test]
    fn test_snapshot_unaffected_by_later_changes() {
        let registry = SubscriberRegistry::<String>::new();
        let id = registry.insert(Arc::new(Named("a")));

        let snapshot = registry.snapshot();
        registry.remove(id);
        registry.insert(Arc::new(Named("b")));

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].1.name(), "a");
    }

    #[test]
    fn test_subscription_unsubscribe() {
        let registry = Arc::new(SubscriberRegistry::<String>::new());
        let id = registry.insert(Arc::new(Named("a")));
        let subscription = Subscription::new(id, &registry);

        assert_eq!(subscription.id(), id);
        assert!(subscription.unsubscribe());
        assert_eq!(registry.len(), 0);

        // Second handle for the same id finds nothing left
        assert!(!Subscription::new(id, &registry).unsubscribe());
    }

    #[test]
    fn test_unsubscribe_after_registry_dropped() {
        let registry = Arc::new(SubscriberRegistry::<String>::new());
        let id = registry.insert(Arc::new(Named("a")));
        let subscription = Subscription::new(id, &registry);

        drop(registry);
        assert!(!subscription.unsubscribe());
    }
}
