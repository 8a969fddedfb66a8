use crate::subscription::Subscription;

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use rxp_endpoint::ObserverId;
use rxp_name::ResourceName;
use rxp_pattern_index::PatternIndex;
use rxp_protocol::Status;
use tracing::{debug, warn};

type Subscribers = IndexMap<String, Arc<Subscription>>;

/// Active subscriptions, indexed by pattern for fan-out.
#[derive(Default)]
pub struct SubscriptionRegistry {
    index: Mutex<PatternIndex<Subscribers>>,
}

impl SubscriptionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `subscription`, returning the one with the same identity it
    /// replaced. The replaced subscription is not notified.
    pub fn subscribe(&self, subscription: Arc<Subscription>) -> Option<Arc<Subscription>> {
        let identity = subscription.identity();
        let mut index = self.index.lock();

        if let Some(subscribers) = index.get_mut(subscription.pattern()) {
            return subscribers.insert(identity, subscription);
        }

        let pattern = subscription.pattern().clone();
        index.insert(pattern, IndexMap::from([(identity, subscription)]));
        None
    }

    /// Removes the subscription of `observer` on `pattern`.
    pub fn unsubscribe(
        &self,
        pattern: &ResourceName,
        observer: ObserverId,
    ) -> Option<Arc<Subscription>> {
        let key = Subscription::key(pattern, observer);
        self.remove_where(pattern, &key, |_| true)
    }

    /// Removes `subscription` only if it is still the registered instance
    /// for its identity.
    pub fn remove(&self, subscription: &Arc<Subscription>) -> bool {
        let key = subscription.identity();
        self.remove_where(subscription.pattern(), &key, |current| {
            Arc::ptr_eq(current, subscription)
        })
        .is_some()
    }

    fn remove_where<F>(
        &self,
        pattern: &ResourceName,
        key: &str,
        predicate: F,
    ) -> Option<Arc<Subscription>>
    where
        F: FnOnce(&Arc<Subscription>) -> bool,
    {
        let mut index = self.index.lock();
        let subscribers = index.get_mut(pattern)?;

        if !subscribers.get(key).is_some_and(predicate) {
            return None;
        }
        let removed = subscribers.shift_remove(key);
        if subscribers.is_empty() {
            index.remove(pattern);
        }
        removed
    }

    /// Removes every subscription held by `observer`.
    pub fn unsubscribe_all(&self, observer: ObserverId) -> Vec<Arc<Subscription>> {
        let mut removed = Vec::new();

        self.index.lock().retain(|_, subscribers| {
            subscribers.retain(|_, subscription| {
                if subscription.observer().id() == observer {
                    removed.push(Arc::clone(subscription));
                    false
                } else {
                    true
                }
            });
            !subscribers.is_empty()
        });

        removed
    }

    /// Every subscription whose pattern covers `resource`.
    #[must_use]
    pub fn matches(&self, resource: &ResourceName) -> Vec<Arc<Subscription>> {
        self.index
            .lock()
            .all_matches(resource)
            .into_iter()
            .flat_map(|(_, subscribers)| subscribers.values().cloned())
            .collect()
    }

    /// Drops every subscription covering `resource` and tells each
    /// subscriber it is out of sync.
    pub fn out_of_sync(&self, resource: &ResourceName) -> Vec<Arc<Subscription>> {
        let evicted: Vec<_> = self
            .matches(resource)
            .into_iter()
            .filter(|subscription| self.remove(subscription))
            .collect();

        for subscription in &evicted {
            debug!(pattern = %subscription.pattern(), %resource, "subscription out of sync");
            if let Err(err) = subscription.fail(Status::OutOfSync) {
                warn!(pattern = %subscription.pattern(), "cannot send out of sync: {err}");
            }
        }

        evicted
    }

    /// Number of subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.index
            .lock()
            .entries()
            .into_iter()
            .map(|(_, subscribers)| subscribers.len())
            .sum()
    }

    /// True if there are no subscriptions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.lock().is_empty()
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rxp_endpoint::{ChannelObserver, Notification, Observer, SharedObserver};
    use rxp_policy::AccessPolicy;
    use rxp_protocol::RequestKind;
    use std::collections::BTreeSet;
    use tracing_test::traced_test;

    fn name(s: &str) -> ResourceName {
        ResourceName::parse(s).unwrap()
    }

    fn subscription(observer: &SharedObserver, pattern: &str) -> Arc<Subscription> {
        Arc::new(Subscription::new(
            Arc::new(AccessPolicy::new()),
            Arc::clone(observer),
            name(pattern),
            false,
        ))
    }

    fn patterns(subscriptions: &[Arc<Subscription>]) -> BTreeSet<String> {
        subscriptions
            .iter()
            .map(|subscription| subscription.pattern().to_string())
            .collect()
    }

    #[test]
    fn test_matches_fans_out_to_all_patterns() {
        let registry = SubscriptionRegistry::new();
        let (observer, _rx) = ChannelObserver::new();
        let observer: SharedObserver = observer;

        for pattern in ["a/b/c", "a/+/c", "a/#", "#", "b/#", "a/b"] {
            registry.subscribe(subscription(&observer, pattern));
        }

        assert_eq!(
            patterns(&registry.matches(&name("a/b/c"))),
            ["a/b/c", "a/+/c", "a/#", "#"]
                .into_iter()
                .map(str::to_owned)
                .collect()
        );
        assert_eq!(registry.len(), 6);
    }

    #[test]
    fn test_subscribe_replaces_same_identity() {
        let registry = SubscriptionRegistry::new();
        let (first, _rx1) = ChannelObserver::new();
        let (second, _rx2) = ChannelObserver::new();
        let first: SharedObserver = first;
        let second: SharedObserver = second;

        let original = subscription(&first, "a/+");
        assert!(registry.subscribe(Arc::clone(&original)).is_none());
        assert!(registry.subscribe(subscription(&second, "a/+")).is_none());

        let replaced = registry.subscribe(subscription(&first, "/a/+")).unwrap();
        assert!(Arc::ptr_eq(&replaced, &original));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.matches(&name("a/x")).len(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let registry = SubscriptionRegistry::new();
        let (observer, _rx) = ChannelObserver::new();
        let observer: SharedObserver = observer;
        registry.subscribe(subscription(&observer, "a/b"));

        assert!(registry.unsubscribe(&name("a/c"), observer.id()).is_none());
        assert!(registry.unsubscribe(&name("a/b"), ObserverId::new()).is_none());
        assert!(registry.unsubscribe(&name("a/b"), observer.id()).is_some());
        assert!(registry.unsubscribe(&name("a/b"), observer.id()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unsubscribe_all_only_touches_one_observer() {
        let registry = SubscriptionRegistry::new();
        let (leaving, _rx1) = ChannelObserver::new();
        let (staying, _rx2) = ChannelObserver::new();
        let leaving: SharedObserver = leaving;
        let staying: SharedObserver = staying;

        for pattern in ["a", "a/+", "b/#"] {
            registry.subscribe(subscription(&leaving, pattern));
        }
        registry.subscribe(subscription(&staying, "a/+"));

        let removed = registry.unsubscribe_all(leaving.id());
        assert_eq!(
            patterns(&removed),
            ["a", "a/+", "b/#"].into_iter().map(str::to_owned).collect()
        );
        assert_eq!(registry.len(), 1);
        assert!(registry.matches(&name("b/c")).is_empty());
        assert_eq!(registry.matches(&name("a/x")).len(), 1);
    }

    #[test]
    fn test_remove_ignores_replaced_instance() {
        let registry = SubscriptionRegistry::new();
        let (observer, _rx) = ChannelObserver::new();
        let observer: SharedObserver = observer;

        let stale = subscription(&observer, "a");
        registry.subscribe(Arc::clone(&stale));
        registry.subscribe(subscription(&observer, "a"));

        assert!(!registry.remove(&stale));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_out_of_sync_evicts_and_notifies() {
        let registry = SubscriptionRegistry::new();
        let (observer, mut notifications) = ChannelObserver::new();
        let observer: SharedObserver = observer;

        registry.subscribe(subscription(&observer, "a/#"));
        registry.subscribe(subscription(&observer, "b/#"));

        let evicted = registry.out_of_sync(&name("a/b"));
        assert_eq!(evicted.len(), 1);
        assert_eq!(registry.len(), 1);
        assert_eq!(
            notifications.try_recv().unwrap(),
            Notification::Error {
                request: RequestKind::Subscribe,
                resource: Some(name("a/#")),
                status: Status::OutOfSync,
            }
        );
        assert!(logs_contain("subscription out of sync"));
    }
}
