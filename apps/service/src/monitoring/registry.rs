use std::collections::BTreeMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::types::{SessionId, Watcher};

/// Host name -> watchers, in registration order.
///
/// Mutations must be serialised by the caller (see
/// [`WatchService`](super::WatchService)). Reads through [`watchers_for`]
/// are safe to run concurrently with them.
///
/// [`watchers_for`]: WatcherRegistry::watchers_for
#[derive(Debug, Default)]
pub struct WatcherRegistry {
    hosts: DashMap<String, Vec<Arc<Watcher>>>,
}

/// Point-in-time copy of the registry, ordered by host name.
#[derive(Debug, Clone, Default)]
pub struct RegistrySnapshot {
    hosts: BTreeMap<String, Vec<Arc<Watcher>>>,
}

impl RegistrySnapshot {
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[Arc<Watcher>])> {
        self.hosts.iter().map(|(host, watchers)| (host.as_str(), watchers.as_slice()))
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `watcher` to the host's list, creating the list if needed.
    pub fn register(&self, host: &str, watcher: Arc<Watcher>) {
        debug!(host, session = %watcher.id(), port = watcher.port(), "registering watcher");
        self.hosts.entry(host.to_string()).or_default().push(watcher);
    }

    /// Remove the watcher with `id` from the host's list.
    ///
    /// Drops the host entirely once its list is empty. Returns whether a
    /// watcher was removed; an absent watcher is not an error.
    pub fn unregister(&self, host: &str, id: SessionId) -> bool {
        let removed = match self.hosts.get_mut(host) {
            Some(mut watchers) => {
                let before = watchers.len();
                watchers.retain(|watcher| watcher.id() != id);
                watchers.len() != before
            }
            None => false,
        };
        self.hosts.remove_if(host, |_, watchers| watchers.is_empty());

        if removed {
            debug!(host, session = %id, "unregistered watcher");
        }
        removed
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let hosts = self
            .hosts
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        RegistrySnapshot { hosts }
    }

    /// Watchers of `host` right now. Empty if nobody watches it any more.
    pub fn watchers_for(&self, host: &str) -> Vec<Arc<Watcher>> {
        self.hosts.get(host).map(|watchers| watchers.value().clone()).unwrap_or_default()
    }

    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::types::testing::watcher;

    #[test]
    fn test_register_keeps_insertion_order() {
        let registry = WatcherRegistry::new();
        let (first, _) = watcher(80, 7);
        let (second, _) = watcher(443, 9);

        registry.register("a", first.clone());
        registry.register("a", second.clone());

        let ids: Vec<_> = registry.watchers_for("a").iter().map(|w| w.id()).collect();
        assert_eq!(ids, vec![first.id(), second.id()]);
    }

    #[test]
    fn test_identical_requests_are_distinct_watchers() {
        let registry = WatcherRegistry::new();
        let (first, _) = watcher(80, 7);
        let (second, _) = watcher(80, 7);

        registry.register("a", first.clone());
        registry.register("a", second);
        registry.unregister("a", first.id());

        assert_eq!(registry.watchers_for("a").len(), 1);
    }

    #[test]
    fn test_last_unregister_removes_host() {
        let registry = WatcherRegistry::new();
        let (first, _) = watcher(80, 7);

        registry.register("a", first.clone());
        assert!(registry.unregister("a", first.id()));

        assert_eq!(registry.host_count(), 0);
        assert!(registry.snapshot().is_empty());
        assert!(registry.watchers_for("a").is_empty());
    }

    #[test]
    fn test_unregister_absent_is_noop() {
        let registry = WatcherRegistry::new();
        let (first, _) = watcher(80, 7);
        let (stranger, _) = watcher(80, 7);

        assert!(!registry.unregister("a", first.id()));

        registry.register("a", first.clone());
        assert!(!registry.unregister("a", stranger.id()));
        assert!(!registry.unregister("b", first.id()));
        assert!(registry.unregister("a", first.id()));
        assert!(!registry.unregister("a", first.id()));
    }

    #[test]
    fn test_snapshot_never_holds_empty_hosts() {
        let registry = WatcherRegistry::new();
        let watchers: Vec<_> = (0..6).map(|i| watcher(8000 + i, 3).0).collect();

        for (i, w) in watchers.iter().enumerate() {
            registry.register(if i % 2 == 0 { "even" } else { "odd" }, w.clone());
        }
        for (i, w) in watchers.iter().enumerate().rev() {
            let host = if i % 2 == 0 { "even" } else { "odd" };
            registry.unregister(host, w.id());

            let snapshot = registry.snapshot();
            assert!(snapshot.iter().all(|(_, list)| !list.is_empty()));
        }

        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_snapshot_is_detached_from_later_changes() {
        let registry = WatcherRegistry::new();
        let (first, _) = watcher(80, 7);
        let (second, _) = watcher(80, 7);

        registry.register("a", first);
        let snapshot = registry.snapshot();
        registry.register("b", second);

        assert_eq!(snapshot.hosts().collect::<Vec<_>>(), vec!["a"]);
        assert_eq!(registry.snapshot().len(), 2);
    }
}
