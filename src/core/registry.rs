//! Thread-safe endpoint registry shared by every listener.
//!
//! Each transport owns one `Registry` instance. Lookups used for fan-out take
//! the read lock and copy the matching endpoints out before returning, so no
//! network I/O ever happens while the lock is held. Mutations take the write
//! lock and are therefore linearized per registry.

use std::collections::HashMap;
use std::hash::Hash;
use tokio::sync::RwLock;

/// Keyed store of live endpoints for one transport.
///
/// Endpoints are cloned out on every snapshot, so `E` should be cheap to clone
/// (handles behind `Arc`, small metadata).
pub struct Registry<K, E> {
    endpoints: RwLock<HashMap<K, E>>,
}

impl<K, E> Default for Registry<K, E>
where
    K: Eq + Hash + Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, E> Registry<K, E>
where
    K: Eq + Hash + Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self {
            endpoints: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace the endpoint stored under `key`.
    ///
    /// Returns the endpoint that was replaced, if any.
    pub async fn put(&self, key: K, endpoint: E) -> Option<E> {
        let mut map = self.endpoints.write().await;
        map.insert(key, endpoint)
    }

    /// Remove an endpoint. Removing an absent key is a no-op.
    pub async fn remove(&self, key: &K) -> Option<E> {
        let mut map = self.endpoints.write().await;
        map.remove(key)
    }

    /// Copy every endpoint accepted by `predicate` out of the registry.
    ///
    /// The returned vector is a point-in-time snapshot; the lock is released
    /// before the caller sees it.
    pub async fn snapshot_matching<F>(&self, predicate: F) -> Vec<(K, E)>
    where
        F: Fn(&E) -> bool,
    {
        let map = self.endpoints.read().await;
        map.iter()
            .filter(|(_, endpoint)| predicate(endpoint))
            .map(|(key, endpoint)| (key.clone(), endpoint.clone()))
            .collect()
    }

    /// Run `f` against the endpoint under `key` while holding the write lock.
    ///
    /// Returns `None` when no endpoint is registered under `key`.
    pub async fn modify<R>(&self, key: &K, f: impl FnOnce(&mut E) -> R) -> Option<R> {
        let mut map = self.endpoints.write().await;
        map.get_mut(key).map(f)
    }

    /// Keep only the endpoints accepted by `keep`, returning the removed keys.
    ///
    /// The whole pass runs under a single write lock acquisition.
    pub async fn retain(&self, mut keep: impl FnMut(&K, &E) -> bool) -> Vec<K> {
        let mut map = self.endpoints.write().await;
        let mut removed = Vec::new();
        map.retain(|key, endpoint| {
            let kept = keep(key, endpoint);
            if !kept {
                removed.push(key.clone());
            }
            kept
        });
        removed
    }

    /// Remove and return every endpoint.
    pub async fn drain(&self) -> Vec<(K, E)> {
        let mut map = self.endpoints.write().await;
        map.drain().collect()
    }

    pub async fn get(&self, key: &K) -> Option<E> {
        let map = self.endpoints.read().await;
        map.get(key).cloned()
    }

    pub async fn contains(&self, key: &K) -> bool {
        let map = self.endpoints.read().await;
        map.contains_key(key)
    }

    pub async fn len(&self) -> usize {
        let map = self.endpoints.read().await;
        map.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq)]
    struct Entry {
        account: String,
        hits: u32,
    }

    fn entry(account: &str) -> Entry {
        Entry {
            account: account.to_string(),
            hits: 0,
        }
    }

    #[tokio::test]
    async fn test_put_replaces_existing_key() {
        let registry = Registry::new();

        assert!(registry.put("a", entry("u1")).await.is_none());
        let replaced = registry.put("a", entry("u2")).await;

        assert_eq!(replaced, Some(entry("u1")));
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.get(&"a").await, Some(entry("u2")));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let registry = Registry::new();
        registry.put("a", entry("u1")).await;

        assert!(registry.remove(&"a").await.is_some());
        assert!(registry.remove(&"a").await.is_none());
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_snapshot_matching_filters_by_predicate() {
        let registry = Registry::new();
        registry.put("a", entry("u1")).await;
        registry.put("b", entry("u2")).await;
        registry.put("c", entry("u1")).await;

        let mut keys: Vec<_> = registry
            .snapshot_matching(|e| e.account == "u1")
            .await
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        keys.sort();

        assert_eq!(keys, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_snapshot_is_detached_from_registry() {
        let registry = Registry::new();
        registry.put("a", entry("u1")).await;

        let snapshot = registry.snapshot_matching(|_| true).await;
        registry.remove(&"a").await;

        // Holding a snapshot never blocks writers, and it keeps its contents.
        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn test_modify_and_retain() {
        let registry = Registry::new();
        registry.put("a", entry("u1")).await;
        registry.put("b", entry("u2")).await;

        let hits = registry
            .modify(&"a", |e| {
                e.hits += 1;
                e.hits
            })
            .await;
        assert_eq!(hits, Some(1));
        assert_eq!(registry.modify(&"missing", |e| e.hits).await, None);

        let removed = registry.retain(|_, e| e.hits > 0).await;
        assert_eq!(removed, vec!["b"]);
        assert!(registry.contains(&"a").await);
    }

    #[tokio::test]
    async fn test_concurrent_mutations_are_linearized() {
        let registry = Arc::new(Registry::new());
        let mut tasks = Vec::new();

        for i in 0..64u32 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.put(i, entry("u")).await;
                if i % 2 == 0 {
                    registry.remove(&i).await;
                }
                registry.snapshot_matching(|_| true).await.len()
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        let mut keys: Vec<_> = registry
            .drain()
            .await
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        keys.sort();

        let expected: Vec<u32> = (0..64).filter(|i| i % 2 == 1).collect();
        assert_eq!(keys, expected);
    }
}
