//! Key-value backend contract.
//!
//! The engine runs over two independent instances of [`KvStore`]: a value
//! store holding root documents and an index store holding root id lists.
//! Backends never interpret what they hold.

use crate::error::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{self, BoxStream, StreamExt};

/// A string-keyed map from key to one value type.
#[async_trait]
pub trait KvStore<V: Send + 'static>: Send + Sync {
    /// Read the value under `key`, `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<V>>;

    /// Write `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: V) -> Result<()>;

    /// Remove `key`. Returns `true` if it existed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Enumerate every entry.
    ///
    /// Each call starts a fresh, finite enumeration.
    fn entries(&self) -> BoxStream<'_, Result<(String, V)>>;
}

/// In-memory, `DashMap`-based backend.
///
/// Intended for tests and embedding. Values are cloned on read and write.
#[derive(Debug)]
pub struct MemoryKv<V> {
    map: DashMap<String, V>,
}

impl<V> MemoryKv<V> {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            map: DashMap::new(),
        }
    }

    /// Number of keys currently stored.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Returns `true` if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Sorted list of all keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.map.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

impl<V> Default for MemoryKv<V> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<V> KvStore<V> for MemoryKv<V>
where
    V: Clone + Send + Sync + 'static,
{
    async fn get(&self, key: &str) -> Result<Option<V>> {
        Ok(self.map.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: V) -> Result<()> {
        self.map.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.map.remove(key).is_some())
    }

    fn entries(&self) -> BoxStream<'_, Result<(String, V)>> {
        // Snapshot so no shard lock is held across await points
        let mut snapshot: Vec<(String, V)> = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));
        stream::iter(snapshot.into_iter().map(Ok)).boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn set_get_delete() {
        let kv: MemoryKv<Vec<String>> = MemoryKv::new();
        assert!(kv.get("a").await.unwrap().is_none());

        kv.set("a", vec!["r1".into()]).await.unwrap();
        assert_eq!(kv.get("a").await.unwrap(), Some(vec!["r1".to_string()]));
        assert_eq!(kv.len(), 1);

        assert!(kv.delete("a").await.unwrap());
        assert!(!kv.delete("a").await.unwrap());
        assert!(kv.is_empty());
    }

    #[tokio::test]
    async fn entries_are_restartable() {
        let kv: MemoryKv<u32> = MemoryKv::new();
        kv.set("b", 2).await.unwrap();
        kv.set("a", 1).await.unwrap();

        let first: Vec<(String, u32)> = kv.entries().try_collect().await.unwrap();
        let second: Vec<(String, u32)> = kv.entries().try_collect().await.unwrap();

        assert_eq!(first, vec![("a".to_string(), 1), ("b".to_string(), 2)]);
        assert_eq!(first, second);
        assert_eq!(kv.keys(), ["a", "b"]);
    }
}
