use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::CacheStorage;
use crate::error::StorageError;
use crate::request::{CachedEntry, RequestKey};

type Generations = BTreeMap<String, HashMap<RequestKey, CachedEntry>>;

/// In-memory cache storage.
/// Clone is cheap and clones share the same generations.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    generations: Arc<RwLock<Generations>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn generations(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.generations.read().await.keys().cloned().collect())
    }

    async fn open(&self, generation: &str) -> Result<(), StorageError> {
        self.generations
            .write()
            .await
            .entry(generation.to_string())
            .or_default();
        Ok(())
    }

    async fn put(
        &self,
        generation: &str,
        key: &RequestKey,
        entry: CachedEntry,
    ) -> Result<(), StorageError> {
        let mut generations = self.generations.write().await;
        generations
            .entry(generation.to_string())
            .or_default()
            .insert(key.clone(), entry);
        Ok(())
    }

    async fn put_all(
        &self,
        generation: &str,
        entries: Vec<(RequestKey, CachedEntry)>,
    ) -> Result<(), StorageError> {
        // One write lock for the whole batch
        let mut generations = self.generations.write().await;
        generations
            .entry(generation.to_string())
            .or_default()
            .extend(entries);
        Ok(())
    }

    async fn lookup(
        &self,
        generation: &str,
        key: &RequestKey,
    ) -> Result<Option<CachedEntry>, StorageError> {
        Ok(self
            .generations
            .read()
            .await
            .get(generation)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    async fn keys(&self, generation: &str) -> Result<Vec<RequestKey>, StorageError> {
        let generations = self.generations.read().await;
        let mut keys: Vec<RequestKey> = generations
            .get(generation)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, generation: &str) -> Result<bool, StorageError> {
        Ok(self.generations.write().await.remove(generation).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Response;

    #[tokio::test]
    async fn test_generations_are_isolated() {
        let storage = MemoryStorage::new();
        let key = RequestKey::get("/index.html");
        storage
            .put("v1", &key, CachedEntry::new(Response::new(200, "one")))
            .await
            .unwrap();
        storage.open("v2").await.unwrap();

        assert_eq!(storage.generations().await.unwrap(), vec!["v1", "v2"]);
        assert!(storage.lookup("v2", &key).await.unwrap().is_none());
        let entry = storage.lookup("v1", &key).await.unwrap().unwrap();
        assert_eq!(entry.response.body, b"one");
    }

    #[tokio::test]
    async fn test_delete_removes_all_entries() {
        let storage = MemoryStorage::new();
        let key = RequestKey::get("/");
        storage
            .put("old", &key, CachedEntry::new(Response::new(200, "")))
            .await
            .unwrap();

        assert!(storage.delete("old").await.unwrap());
        assert!(!storage.delete("old").await.unwrap());
        assert!(storage.keys("old").await.unwrap().is_empty());
        assert!(storage.generations().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_put_all_adds_to_existing_generation() {
        let storage = MemoryStorage::new();
        let kept = RequestKey::get("/kept.js");
        storage
            .put("v1", &kept, CachedEntry::new(Response::new(200, "kept")))
            .await
            .unwrap();

        storage
            .put_all(
                "v1",
                vec![
                    (RequestKey::get("/"), CachedEntry::new(Response::new(200, "root"))),
                    (RequestKey::get("/app.js"), CachedEntry::new(Response::new(200, "app"))),
                ],
            )
            .await
            .unwrap();

        assert_eq!(storage.keys("v1").await.unwrap().len(), 3);
        assert!(storage.lookup("v1", &kept).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let storage = MemoryStorage::new();
        let other = storage.clone();
        storage.open("v1").await.unwrap();
        assert_eq!(other.generations().await.unwrap(), vec!["v1"]);
    }
}
