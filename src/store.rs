//! Key/value adapters backing the day cache.
//!
//! `FileStore` keeps the whole document as one pretty-printed JSON object on
//! disk, keyed by date string, so the cache file stays readable (and editable)
//! by tooling outside this process. `MemoryStore` serves tests and ephemeral
//! runs.

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::fs;

use crate::error::StoreError;
use crate::ports::KeyValueStore;

/// File-backed JSON object store. Each call re-reads the document; writes
/// rewrite it whole. The single writer is the day cache, which serializes
/// its read-modify-write sequence itself.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Missing or corrupt documents read as empty; corruption is logged and
    /// then overwritten by the next set.
    async fn load_doc(&self) -> Map<String, Value> {
        match fs::read_to_string(&self.path).await {
            Ok(s) => match serde_json::from_str::<Map<String, Value>>(&s) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        error = %e,
                        "cache document unreadable, treating as empty"
                    );
                    Map::new()
                }
            },
            Err(_) => Map::new(),
        }
    }

    async fn save_doc(&self, doc: &Map<String, Value>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir).await?;
            }
        }
        let body = serde_json::to_vec_pretty(doc).map_err(|e| StoreError::Io {
            detail: e.to_string(),
        })?;
        fs::write(&self.path, body).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.load_doc().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let mut doc = self.load_doc().await;
        doc.insert(key.to_string(), value);
        self.save_doc(&doc).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let mut doc = self.load_doc().await;
        if doc.remove(key).is_some() {
            self.save_doc(&doc).await?;
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.load_doc().await.keys().cloned().collect())
    }
}

/// In-memory adapter for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Map<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("memory store mutex poisoned")
            .get(key)
            .cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner
            .lock()
            .expect("memory store mutex poisoned")
            .remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .inner
            .lock()
            .expect("memory store mutex poisoned")
            .keys()
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("cache.json"));

        assert_eq!(store.get("2026-08-25").await.unwrap(), None);

        store
            .set("2026-08-25", json!({"date": "2026年8月25日"}))
            .await
            .unwrap();
        let got = store.get("2026-08-25").await.unwrap().unwrap();
        assert_eq!(got["date"], "2026年8月25日");
        assert_eq!(store.keys().await.unwrap(), vec!["2026-08-25".to_string()]);

        store.remove("2026-08-25").await.unwrap();
        assert_eq!(store.get("2026-08-25").await.unwrap(), None);
    }

    #[tokio::test]
    async fn file_store_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path().join("data").join("cache.json"));
        store.set("k", json!(1)).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!(1)));
    }

    #[tokio::test]
    async fn corrupt_document_reads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        std::fs::write(&path, "{ definitely not json").unwrap();

        let store = FileStore::new(&path);
        assert_eq!(store.get("any").await.unwrap(), None);
        assert!(store.keys().await.unwrap().is_empty());

        // A write replaces the corrupt document with a valid one.
        store.set("k", json!("v")).await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(json!("v")));
    }

    #[tokio::test]
    async fn file_document_is_a_plain_json_object() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let store = FileStore::new(&path);
        store.set("2026-01-01", json!({"timestamp": 1})).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let doc: Value = serde_json::from_str(&raw).unwrap();
        assert!(doc.is_object());
        assert!(doc.get("2026-01-01").is_some());
    }

    #[tokio::test]
    async fn memory_store_round_trip() {
        let store = MemoryStore::new();
        store.set("a", json!(1)).await.unwrap();
        store.set("b", json!(2)).await.unwrap();
        let mut keys = store.keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        store.remove("a").await.unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.get("b").await.unwrap(), Some(json!(2)));
    }
}
