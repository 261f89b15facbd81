//! Storage backends for named cache stores
//!
//! A backend holds any number of named stores, each a key -> `ResponseRecord`
//! map. Stores come into existence on first write and disappear only through
//! `delete_store`. Two implementations:
//!
//! - [`MemoryBackend`]: DashMap of DashMaps, lost on restart (tests, `--memory-store`)
//! - [`SledBackend`]: one sled tree per store, persists across restarts
//!
//! A backend also keeps small string markers (the active version) next to the stores.

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use super::record::ResponseRecord;

/// Tree name prefix for cache stores inside sled
const STORE_TREE_PREFIX: &str = "cache:";
/// Tree holding lifecycle markers
const META_TREE: &str = "meta";

/// Error types for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying storage failed (IO, corruption, quota)
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// A stored record could not be encoded or decoded
    #[error("Record codec error: {0}")]
    Codec(String),
}

impl From<sled::Error> for StoreError {
    fn from(e: sled::Error) -> Self {
        StoreError::Backend(e.to_string())
    }
}

/// Named key -> record stores
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Names of every store currently present
    async fn store_names(&self) -> Result<Vec<String>, StoreError>;

    /// Read a record. A missing store reads as empty and is not created.
    async fn get(&self, store: &str, key: &str) -> Result<Option<ResponseRecord>, StoreError>;

    /// Write (or overwrite) a record, creating the store if needed
    async fn put(&self, store: &str, key: &str, record: &ResponseRecord) -> Result<(), StoreError>;

    /// Delete a whole store. Returns whether it existed.
    async fn delete_store(&self, store: &str) -> Result<bool, StoreError>;

    async fn load_marker(&self, name: &str) -> Result<Option<String>, StoreError>;

    async fn save_marker(&self, name: &str, value: &str) -> Result<(), StoreError>;
}

// ============================================================================
// In-memory backend
// ============================================================================

/// Volatile backend
#[derive(Default)]
pub struct MemoryBackend {
    stores: DashMap<String, DashMap<String, ResponseRecord>>,
    markers: DashMap<String, String>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn store_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self.stores.iter().map(|e| e.key().clone()).collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, store: &str, key: &str) -> Result<Option<ResponseRecord>, StoreError> {
        Ok(self
            .stores
            .get(store)
            .and_then(|s| s.get(key).map(|r| r.clone())))
    }

    async fn put(&self, store: &str, key: &str, record: &ResponseRecord) -> Result<(), StoreError> {
        self.stores
            .entry(store.to_string())
            .or_default()
            .insert(key.to_string(), record.clone());
        Ok(())
    }

    async fn delete_store(&self, store: &str) -> Result<bool, StoreError> {
        Ok(self.stores.remove(store).is_some())
    }

    async fn load_marker(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self.markers.get(name).map(|v| v.clone()))
    }

    async fn save_marker(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.markers.insert(name.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// Sled backend
// ============================================================================

/// Persistent backend backed by sled
pub struct SledBackend {
    db: sled::Db,
    meta: sled::Tree,
}

impl SledBackend {
    /// Open (or create) a database at `path`
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }

        let db = sled::Config::new()
            .path(path)
            .mode(sled::Mode::HighThroughput)
            .open()?;

        info!(path = %path.display(), "Cache database opened");
        Self::from_db(db)
    }

    /// Database that is removed when dropped
    pub fn temporary() -> Result<Self, StoreError> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    pub fn from_db(db: sled::Db) -> Result<Self, StoreError> {
        let meta = db.open_tree(META_TREE)?;
        Ok(Self { db, meta })
    }

    /// Underlying database, shared with the deferred queue journal
    pub fn db(&self) -> &sled::Db {
        &self.db
    }

    fn tree_name(store: &str) -> String {
        format!("{STORE_TREE_PREFIX}{store}")
    }

    fn has_tree(&self, store: &str) -> bool {
        let wanted = Self::tree_name(store);
        self.db
            .tree_names()
            .iter()
            .any(|name| name.as_ref() == wanted.as_bytes())
    }
}

#[async_trait]
impl StoreBackend for SledBackend {
    async fn store_names(&self) -> Result<Vec<String>, StoreError> {
        let mut names: Vec<String> = self
            .db
            .tree_names()
            .iter()
            .filter_map(|raw| std::str::from_utf8(raw).ok())
            .filter_map(|name| name.strip_prefix(STORE_TREE_PREFIX))
            .map(|name| name.to_string())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn get(&self, store: &str, key: &str) -> Result<Option<ResponseRecord>, StoreError> {
        if !self.has_tree(store) {
            return Ok(None);
        }
        let tree = self.db.open_tree(Self::tree_name(store))?;
        match tree.get(key.as_bytes())? {
            Some(bytes) => {
                let record: ResponseRecord = rmp_serde::from_slice(&bytes)
                    .map_err(|e| StoreError::Codec(e.to_string()))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    async fn put(&self, store: &str, key: &str, record: &ResponseRecord) -> Result<(), StoreError> {
        let bytes = rmp_serde::to_vec(record).map_err(|e| StoreError::Codec(e.to_string()))?;
        let tree = self.db.open_tree(Self::tree_name(store))?;
        tree.insert(key.as_bytes(), bytes)?;
        debug!(store = store, key = key, "Record written");
        Ok(())
    }

    async fn delete_store(&self, store: &str) -> Result<bool, StoreError> {
        Ok(self.db.drop_tree(Self::tree_name(store))?)
    }

    async fn load_marker(&self, name: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .meta
            .get(name.as_bytes())?
            .map(|v| String::from_utf8_lossy(&v).into_owned()))
    }

    async fn save_marker(&self, name: &str, value: &str) -> Result<(), StoreError> {
        self.meta.insert(name.as_bytes(), value.as_bytes())?;
        self.meta.flush()?;
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn record(body: &'static str) -> ResponseRecord {
        ResponseRecord::new(200)
            .with_header("Content-Type", "text/plain")
            .with_body(body)
    }

    async fn exercise(backend: &dyn StoreBackend) {
        assert!(backend.store_names().await.unwrap().is_empty());
        assert!(backend.get("a-v1", "GET /").await.unwrap().is_none());
        // Reads do not create stores
        assert!(backend.store_names().await.unwrap().is_empty());

        backend.put("a-v1", "GET /", &record("one")).await.unwrap();
        backend.put("b-v1", "GET /", &record("two")).await.unwrap();
        assert_eq!(backend.store_names().await.unwrap(), vec!["a-v1", "b-v1"]);

        let got = backend.get("a-v1", "GET /").await.unwrap().unwrap();
        assert_eq!(got, record("one"));

        // Overwrite, last writer wins
        backend.put("a-v1", "GET /", &record("uno")).await.unwrap();
        let got = backend.get("a-v1", "GET /").await.unwrap().unwrap();
        assert_eq!(got.body.as_ref(), b"uno");

        assert!(backend.delete_store("a-v1").await.unwrap());
        assert!(!backend.delete_store("a-v1").await.unwrap());
        assert_eq!(backend.store_names().await.unwrap(), vec!["b-v1"]);
        assert!(backend.get("a-v1", "GET /").await.unwrap().is_none());

        assert!(backend.load_marker("active").await.unwrap().is_none());
        backend.save_marker("active", "v2").await.unwrap();
        assert_eq!(backend.load_marker("active").await.unwrap().as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_memory_backend() {
        exercise(&MemoryBackend::new()).await;
    }

    #[tokio::test]
    async fn test_sled_backend() {
        exercise(&SledBackend::temporary().unwrap()).await;
    }

    #[tokio::test]
    async fn test_sled_ignores_foreign_trees() {
        let backend = SledBackend::temporary().unwrap();
        backend.db().open_tree("deferred").unwrap();
        backend.put("x-v1", "GET /", &record("x")).await.unwrap();
        assert_eq!(backend.store_names().await.unwrap(), vec!["x-v1"]);
    }
}
