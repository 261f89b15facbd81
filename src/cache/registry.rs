//! Cache Store Registry - named, versioned stores over a backend
//!
//! Every resource class writes to a store named `{prefix}-{role}-{version}`.
//! The five names for the configured version form the *current* set; any other
//! store found in the backend belongs to an older version and is removed on
//! activation.
//!
//! Store I/O failures are not fatal to request handling: [`CacheStore::lookup`]
//! degrades a failed read to a miss and [`CacheStore::put`] reports a failed
//! write as `false`, both counted in [`RegistryStats`].

use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::backend::{StoreBackend, StoreError};
use super::keys::RequestKey;
use super::record::ResponseRecord;
use crate::clock::Clock;

/// Role a store plays; one store per role per version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreRole {
    /// Pre-warmed at install
    Critical,
    /// Scripts, styles and fonts
    Static,
    Image,
    Api,
    /// Documents and anything unclassified; also the preload target
    Generic,
}

impl StoreRole {
    pub const ALL: [StoreRole; 5] = [
        StoreRole::Critical,
        StoreRole::Static,
        StoreRole::Image,
        StoreRole::Api,
        StoreRole::Generic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StoreRole::Critical => "critical",
            StoreRole::Static => "static",
            StoreRole::Image => "image",
            StoreRole::Api => "api",
            StoreRole::Generic => "generic",
        }
    }
}

impl fmt::Display for StoreRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Version-qualified store naming
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreNames {
    /// Application prefix, e.g. "vestibule"
    pub prefix: String,
    /// Version suffix, e.g. "v2"
    pub version: String,
}

impl StoreNames {
    pub fn new(prefix: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            version: version.into(),
        }
    }

    /// Store name for a role at the configured version
    pub fn name(&self, role: StoreRole) -> String {
        format!("{}-{}-{}", self.prefix, role.as_str(), self.version)
    }

    /// All store names considered current
    pub fn current_set(&self) -> BTreeSet<String> {
        StoreRole::ALL.iter().map(|role| self.name(*role)).collect()
    }

    /// Identifier reported to clients asking for the active version
    pub fn version_id(&self) -> String {
        self.name(StoreRole::Generic)
    }
}

impl Default for StoreNames {
    fn default() -> Self {
        Self::new("vestibule", "v2")
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
struct RegistryCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    read_failures: AtomicU64,
    write_failures: AtomicU64,
    deletions: AtomicU64,
}

/// Snapshot of registry counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub read_failures: u64,
    pub write_failures: u64,
    pub deletions: u64,
}

impl RegistryStats {
    /// Calculate hit rate as percentage
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Entry point to all named stores
#[derive(Clone)]
pub struct CacheRegistry {
    backend: Arc<dyn StoreBackend>,
    names: StoreNames,
    clock: Arc<dyn Clock>,
    counters: Arc<RegistryCounters>,
}

impl CacheRegistry {
    pub fn new(backend: Arc<dyn StoreBackend>, names: StoreNames, clock: Arc<dyn Clock>) -> Self {
        info!(
            prefix = %names.prefix,
            version = %names.version,
            "Cache registry initialized"
        );
        Self {
            backend,
            names,
            clock,
            counters: Arc::new(RegistryCounters::default()),
        }
    }

    pub fn names(&self) -> &StoreNames {
        &self.names
    }

    pub fn backend(&self) -> &Arc<dyn StoreBackend> {
        &self.backend
    }

    /// Handle for the current store of a role. Opening is lazy; nothing is
    /// created until the first write.
    pub fn store(&self, role: StoreRole) -> CacheStore {
        self.open(&self.names.name(role))
    }

    /// Handle for an arbitrary store name
    pub fn open(&self, name: &str) -> CacheStore {
        CacheStore {
            name: name.to_string(),
            backend: Arc::clone(&self.backend),
            clock: Arc::clone(&self.clock),
            counters: Arc::clone(&self.counters),
        }
    }

    pub async fn store_names(&self) -> Result<Vec<String>, StoreError> {
        self.backend.store_names().await
    }

    /// Stores present in the backend but outside the current version set
    pub async fn stale_store_names(&self) -> Result<Vec<String>, StoreError> {
        let current = self.names.current_set();
        Ok(self
            .store_names()
            .await?
            .into_iter()
            .filter(|name| !current.contains(name))
            .collect())
    }

    pub async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let existed = self.backend.delete_store(name).await?;
        if existed {
            self.counters.deletions.fetch_add(1, Ordering::Relaxed);
            info!(store = name, "Deleted cache store");
        }
        Ok(existed)
    }

    pub fn stats(&self) -> RegistryStats {
        let c = &self.counters;
        RegistryStats {
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
            writes: c.writes.load(Ordering::Relaxed),
            read_failures: c.read_failures.load(Ordering::Relaxed),
            write_failures: c.write_failures.load(Ordering::Relaxed),
            deletions: c.deletions.load(Ordering::Relaxed),
        }
    }
}

/// Handle to one named store
#[derive(Clone)]
pub struct CacheStore {
    name: String,
    backend: Arc<dyn StoreBackend>,
    clock: Arc<dyn Clock>,
    counters: Arc<RegistryCounters>,
}

impl CacheStore {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Look up a record; read failures count as a miss
    pub async fn lookup(&self, key: &RequestKey) -> Option<ResponseRecord> {
        match self.backend.get(&self.name, &key.to_storage_key()).await {
            Ok(Some(record)) => {
                self.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(store = %self.name, key = %key, "Cache hit");
                Some(record)
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                debug!(store = %self.name, key = %key, "Cache miss");
                None
            }
            Err(e) => {
                self.counters.read_failures.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                warn!(store = %self.name, key = %key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    /// Write a record, stamping its write time. Errors are returned.
    pub async fn try_put(&self, key: &RequestKey, mut record: ResponseRecord) -> Result<(), StoreError> {
        record.written_at_ms = Some(self.clock.now_ms());
        match self.backend.put(&self.name, &key.to_storage_key(), &record).await {
            Ok(()) => {
                self.counters.writes.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(e) => {
                self.counters.write_failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }

    /// Write a record; a failure is logged and reported as `false`
    pub async fn put(&self, key: &RequestKey, record: ResponseRecord) -> bool {
        match self.try_put(key, record).await {
            Ok(()) => true,
            Err(e) => {
                warn!(store = %self.name, key = %key, error = %e, "Cache write failed, serving uncached");
                false
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::MemoryBackend;
    use crate::clock::ManualClock;
    use async_trait::async_trait;
    use url::Url;

    fn registry() -> CacheRegistry {
        CacheRegistry::new(
            Arc::new(MemoryBackend::new()),
            StoreNames::new("app", "v2"),
            Arc::new(ManualClock::new(42)),
        )
    }

    fn key(path: &str) -> RequestKey {
        RequestKey::get(&Url::parse("https://example.com").unwrap().join(path).unwrap())
    }

    #[test]
    fn test_store_names() {
        let names = StoreNames::new("app", "v2");
        assert_eq!(names.name(StoreRole::Critical), "app-critical-v2");
        assert_eq!(names.name(StoreRole::Api), "app-api-v2");
        assert_eq!(names.version_id(), "app-generic-v2");
        assert_eq!(names.current_set().len(), 5);
    }

    #[tokio::test]
    async fn test_put_then_lookup_stamps_write_time() {
        let registry = registry();
        let store = registry.store(StoreRole::Generic);
        let record = ResponseRecord::new(200).with_body("hello");

        assert!(store.lookup(&key("/")).await.is_none());
        assert!(store.put(&key("/"), record.clone()).await);

        let got = store.lookup(&key("/")).await.unwrap();
        assert_eq!(got.status, 200);
        assert_eq!(got.body, record.body);
        assert_eq!(got.written_at_ms, Some(42));

        let stats = registry.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.writes, 1);
        assert_eq!(stats.hit_rate(), 50.0);
    }

    #[tokio::test]
    async fn test_stale_store_names() {
        let registry = registry();
        let record = ResponseRecord::new(200);
        registry.open("app-api-v1").put(&key("/a"), record.clone()).await;
        registry.store(StoreRole::Api).put(&key("/a"), record).await;

        let stale = registry.stale_store_names().await.unwrap();
        assert_eq!(stale, vec!["app-api-v1".to_string()]);

        assert!(registry.delete("app-api-v1").await.unwrap());
        assert!(registry.stale_store_names().await.unwrap().is_empty());
        assert_eq!(registry.stats().deletions, 1);
    }

    struct BrokenBackend;

    #[async_trait]
    impl StoreBackend for BrokenBackend {
        async fn store_names(&self) -> Result<Vec<String>, StoreError> {
            Err(StoreError::Backend("disk gone".into()))
        }
        async fn get(&self, _: &str, _: &str) -> Result<Option<ResponseRecord>, StoreError> {
            Err(StoreError::Backend("disk gone".into()))
        }
        async fn put(&self, _: &str, _: &str, _: &ResponseRecord) -> Result<(), StoreError> {
            Err(StoreError::Backend("quota exceeded".into()))
        }
        async fn delete_store(&self, _: &str) -> Result<bool, StoreError> {
            Ok(false)
        }
        async fn load_marker(&self, _: &str) -> Result<Option<String>, StoreError> {
            Ok(None)
        }
        async fn save_marker(&self, _: &str, _: &str) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_store_failures_degrade() {
        let registry = CacheRegistry::new(
            Arc::new(BrokenBackend),
            StoreNames::default(),
            Arc::new(ManualClock::new(0)),
        );
        let store = registry.store(StoreRole::Static);

        assert!(store.lookup(&key("/app.js")).await.is_none());
        assert!(!store.put(&key("/app.js"), ResponseRecord::new(200)).await);

        let stats = registry.stats();
        assert_eq!(stats.read_failures, 1);
        assert_eq!(stats.write_failures, 1);
        assert_eq!(stats.misses, 1);
    }
}
