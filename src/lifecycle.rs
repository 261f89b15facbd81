//! Lifecycle Manager
//!
//! Drives a router version through install and activation:
//!
//! ```text
//! parsed ──install──► installing ──ok──► waiting ──activate──► activating ──► active
//!                         │
//!                         └──pre-warm failed──► redundant (install may be retried)
//! ```
//!
//! - **install** pre-warms the critical store with every critical resource.
//!   Any fetch failure, non-2xx response or store write failure fails the
//!   install, and this version never takes control. A successful install
//!   requests skip-waiting straight away.
//! - **activate** deletes every store outside the current version set, records
//!   the active version marker and claims control, after which requests go
//!   through the caching strategies.
//!
//! Transitions are serialized; only one install or activation runs at a time.
//! In-flight strategy writes are not fenced against the stale-store deletion:
//! a write racing the cleanup may land in (and recreate) a store that is about
//! to be, or was just, deleted. Such a store is collected by the next activation.

use futures::future::try_join_all;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{info, warn};
use url::Url;

use crate::cache::{CacheRegistry, ResponseRecord, StoreRole};
use crate::fetch::Fetcher;
use crate::router::InterceptedRequest;
use crate::types::{Result, VestibuleError};

/// Backend marker holding the last activated version
pub const ACTIVE_VERSION_MARKER: &str = "active-version";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Not yet installed
    Parsed,
    Installing,
    /// Installed, waiting to activate
    Waiting,
    Activating,
    Active,
    /// Install failed
    Redundant,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Parsed => "parsed",
            LifecycleState::Installing => "installing",
            LifecycleState::Waiting => "waiting",
            LifecycleState::Activating => "activating",
            LifecycleState::Active => "active",
            LifecycleState::Redundant => "redundant",
        };
        f.write_str(s)
    }
}

pub struct LifecycleManager {
    state: RwLock<LifecycleState>,
    skip_waiting: AtomicBool,
    controlling: AtomicBool,
    transition: Mutex<()>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Parsed),
            skip_waiting: AtomicBool::new(false),
            controlling: AtomicBool::new(false),
            transition: Mutex::new(()),
        }
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    async fn set_state(&self, state: LifecycleState) {
        *self.state.write().await = state;
        info!(state = %state, "Lifecycle transition");
    }

    /// Whether requests are served by the caching strategies
    pub fn is_controlling(&self) -> bool {
        self.controlling.load(Ordering::SeqCst)
    }

    /// Ask for activation without waiting
    pub fn skip_waiting(&self) {
        self.skip_waiting.store(true, Ordering::SeqCst);
    }

    pub fn skip_waiting_requested(&self) -> bool {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    /// Resume control if the persisted marker says this version is already
    /// active. Returns whether control was resumed.
    pub async fn restore(&self, registry: &CacheRegistry) -> Result<bool> {
        let _guard = self.transition.lock().await;
        let version = registry.names().version_id();
        let marker = registry.backend().load_marker(ACTIVE_VERSION_MARKER).await?;

        if marker.as_deref() == Some(version.as_str()) {
            self.controlling.store(true, Ordering::SeqCst);
            self.set_state(LifecycleState::Active).await;
            info!(version = %version, "Resumed active version");
            return Ok(true);
        }

        if let Some(previous) = marker {
            info!(previous = %previous, version = %version, "New version detected, install required");
        }
        Ok(false)
    }

    /// Pre-warm the critical store. Fails the whole step if any resource fails.
    pub async fn install(
        &self,
        registry: &CacheRegistry,
        fetcher: &dyn Fetcher,
        resources: &[Url],
    ) -> Result<()> {
        let _guard = self.transition.lock().await;
        match self.state().await {
            LifecycleState::Parsed | LifecycleState::Redundant => {}
            other => {
                return Err(VestibuleError::Lifecycle(format!(
                    "cannot install from state {other}"
                )))
            }
        }

        self.set_state(LifecycleState::Installing).await;
        info!(count = resources.len(), "Installing: pre-warming critical resources");

        match Self::prewarm(registry, fetcher, resources).await {
            Ok(()) => {
                self.set_state(LifecycleState::Waiting).await;
                self.skip_waiting();
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Install failed, version will not activate");
                self.set_state(LifecycleState::Redundant).await;
                Err(e)
            }
        }
    }

    async fn prewarm(registry: &CacheRegistry, fetcher: &dyn Fetcher, resources: &[Url]) -> Result<()> {
        let fetches = resources.iter().map(|url| async move {
            let request = InterceptedRequest::get(url.clone());
            let response = fetcher
                .fetch(&request)
                .await
                .map_err(|e| VestibuleError::Install {
                    url: url.to_string(),
                    reason: e.to_string(),
                })?;
            if !response.is_cacheable() {
                return Err(VestibuleError::Install {
                    url: url.to_string(),
                    reason: format!("HTTP {}", response.status),
                });
            }
            Ok::<(InterceptedRequest, ResponseRecord), VestibuleError>((request, response))
        });
        let fetched = try_join_all(fetches).await?;

        let store = registry.store(StoreRole::Critical);
        for (request, response) in fetched {
            store
                .try_put(&request.key(), response)
                .await
                .map_err(|e| VestibuleError::Install {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    /// Delete stale stores, persist the active marker and claim control.
    /// Returns the names of the deleted stores.
    pub async fn activate(&self, registry: &CacheRegistry) -> Result<Vec<String>> {
        let _guard = self.transition.lock().await;
        let state = self.state().await;
        if state != LifecycleState::Waiting {
            return Err(VestibuleError::Lifecycle(format!(
                "cannot activate from state {state}"
            )));
        }

        self.set_state(LifecycleState::Activating).await;

        let mut deleted = Vec::new();
        match registry.stale_store_names().await {
            Ok(stale) => {
                for name in stale {
                    match registry.delete(&name).await {
                        Ok(true) => deleted.push(name),
                        Ok(false) => {}
                        Err(e) => warn!(store = %name, error = %e, "Failed to delete stale store"),
                    }
                }
            }
            Err(e) => warn!(error = %e, "Could not enumerate stores, skipping cleanup"),
        }

        let version = registry.names().version_id();
        if let Err(e) = registry
            .backend()
            .save_marker(ACTIVE_VERSION_MARKER, &version)
            .await
        {
            warn!(error = %e, "Failed to persist active version marker");
        }

        self.controlling.store(true, Ordering::SeqCst);
        self.set_state(LifecycleState::Active).await;
        info!(version = %version, deleted = deleted.len(), "Activated and claimed control");
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{MemoryBackend, RequestKey, StoreNames};
    use crate::clock::ManualClock;
    use crate::fetch::FetchError;
    use async_trait::async_trait;
    use std::sync::Arc;

    /// Serves 200 for every URL except those whose path contains "missing" (404)
    /// or "down" (transport failure)
    struct OriginStub;

    #[async_trait]
    impl Fetcher for OriginStub {
        async fn fetch(&self, request: &InterceptedRequest) -> std::result::Result<ResponseRecord, FetchError> {
            let path = request.url.path();
            if path.contains("down") {
                Err(FetchError::Network("connection refused".into()))
            } else if path.contains("missing") {
                Ok(ResponseRecord::new(404))
            } else {
                Ok(ResponseRecord::new(200).with_body(path.to_string()))
            }
        }
    }

    fn registry() -> CacheRegistry {
        CacheRegistry::new(
            Arc::new(MemoryBackend::new()),
            StoreNames::new("app", "v2"),
            Arc::new(ManualClock::new(0)),
        )
    }

    fn urls(paths: &[&str]) -> Vec<Url> {
        let base = Url::parse("https://example.com").unwrap();
        paths.iter().map(|p| base.join(p).unwrap()).collect()
    }

    #[tokio::test]
    async fn test_install_prewarms_critical_store() {
        let registry = registry();
        let lifecycle = LifecycleManager::new();
        let resources = urls(&["/", "/assets/main.js"]);

        lifecycle.install(&registry, &OriginStub, &resources).await.unwrap();
        assert_eq!(lifecycle.state().await, LifecycleState::Waiting);
        assert!(lifecycle.skip_waiting_requested());
        assert!(!lifecycle.is_controlling());

        let store = registry.store(StoreRole::Critical);
        let cached = store.lookup(&RequestKey::get(&resources[1])).await.unwrap();
        assert_eq!(cached.body.as_ref(), b"/assets/main.js");
    }

    #[tokio::test]
    async fn test_install_fails_on_unreachable_resource() {
        let registry = registry();
        let lifecycle = LifecycleManager::new();
        let resources = urls(&["/", "/down.css"]);

        let err = lifecycle.install(&registry, &OriginStub, &resources).await.unwrap_err();
        assert!(matches!(err, VestibuleError::Install { .. }));
        assert_eq!(lifecycle.state().await, LifecycleState::Redundant);
        assert!(registry.store_names().await.unwrap().is_empty());

        // Cannot activate a failed install
        assert!(lifecycle.activate(&registry).await.is_err());
        assert!(!lifecycle.is_controlling());
    }

    #[tokio::test]
    async fn test_install_fails_on_error_status() {
        let registry = registry();
        let lifecycle = LifecycleManager::new();
        let result = lifecycle
            .install(&registry, &OriginStub, &urls(&["/missing.png"]))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_activate_removes_stale_stores_and_claims() {
        let registry = registry();
        for name in ["app-api-v1", "app-static-v1", "app-api-v2"] {
            registry
                .open(name)
                .put(&RequestKey::get(&urls(&["/x"])[0]), ResponseRecord::new(200))
                .await;
        }

        let lifecycle = LifecycleManager::new();
        lifecycle.install(&registry, &OriginStub, &[]).await.unwrap();
        let mut deleted = lifecycle.activate(&registry).await.unwrap();
        deleted.sort();

        assert_eq!(deleted, vec!["app-api-v1", "app-static-v1"]);
        assert_eq!(registry.store_names().await.unwrap(), vec!["app-api-v2"]);
        assert!(lifecycle.is_controlling());
        assert_eq!(lifecycle.state().await, LifecycleState::Active);
    }

    #[tokio::test]
    async fn test_restore_from_marker() {
        let registry = registry();
        let first = LifecycleManager::new();
        first.install(&registry, &OriginStub, &[]).await.unwrap();
        first.activate(&registry).await.unwrap();

        let second = LifecycleManager::new();
        assert!(second.restore(&registry).await.unwrap());
        assert!(second.is_controlling());

        let upgraded = CacheRegistry::new(
            Arc::clone(registry.backend()),
            StoreNames::new("app", "v3"),
            Arc::new(ManualClock::new(0)),
        );
        let third = LifecycleManager::new();
        assert!(!third.restore(&upgraded).await.unwrap());
        assert_eq!(third.state().await, LifecycleState::Parsed);
    }
}
