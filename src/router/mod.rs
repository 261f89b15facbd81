//! Request Cache Router
//!
//! Entry point for every intercepted request and lifecycle event.
//!
//! ```text
//!                        ┌───────────────┐
//!  InterceptedRequest ──►│ handle_fetch  │──► Served { record, source }
//!                        └──────┬────────┘
//!                               │ not controlling: pass-through
//!                               ▼
//!                        RouteTable::classify
//!            ┌──────────────┬───┴──────────┬──────────────────────┐
//!            ▼              ▼              ▼                      ▼
//!         Bypass       Deferrable     NetworkFirst     SWR / CacheFirst(*)
//!         network      network or     network, store,  store, network,
//!         or 503       queue + ack    class fallback   class fallback
//! ```
//!
//! `handle_fetch` never fails: every path ends in a network response, a
//! cached record or a synthetic fallback. Cache writes and background
//! revalidations are spawned on a [`TaskTracker`]; [`RequestCacheRouter::settle`]
//! waits for them.

pub mod classify;
pub mod fallback;
pub mod request;
mod strategies;

pub use classify::{CachedRoute, ResourceClass, Route, RouteTable, Strategy, DEFAULT_API_STALENESS};
pub use request::{Destination, InterceptedRequest};

use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use url::Url;

use crate::cache::{
    CacheRegistry, RegistryStats, ResponseRecord, StoreBackend, StoreNames, StoreRole, CACHED_AT_HEADER,
    SOURCE_HEADER,
};
use crate::clock::Clock;
use crate::connectivity::{Connectivity, ConnectivityStatus};
use crate::control::{ControlMessage, ControlReply, PreloadReport};
use crate::fetch::{FetchError, Fetcher, GuardedFetcher};
use crate::lifecycle::{LifecycleManager, LifecycleState};
use crate::push::PushConfig;
use crate::queue::{DeferredSubmissionQueue, FlushReport};
use crate::types::Result;

// ============================================================================
// Configuration
// ============================================================================

/// Everything the router needs to know about its deployment
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Origin the router fronts; relative resource paths resolve against it
    pub origin: Url,
    pub stores: StoreNames,
    pub routes: RouteTable,
    /// Pre-warmed into the critical store at install
    pub critical_resources: Vec<String>,
    /// Per-fetch timeout; none by default
    pub fetch_timeout: Option<Duration>,
    pub push: PushConfig,
}

impl RouterConfig {
    /// Default routing, store naming and push settings for an origin
    pub fn new(origin: Url) -> Self {
        let push = PushConfig {
            explore_url: origin.to_string(),
            ..PushConfig::default()
        };
        Self {
            origin,
            stores: StoreNames::default(),
            routes: RouteTable::default(),
            critical_resources: vec!["/".to_string()],
            fetch_timeout: None,
            push,
        }
    }

    /// Resolve a resource reference (absolute or origin-relative)
    pub fn resolve(&self, resource: &str) -> Result<Url> {
        Ok(self.origin.join(resource)?)
    }
}

// ============================================================================
// Served responses
// ============================================================================

/// Where a response came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseSource {
    Network,
    Cache,
    Synthetic,
}

impl ResponseSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseSource::Network => "network",
            ResponseSource::Cache => "cache",
            ResponseSource::Synthetic => "synthetic",
        }
    }
}

/// Response resolved for an intercepted request
#[derive(Debug, Clone)]
pub struct Served {
    pub record: ResponseRecord,
    pub source: ResponseSource,
}

impl Served {
    fn new(mut record: ResponseRecord, source: ResponseSource) -> Self {
        record.set_header(SOURCE_HEADER, source.as_str());
        Self { record, source }
    }

    pub(crate) fn network(record: ResponseRecord) -> Self {
        Self::new(record, ResponseSource::Network)
    }

    /// Served from a store. The write-time stamp is internal to the store.
    pub(crate) fn cache(mut record: ResponseRecord) -> Self {
        record.remove_header(CACHED_AT_HEADER);
        Self::new(record, ResponseSource::Cache)
    }

    pub(crate) fn synthetic(record: ResponseRecord) -> Self {
        Self::new(record, ResponseSource::Synthetic)
    }
}

// ============================================================================
// Statistics
// ============================================================================

#[derive(Debug, Default)]
pub(crate) struct RouterCounters {
    pub requests: AtomicU64,
    pub passthrough: AtomicU64,
    pub network: AtomicU64,
    pub cache: AtomicU64,
    pub synthetic: AtomicU64,
    pub deferred: AtomicU64,
    pub revalidations: AtomicU64,
    pub revalidation_failures: AtomicU64,
}

impl RouterCounters {
    fn record(&self, served: &Served) {
        let counter = match served.source {
            ResponseSource::Network => &self.network,
            ResponseSource::Cache => &self.cache,
            ResponseSource::Synthetic => &self.synthetic,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Snapshot of router counters
#[derive(Debug, Clone, Default, Serialize)]
pub struct RouterStats {
    pub requests: u64,
    pub passthrough: u64,
    pub network: u64,
    pub cache: u64,
    pub synthetic: u64,
    pub deferred: u64,
    pub revalidations: u64,
    pub revalidation_failures: u64,
}

/// Full status report
#[derive(Debug, Clone, Serialize)]
pub struct RouterStatus {
    pub version: String,
    pub state: LifecycleState,
    pub controlling: bool,
    pub connectivity: ConnectivityStatus,
    pub queued: usize,
    pub router: RouterStats,
    pub stores: RegistryStats,
    pub hit_rate: f64,
}

// ============================================================================
// Router
// ============================================================================

pub struct RequestCacheRouter {
    config: RouterConfig,
    registry: CacheRegistry,
    fetcher: Arc<dyn Fetcher>,
    queue: Arc<DeferredSubmissionQueue>,
    lifecycle: LifecycleManager,
    connectivity: Arc<Connectivity>,
    clock: Arc<dyn Clock>,
    tasks: TaskTracker,
    shutdown: CancellationToken,
    counters: Arc<RouterCounters>,
}

impl RequestCacheRouter {
    /// Build a router over a store backend and a raw fetcher. The fetcher is
    /// wrapped with the configured timeout and the router's shutdown token.
    pub fn new(
        config: RouterConfig,
        backend: Arc<dyn StoreBackend>,
        fetcher: Arc<dyn Fetcher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shutdown = CancellationToken::new();
        let fetcher: Arc<dyn Fetcher> = Arc::new(GuardedFetcher::new(
            fetcher,
            config.fetch_timeout,
            shutdown.clone(),
        ));
        let registry = CacheRegistry::new(backend, config.stores.clone(), Arc::clone(&clock));
        let queue = Arc::new(DeferredSubmissionQueue::new(Arc::clone(&clock)));

        Self {
            config,
            registry,
            fetcher,
            queue,
            lifecycle: LifecycleManager::new(),
            connectivity: Arc::new(Connectivity::new()),
            clock,
            tasks: TaskTracker::new(),
            shutdown,
            counters: Arc::new(RouterCounters::default()),
        }
    }

    /// Replace the in-memory queue (e.g. with a durable one)
    pub fn with_queue(mut self, queue: Arc<DeferredSubmissionQueue>) -> Self {
        self.queue = queue;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn registry(&self) -> &CacheRegistry {
        &self.registry
    }

    pub fn queue(&self) -> &Arc<DeferredSubmissionQueue> {
        &self.queue
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn connectivity(&self) -> &Connectivity {
        &self.connectivity
    }

    pub fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    // ------------------------------------------------------------------------
    // Fetch
    // ------------------------------------------------------------------------

    /// Resolve a request to a response. Never fails.
    pub async fn handle_fetch(&self, request: InterceptedRequest) -> Served {
        self.counters.requests.fetch_add(1, Ordering::Relaxed);

        let served = if !self.lifecycle.is_controlling() {
            self.counters.passthrough.fetch_add(1, Ordering::Relaxed);
            self.pass_through(&request).await
        } else {
            match self.config.routes.classify(&request) {
                Route::Bypass => self.pass_through(&request).await,
                Route::Deferrable => self.submit_deferrable(&request).await,
                Route::Cached(route) => {
                    debug!(
                        url = %request.url,
                        class = %route.class,
                        strategy = ?route.strategy,
                        "Routing request"
                    );
                    match route.strategy {
                        Strategy::NetworkFirst => self.network_first(&request, &route).await,
                        Strategy::StaleWhileRevalidate => {
                            self.stale_while_revalidate(&request, &route).await
                        }
                        Strategy::CacheFirstPermanent => {
                            self.cache_first_permanent(&request, &route).await
                        }
                        Strategy::CacheFirstRefreshOnMiss => {
                            self.cache_first_refresh_on_miss(&request, &route).await
                        }
                    }
                }
            }
        };

        self.counters.record(&served);
        served
    }

    /// Network fetch on the request path. Updates connectivity; coming back
    /// online flushes the deferred queue in the background.
    pub(crate) async fn fetch(&self, request: &InterceptedRequest) -> std::result::Result<ResponseRecord, FetchError> {
        let result = self.fetcher.fetch(request).await;
        let now = self.clock.now_ms();
        match &result {
            Ok(_) => {
                if self.connectivity.mark_online(now) {
                    self.spawn_flush();
                }
            }
            Err(FetchError::Cancelled) => {}
            Err(_) => {
                self.connectivity.mark_offline(now);
            }
        }
        result
    }

    async fn pass_through(&self, request: &InterceptedRequest) -> Served {
        match self.fetch(request).await {
            Ok(response) => Served::network(response),
            Err(e) => {
                debug!(url = %request.url, error = %e, "Pass-through failed, answering offline");
                Served::synthetic(fallback::offline_envelope())
            }
        }
    }

    async fn submit_deferrable(&self, request: &InterceptedRequest) -> Served {
        match self.fetch(request).await {
            Ok(response) => Served::network(response),
            Err(e) => {
                info!(url = %request.url, error = %e, "Submission deferred until back online");
                self.queue
                    .enqueue(&request.url, request.body.clone(), request.content_type())
                    .await;
                self.counters.deferred.fetch_add(1, Ordering::Relaxed);
                Served::synthetic(fallback::queued_ack())
            }
        }
    }

    fn spawn_flush(&self) {
        let queue = Arc::clone(&self.queue);
        let fetcher = Arc::clone(&self.fetcher);
        self.tasks.spawn(async move {
            queue.flush(fetcher.as_ref()).await;
        });
    }

    /// Replay the deferred queue now
    pub async fn flush_deferred(&self) -> FlushReport {
        self.queue.flush(self.fetcher.as_ref()).await
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Pre-warm the critical store
    pub async fn handle_install(&self) -> Result<()> {
        let resources = self
            .config
            .critical_resources
            .iter()
            .map(|resource| self.config.resolve(resource))
            .collect::<Result<Vec<_>>>()?;
        self.lifecycle
            .install(&self.registry, self.fetcher.as_ref(), &resources)
            .await
    }

    /// Delete stale stores and claim control; returns deleted store names
    pub async fn handle_activate(&self) -> Result<Vec<String>> {
        self.lifecycle.activate(&self.registry).await
    }

    /// Resume the persisted version, or install and activate this one
    pub async fn boot(&self) -> Result<()> {
        if self.lifecycle.restore(&self.registry).await? {
            return Ok(());
        }
        if self.lifecycle.state().await != LifecycleState::Waiting {
            self.handle_install().await?;
        }
        if self.lifecycle.skip_waiting_requested() {
            self.handle_activate().await?;
        }
        Ok(())
    }

    /// Probe the origin. On the offline -> online edge, run the reconnect
    /// sequence; while online, drain anything still queued.
    pub async fn probe(&self, url: &Url) -> bool {
        let request = InterceptedRequest::get(url.clone());
        match self.fetcher.fetch(&request).await {
            Ok(_) => {
                if self.connectivity.mark_online(self.clock.now_ms()) {
                    self.handle_online().await;
                } else if !self.queue.is_empty().await {
                    self.flush_deferred().await;
                }
                true
            }
            Err(e) => {
                debug!(url = %url, error = %e, "Connectivity probe failed");
                self.connectivity.mark_offline(self.clock.now_ms());
                false
            }
        }
    }

    /// Connectivity is back: replay deferred submissions and retry boot if
    /// this version never took control
    pub async fn handle_online(&self) -> FlushReport {
        self.connectivity.mark_online(self.clock.now_ms());
        let report = self.flush_deferred().await;
        if !self.lifecycle.is_controlling() {
            info!("Retrying install after reconnect");
            if let Err(e) = self.boot().await {
                warn!(error = %e, "Install retry failed, staying in pass-through");
            }
        }
        report
    }

    // ------------------------------------------------------------------------
    // Control messages
    // ------------------------------------------------------------------------

    pub async fn handle_message(&self, message: ControlMessage) -> ControlReply {
        match message {
            ControlMessage::SkipWaiting => {
                self.lifecycle.skip_waiting();
                if self.lifecycle.state().await == LifecycleState::Waiting {
                    if let Err(e) = self.handle_activate().await {
                        warn!(error = %e, "Skip-waiting activation failed");
                    }
                }
                let state = self.lifecycle.state().await;
                ControlReply::SkipWaiting {
                    ok: state == LifecycleState::Active,
                    state,
                }
            }
            ControlMessage::GetVersion => ControlReply::Version {
                version: self.registry.names().version_id(),
                timestamp: self.clock.now_ms(),
            },
            ControlMessage::PreloadResources { resources } => {
                ControlReply::Preloaded(self.preload(&resources).await)
            }
        }
    }

    /// Best-effort fetch of resources into the generic store
    async fn preload(&self, resources: &[String]) -> PreloadReport {
        let store = self.registry.store(StoreRole::Generic);
        let outcomes = join_all(resources.iter().map(|resource| {
            let store = store.clone();
            async move {
                let url = match self.config.resolve(resource) {
                    Ok(url) => url,
                    Err(e) => {
                        debug!(resource = %resource, error = %e, "Preload skipped");
                        return false;
                    }
                };
                let request = InterceptedRequest::get(url);
                match self.fetch(&request).await {
                    Ok(response) if response.is_cacheable() => store.put(&request.key(), response).await,
                    Ok(response) => {
                        debug!(url = %request.url, status = response.status, "Preload not cached");
                        false
                    }
                    Err(e) => {
                        debug!(url = %request.url, error = %e, "Preload failed");
                        false
                    }
                }
            }
        }))
        .await;

        let preloaded = outcomes.iter().filter(|ok| **ok).count();
        let report = PreloadReport {
            preloaded,
            failed: outcomes.len() - preloaded,
        };
        info!(preloaded = report.preloaded, failed = report.failed, "Preload finished");
        report
    }

    // ------------------------------------------------------------------------
    // Background work
    // ------------------------------------------------------------------------

    /// Wait until every spawned write and revalidation has finished
    pub async fn settle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Cancel in-flight fetches and wait for background work
    pub async fn shutdown(&self) {
        info!("Router shutting down");
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    pub fn stats(&self) -> RouterStats {
        let c = &self.counters;
        RouterStats {
            requests: c.requests.load(Ordering::Relaxed),
            passthrough: c.passthrough.load(Ordering::Relaxed),
            network: c.network.load(Ordering::Relaxed),
            cache: c.cache.load(Ordering::Relaxed),
            synthetic: c.synthetic.load(Ordering::Relaxed),
            deferred: c.deferred.load(Ordering::Relaxed),
            revalidations: c.revalidations.load(Ordering::Relaxed),
            revalidation_failures: c.revalidation_failures.load(Ordering::Relaxed),
        }
    }

    pub async fn status(&self) -> RouterStatus {
        let stores = self.registry.stats();
        RouterStatus {
            version: self.registry.names().version_id(),
            state: self.lifecycle.state().await,
            controlling: self.lifecycle.is_controlling(),
            connectivity: self.connectivity.status(),
            queued: self.queue.len().await,
            router: self.stats(),
            hit_rate: stores.hit_rate(),
            stores,
        }
    }
}
