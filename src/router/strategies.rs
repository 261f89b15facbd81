//! Caching strategies
//!
//! | Strategy                 | Order                               | On transport failure |
//! |--------------------------|-------------------------------------|----------------------|
//! | network-first            | network, then store(s)              | class fallback       |
//! | stale-while-revalidate   | store (refresh in background), net  | 502                  |
//! | cache-first, permanent   | store, then net (+1y cache-control) | 502                  |
//! | cache-first, refresh     | store, then net                     | SVG placeholder      |
//!
//! Only 2xx responses are written, and never a 206 partial body. Writes are fire-and-forget: the response is
//! returned without waiting for the store, and a failed write only costs the
//! next lookup a miss.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

use super::classify::{CachedRoute, ResourceClass};
use super::fallback;
use super::request::InterceptedRequest;
use super::{RequestCacheRouter, Served};
use crate::cache::{CacheStore, RequestKey, ResponseRecord, PERMANENT_CACHE_CONTROL};

impl RequestCacheRouter {
    pub(super) async fn network_first(&self, request: &InterceptedRequest, route: &CachedRoute) -> Served {
        let store = self.registry.store(route.store);
        let key = request.key();

        match self.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    let record = match route.max_age {
                        Some(_) => response.clone().stamped(self.clock.now_ms()),
                        None => response.clone(),
                    };
                    self.spawn_write(store, key, record);
                }
                Served::network(response)
            }
            Err(e) => {
                debug!(url = %request.url, error = %e, "Network failed, trying cache");

                if let Some(cached) = store.lookup(&key).await {
                    match route.max_age {
                        Some(window) if !cached.is_fresh(self.clock.now_ms(), window) => {
                            debug!(url = %request.url, "Cached record too old to serve");
                        }
                        _ => return Served::cache(cached),
                    }
                }

                if let Some(role) = route.secondary_store {
                    if let Some(cached) = self.registry.store(role).lookup(&key).await {
                        return Served::cache(cached);
                    }
                }

                Served::synthetic(class_fallback(route.class, &e.to_string()))
            }
        }
    }

    pub(super) async fn stale_while_revalidate(
        &self,
        request: &InterceptedRequest,
        route: &CachedRoute,
    ) -> Served {
        let store = self.registry.store(route.store);
        let key = request.key();

        if let Some(cached) = store.lookup(&key).await {
            self.spawn_revalidation(store, key, request.clone());
            return Served::cache(cached);
        }

        match self.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.spawn_write(store, key, response.clone());
                }
                Served::network(response)
            }
            Err(e) => Served::synthetic(class_fallback(route.class, &e.to_string())),
        }
    }

    pub(super) async fn cache_first_permanent(
        &self,
        request: &InterceptedRequest,
        route: &CachedRoute,
    ) -> Served {
        let store = self.registry.store(route.store);
        let key = request.key();

        if let Some(cached) = store.lookup(&key).await {
            return Served::cache(cached);
        }

        match self.fetch(request).await {
            Ok(mut response) => {
                if response.is_cacheable() {
                    response.set_header("cache-control", PERMANENT_CACHE_CONTROL);
                    self.spawn_write(store, key, response.clone());
                }
                Served::network(response)
            }
            Err(e) => Served::synthetic(class_fallback(route.class, &e.to_string())),
        }
    }

    pub(super) async fn cache_first_refresh_on_miss(
        &self,
        request: &InterceptedRequest,
        route: &CachedRoute,
    ) -> Served {
        let store = self.registry.store(route.store);
        let key = request.key();

        if let Some(cached) = store.lookup(&key).await {
            return Served::cache(cached);
        }

        match self.fetch(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.spawn_write(store, key, response.clone());
                }
                Served::network(response)
            }
            Err(e) => Served::synthetic(class_fallback(route.class, &e.to_string())),
        }
    }

    fn spawn_write(&self, store: CacheStore, key: RequestKey, record: ResponseRecord) {
        self.tasks.spawn(async move {
            store.put(&key, record).await;
        });
    }

    /// Refresh a served-from-cache entry. Failures leave the entry untouched
    /// and never reach the caller.
    fn spawn_revalidation(&self, store: CacheStore, key: RequestKey, request: InterceptedRequest) {
        let fetcher = Arc::clone(&self.fetcher);
        let counters = Arc::clone(&self.counters);
        self.tasks.spawn(async move {
            match fetcher.fetch(&request).await {
                Ok(response) if response.is_cacheable() => {
                    if store.put(&key, response).await {
                        counters.revalidations.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Ok(response) => {
                    debug!(key = %key, status = response.status, "Revalidation not cached");
                }
                Err(e) => {
                    counters.revalidation_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(key = %key, error = %e, "Background revalidation failed");
                }
            }
        });
    }
}

/// Last-resort response for a class
fn class_fallback(class: ResourceClass, reason: &str) -> ResponseRecord {
    match class {
        ResourceClass::Html => fallback::offline_page(),
        ResourceClass::Api => fallback::offline_envelope(),
        ResourceClass::Image => fallback::image_placeholder(),
        ResourceClass::Static | ResourceClass::Font => fallback::gateway_failure(reason),
    }
}
