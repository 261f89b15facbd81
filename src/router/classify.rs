//! Strategy Selector
//!
//! Maps an intercepted request to a resource class, the store it caches into
//! and the strategy that serves it. Classification is a pure function of the
//! request: ordered rules, first match wins, no I/O.
//!
//! ```text
//! non-http(s) scheme             -> bypass
//! non-GET, deferrable prefix     -> deferred submission path
//! non-GET                        -> bypass
//! path starts with API prefix    -> api    / api store     / network-first (staleness window)
//! destination image              -> image  / image store   / cache-first, refresh on miss
//! destination script | style     -> static / static store  / stale-while-revalidate
//! destination font | font host   -> font   / static store  / cache-first, permanent
//! anything else                  -> html   / generic store / network-first (+ critical store)
//! ```

use hyper::Method;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

use super::request::{Destination, InterceptedRequest};
use crate::cache::StoreRole;

/// Default API staleness window (5 minutes)
pub const DEFAULT_API_STALENESS: Duration = Duration::from_millis(300_000);

/// Resource class of a cacheable request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Html,
    Static,
    Image,
    Api,
    Font,
}

impl ResourceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceClass::Html => "html",
            ResourceClass::Static => "static",
            ResourceClass::Image => "image",
            ResourceClass::Api => "api",
            ResourceClass::Font => "font",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caching strategy variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Network, then cache, then class fallback
    NetworkFirst,
    /// Cache immediately, refresh in the background
    StaleWhileRevalidate,
    /// Cache, else network stored with a one-year cache-control marker
    CacheFirstPermanent,
    /// Cache, else network; placeholder on transport failure
    CacheFirstRefreshOnMiss,
}

/// Where and how a cacheable request is served
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedRoute {
    pub class: ResourceClass,
    pub store: StoreRole,
    pub strategy: Strategy,
    /// Cached records older than this are not used as a network-failure fallback
    pub max_age: Option<Duration>,
    /// Second store consulted when the primary store misses during fallback
    pub secondary_store: Option<StoreRole>,
}

/// Outcome of classification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Route {
    /// Straight to the network, never cached
    Bypass,
    /// Mutating best-effort submission; queued if the network is unreachable
    Deferrable,
    Cached(CachedRoute),
}

/// Classification rules
#[derive(Debug, Clone)]
pub struct RouteTable {
    /// Path prefix of API requests
    pub api_prefix: String,
    /// Hosts whose responses are always fonts
    pub font_hosts: Vec<String>,
    /// Path prefixes of non-GET requests that may be deferred
    pub deferred_prefixes: Vec<String>,
    /// Maximum age of an API record usable as fallback
    pub api_staleness: Duration,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            api_prefix: "/api/".to_string(),
            font_hosts: vec!["fonts.gstatic.com".to_string()],
            deferred_prefixes: vec!["/api/analytics/".to_string()],
            api_staleness: DEFAULT_API_STALENESS,
        }
    }
}

impl RouteTable {
    /// Classify a request. Deterministic and side-effect free.
    pub fn classify(&self, request: &InterceptedRequest) -> Route {
        let url = &request.url;
        let path = url.path();

        if !matches!(url.scheme(), "http" | "https") {
            return Route::Bypass;
        }

        if request.method != Method::GET {
            if self
                .deferred_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
            {
                return Route::Deferrable;
            }
            return Route::Bypass;
        }

        if path.starts_with(self.api_prefix.as_str()) {
            return Route::Cached(CachedRoute {
                class: ResourceClass::Api,
                store: StoreRole::Api,
                strategy: Strategy::NetworkFirst,
                max_age: Some(self.api_staleness),
                secondary_store: None,
            });
        }

        let font_host = url
            .host_str()
            .map(|host| self.font_hosts.iter().any(|h| h.eq_ignore_ascii_case(host)))
            .unwrap_or(false);

        match request.destination {
            Destination::Image => Route::Cached(CachedRoute {
                class: ResourceClass::Image,
                store: StoreRole::Image,
                strategy: Strategy::CacheFirstRefreshOnMiss,
                max_age: None,
                secondary_store: None,
            }),
            Destination::Script | Destination::Style => Route::Cached(CachedRoute {
                class: ResourceClass::Static,
                store: StoreRole::Static,
                strategy: Strategy::StaleWhileRevalidate,
                max_age: None,
                secondary_store: None,
            }),
            _ if request.destination == Destination::Font || font_host => {
                Route::Cached(CachedRoute {
                    class: ResourceClass::Font,
                    store: StoreRole::Static,
                    strategy: Strategy::CacheFirstPermanent,
                    max_age: None,
                    secondary_store: None,
                })
            }
            _ => Route::Cached(CachedRoute {
                class: ResourceClass::Html,
                store: StoreRole::Generic,
                strategy: Strategy::NetworkFirst,
                max_age: None,
                secondary_store: Some(StoreRole::Critical),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use url::Url;

    fn get(url: &str) -> InterceptedRequest {
        InterceptedRequest::get(Url::parse(url).unwrap())
    }

    fn cached(route: Route) -> CachedRoute {
        match route {
            Route::Cached(c) => c,
            other => panic!("expected cached route, got {:?}", other),
        }
    }

    #[test]
    fn test_api_route() {
        let table = RouteTable::default();
        let route = cached(table.classify(&get("https://example.com/api/leads")));
        assert_eq!(route.class, ResourceClass::Api);
        assert_eq!(route.store, StoreRole::Api);
        assert_eq!(route.strategy, Strategy::NetworkFirst);
        assert_eq!(route.max_age, Some(Duration::from_secs(300)));
    }

    #[test]
    fn test_api_prefix_beats_destination() {
        let table = RouteTable::default();
        let req = get("https://example.com/api/avatar.png");
        assert_eq!(req.destination, Destination::Image);
        assert_eq!(cached(table.classify(&req)).class, ResourceClass::Api);
    }

    #[test]
    fn test_destination_routes() {
        let table = RouteTable::default();
        let image = cached(table.classify(&get("https://example.com/logo.png")));
        assert_eq!(image.strategy, Strategy::CacheFirstRefreshOnMiss);
        assert_eq!(image.store, StoreRole::Image);

        let script = cached(table.classify(&get("https://example.com/assets/app.js")));
        assert_eq!(script.class, ResourceClass::Static);
        assert_eq!(script.strategy, Strategy::StaleWhileRevalidate);

        let style = cached(table.classify(
            &get("https://example.com/theme").with_destination(Destination::Style),
        ));
        assert_eq!(style.class, ResourceClass::Static);

        let font = cached(table.classify(&get("https://example.com/inter.woff2")));
        assert_eq!(font.class, ResourceClass::Font);
        assert_eq!(font.store, StoreRole::Static);
        assert_eq!(font.strategy, Strategy::CacheFirstPermanent);
    }

    #[test]
    fn test_font_host() {
        let table = RouteTable::default();
        let route = cached(table.classify(&get("https://fonts.gstatic.com/s/inter/v12/abc")));
        assert_eq!(route.class, ResourceClass::Font);
    }

    #[test]
    fn test_default_is_html() {
        let table = RouteTable::default();
        let route = cached(table.classify(&get("https://example.com/pricing")));
        assert_eq!(route.class, ResourceClass::Html);
        assert_eq!(route.store, StoreRole::Generic);
        assert_eq!(route.secondary_store, Some(StoreRole::Critical));
    }

    #[test]
    fn test_non_get_bypasses() {
        let table = RouteTable::default();
        for method in [Method::POST, Method::PUT, Method::DELETE, Method::PATCH] {
            let mut req = get("https://example.com/api/leads");
            req.method = method;
            assert_eq!(table.classify(&req), Route::Bypass);
        }
    }

    #[test]
    fn test_deferrable_submission() {
        let table = RouteTable::default();
        let req = InterceptedRequest::post(
            Url::parse("https://example.com/api/analytics/events").unwrap(),
            Bytes::from_static(b"{}"),
            None,
        );
        assert_eq!(table.classify(&req), Route::Deferrable);
    }

    #[test]
    fn test_foreign_scheme_bypasses() {
        let table = RouteTable::default();
        let req = get("chrome-extension://abcdef/script.js");
        assert_eq!(table.classify(&req), Route::Bypass);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let table = RouteTable::default();
        for url in [
            "https://example.com/",
            "https://example.com/api/x",
            "https://example.com/a.css",
            "https://fonts.gstatic.com/x",
        ] {
            let req = get(url);
            assert_eq!(table.classify(&req), table.classify(&req));
        }
    }
}
