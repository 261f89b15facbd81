//! Shared fixtures: a scripted origin and a router wired to it

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use url::Url;

use vestibule::cache::{MemoryBackend, ResponseRecord, StoreBackend};
use vestibule::clock::ManualClock;
use vestibule::fetch::{FetchError, Fetcher};
use vestibule::router::{Destination, InterceptedRequest};
use vestibule::{RequestCacheRouter, RouterConfig};

pub const ORIGIN: &str = "https://app.example.com";

/// Fixed test epoch (2024-01-01T00:00:00Z)
pub const T0: i64 = 1_704_067_200_000;

pub fn url(path: &str) -> Url {
    Url::parse(ORIGIN).unwrap().join(path).unwrap()
}

/// Origin double: scripted responses per URL, a global on/off switch and a
/// log of every request it saw
pub struct ScriptedNetwork {
    responses: Mutex<HashMap<String, ResponseRecord>>,
    online: AtomicBool,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(HashMap::new()),
            online: AtomicBool::new(true),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Serve `body` with status 200 at `path`
    pub fn serve(&self, path: &str, body: &str, content_type: &str) {
        self.respond(
            path,
            ResponseRecord::new(200)
                .with_header("content-type", content_type)
                .with_body(body.to_string()),
        );
    }

    pub fn respond(&self, path: &str, record: ResponseRecord) {
        self.responses
            .lock()
            .unwrap()
            .insert(url(path).to_string(), record);
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// (method, url) of every request that reached the network
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        let wanted = url(path).to_string();
        self.calls().iter().filter(|(_, u)| *u == wanted).count()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }
}

#[async_trait]
impl Fetcher for ScriptedNetwork {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseRecord, FetchError> {
        if !self.online.load(Ordering::SeqCst) {
            return Err(FetchError::Network("connection refused".into()));
        }
        self.calls
            .lock()
            .unwrap()
            .push((request.method.to_string(), request.url.to_string()));

        let scripted = self
            .responses
            .lock()
            .unwrap()
            .get(request.url.as_str())
            .cloned();
        Ok(scripted.unwrap_or_else(|| ResponseRecord::new(404).with_body("not found")))
    }
}

pub struct Harness {
    pub router: Arc<RequestCacheRouter>,
    pub network: Arc<ScriptedNetwork>,
    pub clock: Arc<ManualClock>,
    pub backend: Arc<dyn StoreBackend>,
}

pub fn config() -> RouterConfig {
    let mut config = RouterConfig::new(Url::parse(ORIGIN).unwrap());
    config.critical_resources = vec!["/".to_string(), "/assets/app.js".to_string()];
    config
}

/// Router over `backend`, not yet booted. The origin serves the critical
/// resources.
pub fn harness_with(backend: Arc<dyn StoreBackend>, config: RouterConfig) -> Harness {
    let network = ScriptedNetwork::new();
    network.serve("/", "<html>home</html>", "text/html");
    network.serve("/assets/app.js", "console.log(1)", "application/javascript");

    let clock = Arc::new(ManualClock::new(T0));
    let router = Arc::new(RequestCacheRouter::new(
        config,
        Arc::clone(&backend),
        network.clone(),
        clock.clone(),
    ));

    Harness {
        router,
        network,
        clock,
        backend,
    }
}

/// Booted router over an in-memory backend
pub async fn active_harness() -> Harness {
    let harness = harness_with(Arc::new(MemoryBackend::new()), config());
    harness.router.boot().await.unwrap();
    assert!(harness.router.lifecycle().is_controlling());
    harness.network.clear_calls();
    harness
}

pub fn get(path: &str) -> InterceptedRequest {
    InterceptedRequest::get(url(path))
}

pub fn get_as(path: &str, destination: Destination) -> InterceptedRequest {
    InterceptedRequest::get(url(path)).with_destination(destination)
}

pub fn body_text(record: &ResponseRecord) -> String {
    String::from_utf8_lossy(&record.body).into_owned()
}
