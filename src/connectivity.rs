//! Connectivity monitor
//!
//! Tracks whether the origin is reachable. Request-path transport failures mark
//! it offline; any response (whatever its status) marks it online. A periodic
//! probe covers the case where no traffic arrives while the origin recovers.
//! The offline -> online edge is what triggers a queue flush and, when the
//! router never took control, another install attempt.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use crate::router::RequestCacheRouter;

#[derive(Debug)]
pub struct Connectivity {
    online: AtomicBool,
    last_change_ms: AtomicI64,
    transitions: AtomicU64,
}

impl Default for Connectivity {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot for status reporting
#[derive(Debug, Clone, Copy, Serialize)]
pub struct ConnectivityStatus {
    pub online: bool,
    pub last_change_ms: Option<i64>,
    pub transitions: u64,
}

impl Connectivity {
    /// Starts out online
    pub fn new() -> Self {
        Self {
            online: AtomicBool::new(true),
            last_change_ms: AtomicI64::new(0),
            transitions: AtomicU64::new(0),
        }
    }

    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// Returns true on the online -> offline edge
    pub fn mark_offline(&self, now_ms: i64) -> bool {
        let changed = self.online.swap(false, Ordering::SeqCst);
        if changed {
            self.record_change(now_ms);
            info!("Origin unreachable, now offline");
        }
        changed
    }

    /// Returns true on the offline -> online edge
    pub fn mark_online(&self, now_ms: i64) -> bool {
        let changed = !self.online.swap(true, Ordering::SeqCst);
        if changed {
            self.record_change(now_ms);
            info!("Origin reachable again, now online");
        }
        changed
    }

    fn record_change(&self, now_ms: i64) {
        self.last_change_ms.store(now_ms, Ordering::SeqCst);
        self.transitions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn status(&self) -> ConnectivityStatus {
        let transitions = self.transitions.load(Ordering::Relaxed);
        ConnectivityStatus {
            online: self.is_online(),
            last_change_ms: (transitions > 0).then(|| self.last_change_ms.load(Ordering::SeqCst)),
            transitions,
        }
    }
}

/// Spawn a background task probing `probe_url` every `interval` until the
/// router shuts down.
pub fn spawn_connectivity_probe_task(router: Arc<RequestCacheRouter>, probe_url: Url, interval: Duration) {
    let shutdown = router.shutdown_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Connectivity probe task stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    router.probe(&probe_url).await;
                }
            }
        }
    });

    info!(
        interval_secs = interval.as_secs(),
        "Connectivity probe task started"
    );
}
