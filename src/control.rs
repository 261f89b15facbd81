//! Control messages
//!
//! JSON messages posted by pages to the router, tagged by `type`:
//!
//! ```json
//! {"type": "SKIP_WAITING"}
//! {"type": "GET_VERSION"}
//! {"type": "PRELOAD_RESOURCES", "resources": ["/docs/intro", "/assets/hero.webp"]}
//! ```

use serde::{Deserialize, Serialize};

use crate::lifecycle::LifecycleState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlMessage {
    /// Activate the waiting version without waiting
    SkipWaiting,
    /// Report the active version identifier
    GetVersion,
    /// Best-effort fetch of resources into the generic store
    PreloadResources {
        #[serde(default)]
        resources: Vec<String>,
    },
}

/// Outcome of a preload request
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PreloadReport {
    pub preloaded: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ControlReply {
    SkipWaiting { ok: bool, state: LifecycleState },
    Version { version: String, timestamp: i64 },
    Preloaded(PreloadReport),
}
