//! Health check endpoints
//!
//! - /health, /healthz - liveness; always 200 while the process runs, with
//!   the origin's reachability reported as `status`
//! - /version - build information captured by build.rs

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;

use super::json_response;
use crate::lifecycle::LifecycleState;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    /// 'online' or 'offline', depending on whether the origin answers
    pub status: &'static str,
    pub version: &'static str,
    /// Active cache version identifier
    pub cache_version: String,
    pub lifecycle: LifecycleState,
    pub controlling: bool,
    pub uptime: u64,
    pub timestamp: String,
}

pub async fn health_check(state: &AppState) -> Response<Full<Bytes>> {
    let router = &state.router;
    let response = HealthResponse {
        healthy: true,
        status: if router.connectivity().is_online() {
            "online"
        } else {
            "offline"
        },
        version: env!("CARGO_PKG_VERSION"),
        cache_version: router.registry().names().version_id(),
        lifecycle: router.lifecycle().state().await,
        controlling: router.lifecycle().is_controlling(),
        uptime: state.started_at.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    json_response(StatusCode::OK, &response)
}

#[derive(Debug, Serialize)]
pub struct VersionResponse {
    pub version: &'static str,
    pub commit: &'static str,
    pub commit_full: &'static str,
    pub build_time: &'static str,
    pub service: &'static str,
}

pub fn version_info() -> Response<Full<Bytes>> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        commit_full: option_env!("GIT_COMMIT_FULL").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "vestibule",
    };
    json_response(StatusCode::OK, &response)
}
