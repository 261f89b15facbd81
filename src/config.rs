//! Configuration for Vestibule
//!
//! CLI arguments and environment variable handling using clap.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::cache::StoreNames;
use crate::push::PushConfig;
use crate::router::{RouteTable, RouterConfig};
use crate::types::{Result, VestibuleError};

/// Vestibule - caching request router
///
/// Sits in front of an origin and answers every request from the network, a
/// versioned cache store or an offline fallback.
#[derive(Parser, Debug, Clone)]
#[command(name = "vestibule")]
#[command(about = "Offline-first caching request router")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:8080")]
    pub listen: SocketAddr,

    /// Origin server the router fronts
    #[arg(long, env = "ORIGIN_URL", default_value = "http://localhost:3000")]
    pub origin_url: String,

    /// Directory of the sled cache database
    #[arg(long, env = "CACHE_DIR", default_value = "data/vestibule.sled")]
    pub cache_dir: PathBuf,

    /// Keep cache stores in memory only (lost on restart)
    #[arg(long, env = "MEMORY_STORE", default_value = "false")]
    pub memory_store: bool,

    /// Prefix of every cache store name
    #[arg(long, env = "CACHE_PREFIX", default_value = "vestibule")]
    pub cache_prefix: String,

    /// Cache version; changing it retires every store of the previous version
    #[arg(long, env = "CACHE_VERSION", default_value = "v2")]
    pub cache_version: String,

    /// Path prefix of API requests
    #[arg(long, env = "API_PREFIX", default_value = "/api/")]
    pub api_prefix: String,

    /// Hosts whose responses are treated as fonts (comma-separated)
    #[arg(long, env = "FONT_HOSTS", default_value = "fonts.gstatic.com", value_delimiter = ',')]
    pub font_hosts: Vec<String>,

    /// Path prefixes of submissions that may be deferred when offline (comma-separated)
    #[arg(long, env = "DEFERRED_PREFIXES", default_value = "/api/analytics/", value_delimiter = ',')]
    pub deferred_prefixes: Vec<String>,

    /// Maximum age in seconds of a cached API response used while offline
    #[arg(long, env = "API_STALENESS_SECS", default_value = "300")]
    pub api_staleness_secs: u64,

    /// Resources pre-warmed at install (comma-separated, origin-relative or absolute)
    #[arg(long, env = "CRITICAL_RESOURCES", default_value = "/", value_delimiter = ',')]
    pub critical_resources: Vec<String>,

    /// Per-request origin timeout in milliseconds (no timeout when unset)
    #[arg(long, env = "FETCH_TIMEOUT_MS")]
    pub fetch_timeout_ms: Option<u64>,

    /// Seconds between connectivity probes of the origin
    #[arg(long, env = "PROBE_INTERVAL_SECS", default_value = "15")]
    pub probe_interval_secs: u64,

    /// Journal deferred submissions to disk so they survive restarts
    #[arg(long, env = "DURABLE_QUEUE", default_value = "false")]
    pub durable_queue: bool,

    /// URL opened by the notification explore action (defaults to the origin)
    #[arg(long, env = "NOTIFICATION_URL")]
    pub notification_url: Option<String>,

    /// Title of push notifications
    #[arg(long, env = "NOTIFICATION_TITLE", default_value = "Vestibule")]
    pub notification_title: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log format (text or json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text")]
    pub log_format: String,
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        let origin = Url::parse(&self.origin_url)
            .map_err(|e| format!("ORIGIN_URL is not a valid URL: {e}"))?;
        if !matches!(origin.scheme(), "http" | "https") {
            return Err("ORIGIN_URL must use http or https".to_string());
        }

        if self.cache_prefix.is_empty() || self.cache_version.is_empty() {
            return Err("CACHE_PREFIX and CACHE_VERSION must not be empty".to_string());
        }

        if !self.api_prefix.starts_with('/') {
            return Err("API_PREFIX must start with '/'".to_string());
        }

        if self.deferred_prefixes.iter().any(|p| !p.starts_with('/')) {
            return Err("DEFERRED_PREFIXES entries must start with '/'".to_string());
        }

        if self.fetch_timeout_ms == Some(0) {
            return Err("FETCH_TIMEOUT_MS must be greater than 0".to_string());
        }

        if self.probe_interval_secs == 0 {
            return Err("PROBE_INTERVAL_SECS must be greater than 0".to_string());
        }

        if !matches!(self.log_format.as_str(), "text" | "json") {
            return Err("LOG_FORMAT must be 'text' or 'json'".to_string());
        }

        Ok(())
    }

    pub fn origin(&self) -> Result<Url> {
        Url::parse(&self.origin_url).map_err(|e| VestibuleError::Config(format!("ORIGIN_URL: {e}")))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs)
    }

    pub fn json_logs(&self) -> bool {
        self.log_format == "json"
    }

    /// Router configuration derived from the arguments
    pub fn router_config(&self) -> Result<RouterConfig> {
        let origin = self.origin()?;
        let explore_url = match &self.notification_url {
            Some(url) => url.clone(),
            None => origin.to_string(),
        };

        Ok(RouterConfig {
            stores: StoreNames::new(&self.cache_prefix, &self.cache_version),
            routes: RouteTable {
                api_prefix: self.api_prefix.clone(),
                font_hosts: trimmed(&self.font_hosts),
                deferred_prefixes: trimmed(&self.deferred_prefixes),
                api_staleness: Duration::from_secs(self.api_staleness_secs),
            },
            critical_resources: trimmed(&self.critical_resources),
            fetch_timeout: self.fetch_timeout_ms.map(Duration::from_millis),
            push: PushConfig {
                title: self.notification_title.clone(),
                explore_url,
                ..PushConfig::default()
            },
            origin,
        })
    }
}

fn trimmed(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .collect()
}
