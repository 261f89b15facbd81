//! Shared error and result types

use thiserror::Error;

use crate::cache::StoreError;
use crate::fetch::FetchError;

/// Top-level error for vestibule operations that are allowed to fail
///
/// Request handling itself never returns this: the router always resolves to a
/// response. These surface from lifecycle steps, startup and configuration.
#[derive(Debug, Error)]
pub enum VestibuleError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Cache store error: {0}")]
    Store(#[from] StoreError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// A critical resource could not be pre-warmed; the upgrade is abandoned
    #[error("Install failed for {url}: {reason}")]
    Install { url: String, reason: String },

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T, E = VestibuleError> = std::result::Result<T, E>;
