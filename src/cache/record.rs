//! Response records - the unit stored in a cache store
//!
//! A record is the status, headers and body of a response plus the time it was
//! written. Header names are stored lower-cased so lookups are case-insensitive.
//! Records are never mutated inside a store; a refresh overwrites the whole record.

use std::collections::BTreeMap;
use std::time::Duration;

use bytes::Bytes;
use hyper::HeaderMap;
use serde::{Deserialize, Serialize};

/// Synthetic header recording when an API response was written (epoch millis)
pub const CACHED_AT_HEADER: &str = "x-vestibule-cached-at";

/// Header naming where a served response came from (network, cache, synthetic)
pub const SOURCE_HEADER: &str = "x-vestibule-source";

/// Cache-Control marker attached to permanently cached fonts (1 year)
pub const PERMANENT_CACHE_CONTROL: &str = "public, max-age=31536000";

/// Headers that describe a single hop and are never forwarded or stored
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether a header only applies to one connection hop
pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| h.eq_ignore_ascii_case(name))
}

/// A stored (or storable) response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// HTTP status code
    pub status: u16,
    /// Lower-cased header name -> values, in arrival order
    headers: BTreeMap<String, Vec<String>>,
    /// Response body
    pub body: Bytes,
    /// When the record was written to a store (epoch millis), None if never stored
    pub written_at_ms: Option<i64>,
}

impl ResponseRecord {
    /// Create an empty record with a status
    pub fn new(status: u16) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: Bytes::new(),
            written_at_ms: None,
        }
    }

    /// Build a record from an upstream response, dropping hop-by-hop headers.
    /// Repeated headers keep one entry per value (`set-cookie` cannot be joined).
    pub fn from_parts(status: u16, headers: &HeaderMap, body: Bytes) -> Self {
        let mut record = Self::new(status);
        for (name, value) in headers {
            if is_hop_by_hop(name.as_str()) {
                continue;
            }
            let Ok(value) = value.to_str() else {
                continue;
            };
            record.append_header(name.as_str(), value);
        }
        record.body = body;
        record
    }

    /// Set a header (builder style)
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.set_header(name, value);
        self
    }

    /// Set the body (builder style)
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of a header
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(|v| v.as_str())
    }

    /// Every value of a header, in arrival order
    pub fn header_values(&self, name: &str) -> impl Iterator<Item = &str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .into_iter()
            .flatten()
            .map(|v| v.as_str())
    }

    /// Replace all values of a header with one value
    pub fn set_header(&mut self, name: &str, value: &str) {
        self.headers
            .insert(name.to_ascii_lowercase(), vec![value.to_string()]);
    }

    pub fn append_header(&mut self, name: &str, value: &str) {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.to_string());
    }

    pub fn remove_header(&mut self, name: &str) {
        self.headers.remove(&name.to_ascii_lowercase());
    }

    /// Iterate headers as (lower-case name, value), one item per value
    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    /// 2xx status
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Whether the response may be written to a store: 2xx, but never a
    /// `206 Partial Content`, whose body is only a fragment of the resource.
    pub fn is_cacheable(&self) -> bool {
        self.is_success() && self.status != 206
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Attach the synthetic write-time header used for API staleness
    pub fn stamped(mut self, now_ms: i64) -> Self {
        self.set_header(CACHED_AT_HEADER, &now_ms.to_string());
        self
    }

    /// Write time recorded in the synthetic header, if present and parseable
    pub fn cached_at_ms(&self) -> Option<i64> {
        self.header(CACHED_AT_HEADER)?.trim().parse().ok()
    }

    /// Whether the synthetic write time is within `window` of `now_ms`.
    /// Records without the header are never fresh.
    pub fn is_fresh(&self, now_ms: i64, window: Duration) -> bool {
        match self.cached_at_ms() {
            Some(cached_at) => (now_ms - cached_at) < window.as_millis() as i64,
            None => false,
        }
    }
}
