//! Cache key definitions
//!
//! A cached response is addressed by request method and normalized URL. Only
//! GET ever reaches a store, but the method stays in the key so that a store
//! written by a future revision with HEAD support cannot collide.

use std::fmt;

use hyper::Method;
use url::Url;

/// Cache key for an intercepted request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    /// Upper-case HTTP method
    pub method: String,
    /// Absolute URL without fragment
    pub url: String,
}

impl RequestKey {
    /// Create a key from a method and URL
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut url = url.clone();
        url.set_fragment(None);
        Self {
            method: method.as_str().to_ascii_uppercase(),
            url: url.to_string(),
        }
    }

    /// Key for a GET of `url`
    pub fn get(url: &Url) -> Self {
        Self::new(&Method::GET, url)
    }

    /// Convert to storage key string
    /// Format: METHOD url
    pub fn to_storage_key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.url)
    }
}
