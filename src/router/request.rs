//! Intercepted requests

use bytes::Bytes;
use hyper::header::{HeaderName, HeaderValue, CONTENT_TYPE};
use hyper::{HeaderMap, Method};
use url::Url;

use crate::cache::RequestKey;

/// What the page intends to do with the response (mirrors `Sec-Fetch-Dest`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Destination {
    Document,
    Image,
    Script,
    Style,
    Font,
    /// Fetch/XHR, beacons and anything not listed above
    Empty,
}

impl Destination {
    /// Parse a `Sec-Fetch-Dest` value
    pub fn from_fetch_dest(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "document" | "iframe" | "frame" => Destination::Document,
            "image" => Destination::Image,
            "script" | "worker" | "sharedworker" | "serviceworker" => Destination::Script,
            "style" => Destination::Style,
            "font" => Destination::Font,
            _ => Destination::Empty,
        }
    }

    /// Guess from the last path segment's extension, for clients that do not
    /// send `Sec-Fetch-Dest`
    pub fn from_path(path: &str) -> Self {
        let file = path.rsplit('/').next().unwrap_or("");
        let Some((_, ext)) = file.rsplit_once('.') else {
            return Destination::Empty;
        };
        match ext.to_ascii_lowercase().as_str() {
            "js" | "mjs" => Destination::Script,
            "css" => Destination::Style,
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "avif" | "svg" | "ico" => Destination::Image,
            "woff" | "woff2" | "ttf" | "otf" | "eot" => Destination::Font,
            "html" | "htm" => Destination::Document,
            _ => Destination::Empty,
        }
    }

    /// Destination from request headers, falling back to the URL path
    pub fn infer(headers: &HeaderMap, url: &Url) -> Self {
        headers
            .get("sec-fetch-dest")
            .and_then(|v| v.to_str().ok())
            .map(Destination::from_fetch_dest)
            .filter(|d| *d != Destination::Empty)
            .unwrap_or_else(|| Destination::from_path(url.path()))
    }
}

/// A request passing through the router
#[derive(Debug, Clone)]
pub struct InterceptedRequest {
    pub method: Method,
    pub url: Url,
    pub destination: Destination,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl InterceptedRequest {
    /// Build a request, inferring its destination from headers and path
    pub fn new(method: Method, url: Url, headers: HeaderMap, body: Bytes) -> Self {
        let destination = Destination::infer(&headers, &url);
        Self {
            method,
            url,
            destination,
            headers,
            body,
        }
    }

    /// Plain GET with no headers
    pub fn get(url: Url) -> Self {
        Self::new(Method::GET, url, HeaderMap::new(), Bytes::new())
    }

    /// JSON POST, as used when replaying deferred submissions
    pub fn post(url: Url, body: Bytes, content_type: Option<&str>) -> Self {
        let mut headers = HeaderMap::new();
        let content_type = content_type.unwrap_or("application/json");
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        Self::new(Method::POST, url, headers, body)
    }

    pub fn with_destination(mut self, destination: Destination) -> Self {
        self.destination = destination;
        self
    }

    pub fn with_header(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(HeaderName::from_static(name), value);
        }
        self
    }

    pub fn key(&self) -> RequestKey {
        RequestKey::new(&self.method, &self.url)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok())
    }
}
