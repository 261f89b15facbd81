//! Outbound fetches
//!
//! The router talks to the network only through [`Fetcher`], so strategies can
//! be exercised against scripted networks in tests. [`HttpFetcher`] is the
//! production implementation on top of reqwest.
//!
//! A fetch resolves to `Ok` whenever a response arrives, whatever its status.
//! `Err` always means a transport failure: nothing came back.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{is_hop_by_hop, ResponseRecord};
use crate::router::InterceptedRequest;

/// Transport-level failures
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Connection refused, DNS failure, reset, body read failure
    #[error("Network unreachable: {0}")]
    Network(String),

    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    #[error("Fetch cancelled")]
    Cancelled,
}

/// Something that can put a request on the wire
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseRecord, FetchError>;
}

/// Run a fetch under an optional timeout and a cancellation token.
/// Both outcomes count as transport failures.
pub async fn guarded_fetch(
    fetcher: &dyn Fetcher,
    request: &InterceptedRequest,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
) -> Result<ResponseRecord, FetchError> {
    let fetch = async {
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, fetcher.fetch(request)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::Timeout(limit)),
            },
            None => fetcher.fetch(request).await,
        }
    };

    tokio::select! {
        _ = cancel.cancelled() => Err(FetchError::Cancelled),
        result = fetch => result,
    }
}

/// Fetcher wrapper applying the router's timeout and shutdown token to every call
#[derive(Clone)]
pub struct GuardedFetcher {
    inner: Arc<dyn Fetcher>,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl GuardedFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, timeout: Option<Duration>, cancel: CancellationToken) -> Self {
        Self {
            inner,
            timeout,
            cancel,
        }
    }
}

#[async_trait]
impl Fetcher for GuardedFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseRecord, FetchError> {
        guarded_fetch(self.inner.as_ref(), request, self.timeout, &self.cancel).await
    }
}

/// reqwest-backed fetcher
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Client that does not follow redirects, so 3xx responses reach the page
    /// unchanged as they would through any transparent proxy
    pub fn with_defaults() -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| FetchError::Network(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &InterceptedRequest) -> Result<ResponseRecord, FetchError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());

        for (name, value) in &request.headers {
            if !is_hop_by_hop(name.as_str()) {
                builder = builder.header(name, value);
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| FetchError::Network(format!("Request failed: {e}")))?;

        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(format!("Body read failed: {e}")))?;

        debug!(
            method = %request.method,
            url = %request.url,
            status = status,
            size = body.len(),
            "Fetched from network"
        );

        Ok(ResponseRecord::from_parts(status, &headers, body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    struct SlowFetcher(Duration);

    #[async_trait]
    impl Fetcher for SlowFetcher {
        async fn fetch(&self, _: &InterceptedRequest) -> Result<ResponseRecord, FetchError> {
            tokio::time::sleep(self.0).await;
            Ok(ResponseRecord::new(200))
        }
    }

    fn request() -> InterceptedRequest {
        InterceptedRequest::get(Url::parse("https://example.com/").unwrap())
    }

    #[tokio::test]
    async fn test_no_timeout_by_default() {
        let fetcher = SlowFetcher(Duration::from_millis(20));
        let result = guarded_fetch(&fetcher, &request(), None, &CancellationToken::new()).await;
        assert_eq!(result.unwrap().status, 200);
    }

    #[tokio::test]
    async fn test_timeout_is_transport_failure() {
        let fetcher = SlowFetcher(Duration::from_secs(5));
        let limit = Duration::from_millis(10);
        let result = guarded_fetch(&fetcher, &request(), Some(limit), &CancellationToken::new()).await;
        assert!(matches!(result, Err(FetchError::Timeout(d)) if d == limit));
    }

    #[tokio::test]
    async fn test_cancellation() {
        let fetcher = SlowFetcher(Duration::from_secs(5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result = guarded_fetch(&fetcher, &request(), None, &cancel).await;
        assert!(matches!(result, Err(FetchError::Cancelled)));
    }
}
