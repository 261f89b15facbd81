//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo for async handling. Requests under
//! `/__vestibule/` and the health endpoints are answered locally; everything
//! else is handed to the [`RequestCacheRouter`].

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderName, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;

use crate::cache::{is_hop_by_hop, ResponseRecord};
use crate::router::{InterceptedRequest, RequestCacheRouter, Served};
use crate::routes;
use crate::types::VestibuleError;

/// Path prefix of the router's own endpoints
pub const CONTROL_PREFIX: &str = "/__vestibule/";

/// Shared application state
pub struct AppState {
    pub listen: SocketAddr,
    pub router: Arc<RequestCacheRouter>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(listen: SocketAddr, router: Arc<RequestCacheRouter>) -> Self {
        Self {
            listen,
            router,
            started_at: Instant::now(),
        }
    }
}

/// Accept connections until `shutdown` is cancelled
pub async fn run(state: Arc<AppState>, shutdown: CancellationToken) -> Result<(), VestibuleError> {
    let listener = TcpListener::bind(state.listen).await?;

    info!(
        listen = %state.listen,
        origin = %state.router.config().origin,
        "Vestibule listening"
    );

    loop {
        let accepted = tokio::select! {
            _ = shutdown.cancelled() => {
                info!("Listener stopped");
                return Ok(());
            }
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, addr)) => {
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    let io = TokioIo::new(stream);

                    let service = service_fn(move |req| {
                        let state = Arc::clone(&state);
                        async move { handle_request(state, addr, req).await }
                    });

                    if let Err(err) = http1::Builder::new()
                        .preserve_header_case(true)
                        .serve_connection(io, service)
                        .await
                    {
                        debug!(addr = %addr, error = ?err, "Error serving connection");
                    }
                });
            }
            Err(e) => {
                error!(error = ?e, "Error accepting connection");
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    debug!(addr = %addr, method = %method, path = %path, "Request");

    let response = match (&method, path.as_str()) {
        (&Method::GET, "/health") | (&Method::GET, "/healthz") => {
            routes::health_check(&state).await
        }
        (&Method::GET, "/version") => routes::version_info(),
        (_, p) if p.starts_with(CONTROL_PREFIX) => {
            let body = match req.into_body().collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => return Ok(routes::bad_request(&format!("Failed to read body: {e}"))),
            };
            routes::handle_control(&state, &method, &p[CONTROL_PREFIX.len()..], body).await
        }
        _ => {
            let intercepted = match intercept(&state.router.config().origin, req).await {
                Ok(intercepted) => intercepted,
                Err(message) => return Ok(routes::bad_request(&message)),
            };
            let served = state.router.handle_fetch(intercepted).await;
            debug!(
                addr = %addr,
                path = %path,
                status = served.record.status,
                source = served.source.as_str(),
                "Served"
            );
            to_response(served)
        }
    };

    Ok(response)
}

/// Turn an incoming hyper request into an [`InterceptedRequest`]. Absolute-form
/// targets (forward proxy) are used as-is; origin-form targets resolve against
/// the configured origin.
async fn intercept(origin: &Url, req: Request<Incoming>) -> Result<InterceptedRequest, String> {
    let (parts, body) = req.into_parts();
    let url = target_url(origin, &parts.uri)?;
    let body = body
        .collect()
        .await
        .map_err(|e| format!("Failed to read body: {e}"))?
        .to_bytes();
    Ok(InterceptedRequest::new(parts.method, url, parts.headers, body))
}

pub(crate) fn target_url(origin: &Url, uri: &Uri) -> Result<Url, String> {
    if uri.scheme().is_some() && uri.authority().is_some() {
        return Url::parse(&uri.to_string()).map_err(|e| format!("Invalid request target: {e}"));
    }
    // Origin-form targets always stay on the origin, even when the path
    // starts with "//" and would otherwise parse as a scheme-relative URL.
    let mut url = origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());
    Ok(url)
}

/// Build the outgoing response for a served record
fn to_response(served: Served) -> Response<Full<Bytes>> {
    record_response(served.record)
}

pub(crate) fn record_response(record: ResponseRecord) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(record.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::new(Full::new(record.body.clone()));
    *response.status_mut() = status;

    let headers = response.headers_mut();
    for (name, value) in record.headers() {
        if is_hop_by_hop(name) {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            headers.append(name, value);
        }
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SOURCE_HEADER;

    #[test]
    fn test_target_url_origin_form() {
        let origin = Url::parse("http://localhost:3000").unwrap();
        let uri: Uri = "/api/leads?page=2".parse().unwrap();
        assert_eq!(
            target_url(&origin, &uri).unwrap().as_str(),
            "http://localhost:3000/api/leads?page=2"
        );
    }

    #[test]
    fn test_target_url_double_slash_stays_on_origin() {
        let origin = Url::parse("http://localhost:3000").unwrap();
        let uri: Uri = "//evil.example/steal?x=1".parse().unwrap();
        let url = target_url(&origin, &uri).unwrap();
        assert_eq!(url.host_str(), Some("localhost"));
        assert_eq!(url.port(), Some(3000));
        assert_eq!(url.path(), "//evil.example/steal");
        assert_eq!(url.query(), Some("x=1"));
    }

    #[test]
    fn test_record_response_keeps_repeated_headers() {
        let mut record = ResponseRecord::new(200);
        record.append_header("set-cookie", "session=abc; Path=/");
        record.append_header("set-cookie", "csrf=xyz; Path=/");
        let response = record_response(record);

        let cookies: Vec<_> = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .map(|v| v.to_str().unwrap())
            .collect();
        assert_eq!(cookies, vec!["session=abc; Path=/", "csrf=xyz; Path=/"]);
    }

    #[test]
    fn test_target_url_absolute_form() {
        let origin = Url::parse("http://localhost:3000").unwrap();
        let uri: Uri = "https://fonts.gstatic.com/s/inter.woff2".parse().unwrap();
        assert_eq!(
            target_url(&origin, &uri).unwrap().as_str(),
            "https://fonts.gstatic.com/s/inter.woff2"
        );
    }

    #[test]
    fn test_record_response_drops_hop_by_hop() {
        let record = ResponseRecord::new(404)
            .with_header("content-type", "text/plain")
            .with_header("transfer-encoding", "chunked")
            .with_header(SOURCE_HEADER, "network")
            .with_body("nope");
        let response = record_response(record);

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()["content-type"], "text/plain");
        assert_eq!(response.headers()[SOURCE_HEADER], "network");
        assert!(response.headers().get("transfer-encoding").is_none());
    }
}
