//! Synthetic last-resort responses
//!
//! Served when neither the network nor a store can answer. Each is
//! self-contained: no further requests are needed to render it.

use serde_json::json;

use crate::cache::ResponseRecord;

/// Error kind carried by the offline JSON envelope
pub const OFFLINE_ERROR: &str = "Offline";

const OFFLINE_MESSAGE: &str = "You are offline. Please try again later.";

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html>
  <head>
    <title>Offline</title>
    <meta charset="utf-8">
    <meta name="viewport" content="width=device-width, initial-scale=1">
    <style>
      body { font-family: system-ui; text-align: center; padding: 50px; background: #0A0A0F; color: white; }
      .offline-container { max-width: 400px; margin: 0 auto; }
      .offline-title { font-size: 24px; margin-bottom: 10px; }
      .offline-message { color: #999; margin-bottom: 30px; }
      .retry-button { background: #8B5CF6; color: white; border: none; padding: 12px 24px; border-radius: 8px; cursor: pointer; }
    </style>
  </head>
  <body>
    <div class="offline-container">
      <h1 class="offline-title">You are offline</h1>
      <p class="offline-message">Check your internet connection and try again.</p>
      <button class="retry-button" onclick="window.location.reload()">Retry</button>
    </div>
  </body>
</html>
"#;

const IMAGE_PLACEHOLDER: &str = r##"<svg width="200" height="200" xmlns="http://www.w3.org/2000/svg"><rect width="200" height="200" fill="#333"/><text x="50%" y="50%" fill="#666" font-family="Arial" font-size="14" text-anchor="middle" dy=".3em">Image unavailable</text></svg>"##;

fn json_record(status: u16, body: serde_json::Value) -> ResponseRecord {
    ResponseRecord::new(status)
        .with_header("content-type", "application/json")
        .with_body(body.to_string())
}

/// Offline page for navigations, with a retry action
pub fn offline_page() -> ResponseRecord {
    ResponseRecord::new(200)
        .with_header("content-type", "text/html; charset=utf-8")
        .with_header("cache-control", "no-store")
        .with_body(OFFLINE_PAGE)
}

/// `{"error":"Offline","message":...}` with status 503, for API requests
pub fn offline_envelope() -> ResponseRecord {
    json_record(
        503,
        json!({
            "error": OFFLINE_ERROR,
            "message": OFFLINE_MESSAGE,
        }),
    )
}

/// Inline SVG placeholder for images
pub fn image_placeholder() -> ResponseRecord {
    ResponseRecord::new(200)
        .with_header("content-type", "image/svg+xml")
        .with_header("cache-control", "no-store")
        .with_body(IMAGE_PLACEHOLDER)
}

/// Acknowledgement for a submission parked in the deferred queue
pub fn queued_ack() -> ResponseRecord {
    json_record(200, json!({ "queued": true }))
}

/// Transport failure for classes with no placeholder (scripts, styles, fonts)
pub fn gateway_failure(reason: &str) -> ResponseRecord {
    json_record(
        502,
        json!({
            "error": "BadGateway",
            "message": reason,
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_envelope() {
        let record = offline_envelope();
        assert_eq!(record.status, 503);
        assert_eq!(record.content_type(), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(&record.body).unwrap();
        assert_eq!(body["error"], "Offline");
        assert!(body["message"].as_str().unwrap().contains("offline"));
    }

    #[test]
    fn test_offline_page_has_retry() {
        let record = offline_page();
        let html = std::str::from_utf8(&record.body).unwrap();
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("window.location.reload()"));
    }

    #[test]
    fn test_placeholder_is_svg() {
        let record = image_placeholder();
        assert_eq!(record.content_type(), Some("image/svg+xml"));
        assert!(record.body.starts_with(b"<svg"));
    }

    #[test]
    fn test_queued_ack() {
        let body: serde_json::Value = serde_json::from_slice(&queued_ack().body).unwrap();
        assert_eq!(body, json!({ "queued": true }));
    }
}
