//! Router endpoints under `/__vestibule/`
//!
//! | Method | Path                 | Action                                   |
//! |--------|----------------------|------------------------------------------|
//! | POST   | message              | control message (SKIP_WAITING, ...)      |
//! | POST   | online               | connectivity restored: flush, retry boot |
//! | POST   | sync                 | background sync: flush the queue         |
//! | POST   | push                 | push payload -> notification             |
//! | POST   | notification-click   | `{action}` -> click outcome              |
//! | GET    | status               | lifecycle, connectivity, queue, counters |

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Method, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{bad_request, json_response, not_found};
use crate::control::ControlMessage;
use crate::push::{ClickOutcome, Notification, NotificationClick};
use crate::queue::FlushReport;
use crate::server::AppState;

/// Sync tag used by pages registering a form background sync
pub const FORM_SYNC_TAG: &str = "background-sync-form";

#[derive(Debug, Default, Deserialize)]
struct SyncRequest {
    #[serde(default)]
    tag: Option<String>,
}

#[derive(Debug, Serialize)]
struct SyncResponse {
    tag: String,
    #[serde(flatten)]
    report: FlushReport,
}

pub async fn handle_control(
    state: &AppState,
    method: &Method,
    endpoint: &str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let router = &state.router;

    match (method, endpoint) {
        (&Method::POST, "message") => match serde_json::from_slice::<ControlMessage>(&body) {
            Ok(message) => {
                debug!(message = ?message, "Control message");
                json_response(StatusCode::OK, &router.handle_message(message).await)
            }
            Err(e) => bad_request(&format!("Invalid control message: {e}")),
        },

        (&Method::POST, "online") => {
            let report = router.handle_online().await;
            json_response(StatusCode::OK, &report)
        }

        (&Method::POST, "sync") => {
            let request: SyncRequest = if body.is_empty() {
                SyncRequest::default()
            } else {
                match serde_json::from_slice(&body) {
                    Ok(request) => request,
                    Err(e) => return bad_request(&format!("Invalid sync request: {e}")),
                }
            };
            let tag = request.tag.unwrap_or_else(|| FORM_SYNC_TAG.to_string());
            info!(tag = %tag, "Background sync");
            let report = router.flush_deferred().await;
            json_response(StatusCode::OK, &SyncResponse { tag, report })
        }

        (&Method::POST, "push") => {
            let payload = String::from_utf8_lossy(&body);
            let notification =
                Notification::from_payload(Some(&*payload), &router.config().push, router.now_ms());
            json_response(StatusCode::OK, &notification)
        }

        (&Method::POST, "notification-click") => {
            let click: NotificationClick = serde_json::from_slice(&body).unwrap_or_default();
            let outcome = ClickOutcome::for_action(&click.action, &router.config().push);
            debug!(action = %click.action, outcome = ?outcome, "Notification click");
            json_response(StatusCode::OK, &outcome)
        }

        (&Method::GET, "status") => json_response(StatusCode::OK, &router.status().await),

        _ => not_found(&format!("/__vestibule/{endpoint}")),
    }
}
