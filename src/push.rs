//! Push notification boundary
//!
//! Turns an incoming push payload into a notification description and maps a
//! notification click to what the page should do. No caching is involved; the
//! only requirement is that every payload and every click is handled.

use serde::{Deserialize, Serialize};

/// Action id that opens the configured URL
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that dismisses the notification
pub const ACTION_CLOSE: &str = "close";

/// Static notification settings
#[derive(Debug, Clone)]
pub struct PushConfig {
    pub title: String,
    pub default_body: String,
    pub icon: String,
    pub badge: String,
    /// Opened by the explore action
    pub explore_url: String,
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            title: "Vestibule".to_string(),
            default_body: "New update available".to_string(),
            icon: "/assets/logo.png".to_string(),
            badge: "/assets/badge-icon.png".to_string(),
            explore_url: "http://localhost:3000/".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    pub date_of_arrival: i64,
    pub primary_key: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub data: NotificationData,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Build the notification for a push payload. An empty or missing payload
    /// gets the default body.
    pub fn from_payload(payload: Option<&str>, config: &PushConfig, now_ms: i64) -> Self {
        let body = match payload.map(str::trim) {
            Some(text) if !text.is_empty() => text.to_string(),
            _ => config.default_body.clone(),
        };

        Self {
            title: config.title.clone(),
            body,
            icon: config.icon.clone(),
            badge: config.badge.clone(),
            vibrate: vec![100, 50, 100],
            data: NotificationData {
                date_of_arrival: now_ms,
                primary_key: 1,
            },
            actions: vec![
                NotificationAction {
                    action: ACTION_EXPLORE.to_string(),
                    title: "Explore".to_string(),
                    icon: "/assets/checkmark.png".to_string(),
                },
                NotificationAction {
                    action: ACTION_CLOSE.to_string(),
                    title: "Close".to_string(),
                    icon: "/assets/xmark.png".to_string(),
                },
            ],
        }
    }
}

/// Body of a notification click report
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotificationClick {
    #[serde(default)]
    pub action: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClickOutcome {
    OpenWindow { url: String },
    Dismiss,
}

impl ClickOutcome {
    /// The notification is always closed; only explore opens a window
    pub fn for_action(action: &str, config: &PushConfig) -> Self {
        if action == ACTION_EXPLORE {
            ClickOutcome::OpenWindow {
                url: config.explore_url.clone(),
            }
        } else {
            ClickOutcome::Dismiss
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_becomes_body() {
        let config = PushConfig::default();
        let n = Notification::from_payload(Some("Build finished"), &config, 42);
        assert_eq!(n.body, "Build finished");
        assert_eq!(n.title, config.title);
        assert_eq!(n.vibrate, vec![100, 50, 100]);
        assert_eq!(n.data.date_of_arrival, 42);
        assert_eq!(n.data.primary_key, 1);

        let actions: Vec<_> = n.actions.iter().map(|a| a.action.as_str()).collect();
        assert_eq!(actions, vec!["explore", "close"]);
    }

    #[test]
    fn test_empty_payload_uses_default() {
        let config = PushConfig::default();
        assert_eq!(Notification::from_payload(None, &config, 0).body, config.default_body);
        assert_eq!(Notification::from_payload(Some("  "), &config, 0).body, config.default_body);
    }

    #[test]
    fn test_serialized_shape() {
        let n = Notification::from_payload(Some("hi"), &PushConfig::default(), 7);
        let value = serde_json::to_value(&n).unwrap();
        assert_eq!(value["data"]["dateOfArrival"], 7);
        assert_eq!(value["data"]["primaryKey"], 1);
    }

    #[test]
    fn test_click_outcomes() {
        let config = PushConfig {
            explore_url: "https://example.com/landing".into(),
            ..Default::default()
        };
        assert_eq!(
            ClickOutcome::for_action("explore", &config),
            ClickOutcome::OpenWindow {
                url: "https://example.com/landing".into()
            }
        );
        assert_eq!(ClickOutcome::for_action("close", &config), ClickOutcome::Dismiss);
        assert_eq!(ClickOutcome::for_action("", &config), ClickOutcome::Dismiss);

        let value = serde_json::to_value(ClickOutcome::for_action("explore", &config)).unwrap();
        assert_eq!(value["outcome"], "open_window");
    }
}
