use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const ACTION_VIEW: &str = "view";
pub const ACTION_DISMISS: &str = "dismiss";

/// Tag shared by every notification the worker presents.
pub const NOTIFICATION_TAG: &str = "fincache-notification";

/// Vibration pattern in milliseconds (vibrate, pause, vibrate).
pub const VIBRATE_PATTERN: [u32; 3] = [100, 50, 100];

/// Body used when a push arrives without text.
pub const DEFAULT_PUSH_BODY: &str = "New update available";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// A notification as handed to the platform presenter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub vibrate: Vec<u32>,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
    pub date_of_arrival: DateTime<Utc>,
}

impl Notification {
    /// Build the push notification for a plain-text payload.
    pub fn for_push(title: &str, payload: &str, icon: &str, badge: &str) -> Self {
        let body = if payload.trim().is_empty() {
            DEFAULT_PUSH_BODY.to_string()
        } else {
            payload.to_string()
        };

        Self {
            title: title.to_string(),
            body,
            icon: icon.to_string(),
            badge: badge.to_string(),
            tag: NOTIFICATION_TAG.to_string(),
            vibrate: VIBRATE_PATTERN.to_vec(),
            require_interaction: true,
            actions: vec![
                NotificationAction {
                    action: ACTION_VIEW.to_string(),
                    title: "View Details".to_string(),
                },
                NotificationAction {
                    action: ACTION_DISMISS.to_string(),
                    title: "Dismiss".to_string(),
                },
            ],
            date_of_arrival: Utc::now(),
        }
    }
}
