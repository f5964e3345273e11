//! Messages posted by application windows to the agent.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Request to show a notification after a delay.
///
/// Wire form:
/// `{"type": "SCHEDULE_NOTIFICATION", "title": ..., "body": ..., "delay": ms, "eventId": ...}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
    /// Milliseconds before the notification fires.
    #[serde(default)]
    #[cfg_attr(feature = "ts", ts(type = "number"))]
    pub delay: i64,
    /// Calendar event id, used as the notification tag so rescheduling the
    /// same event replaces the pending notification.
    pub event_id: String,
}

impl ScheduleRequest {
    /// Negative delays fire immediately.
    pub fn delay_duration(&self) -> Duration {
        Duration::from_millis(self.delay.max(0) as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    ScheduleNotification(ScheduleRequest),
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// Interpret posted message data. Anything that is not a well-formed,
    /// known message is `Unknown`; malformed messages are never errors.
    pub fn parse(data: &Value) -> Self {
        if !data.is_object() {
            debug!("Ignoring non-object client message");
            return ClientMessage::Unknown;
        }
        match serde_json::from_value(data.clone()) {
            Ok(message) => message,
            Err(e) => {
                debug!(error = %e, "Ignoring malformed client message");
                ClientMessage::Unknown
            }
        }
    }
}
