//! Deferred local notifications.
//!
//! Timers live in memory only: if the process exits before a timer fires,
//! the notification is lost and nothing re-arms it on restart.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::NotificationStyle;
use crate::error::HostError;
use crate::message::ScheduleRequest;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
#[serde(rename_all = "camelCase")]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    /// Notifications with the same tag replace each other.
    pub tag: String,
    /// Stay visible until the user dismisses it.
    pub require_interaction: bool,
    pub vibrate: Vec<u32>,
    pub actions: Vec<NotificationAction>,
}

impl NotificationOptions {
    pub fn for_request(request: &ScheduleRequest, style: &NotificationStyle) -> Self {
        Self {
            body: request.body.clone(),
            icon: style.icon.clone(),
            badge: style.badge.clone(),
            tag: request.event_id.clone(),
            require_interaction: true,
            vibrate: style.vibrate.clone(),
            actions: vec![NotificationAction {
                action: style.dismiss_action.clone(),
                title: style.dismiss_title.clone(),
            }],
        }
    }
}

/// Host side of notifications.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Display a notification. Showing a tag that is already visible
    /// replaces it.
    async fn show(&self, title: &str, options: &NotificationOptions) -> Result<(), HostError>;

    async fn close(&self, tag: &str) -> Result<(), HostError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledNotification {
    pub tag: String,
    pub fires_at: DateTime<Utc>,
    /// A pending notification with the same tag was cancelled.
    pub replaced: bool,
}

struct PendingTimer {
    id: u64,
    handle: JoinHandle<()>,
}

/// One-shot notification timers keyed by tag.
/// Clone is cheap and clones share the pending timers.
#[derive(Clone)]
pub struct NotificationScheduler {
    notifier: Arc<dyn Notifier>,
    style: NotificationStyle,
    pending: Arc<Mutex<HashMap<String, PendingTimer>>>,
    next_id: Arc<AtomicU64>,
}

impl NotificationScheduler {
    pub fn new(notifier: Arc<dyn Notifier>, style: NotificationStyle) -> Self {
        Self {
            notifier,
            style,
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock(
        pending: &Mutex<HashMap<String, PendingTimer>>,
    ) -> MutexGuard<'_, HashMap<String, PendingTimer>> {
        pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Arm a timer for the request, replacing any pending timer with the same
    /// tag. A tag stays pending until its notification has been handed to
    /// the notifier. Must be called from within a Tokio runtime.
    pub fn schedule(&self, request: ScheduleRequest) -> ScheduledNotification {
        let delay = request.delay_duration();
        let options = NotificationOptions::for_request(&request, &self.style);
        let tag = request.event_id;
        let title = request.title;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let fires_at = fire_time(Utc::now(), delay);

        // Held across spawn + insert so a zero-delay timer cannot deregister
        // before it is registered.
        let mut pending = Self::lock(&self.pending);

        let notifier = Arc::clone(&self.notifier);
        let timers = Arc::clone(&self.pending);
        let task_tag = tag.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match notifier.show(&title, &options).await {
                Ok(()) => info!(tag = %task_tag, "Notification shown"),
                Err(e) => warn!(tag = %task_tag, error = %e, "Failed to show notification"),
            }
            // A replacement armed meanwhile owns the slot now
            let mut timers = Self::lock(&timers);
            if timers.get(&task_tag).map(|t| t.id) == Some(id) {
                timers.remove(&task_tag);
            }
        });

        let replaced = match pending.insert(tag.clone(), PendingTimer { id, handle }) {
            Some(previous) => {
                previous.handle.abort();
                debug!(tag = %tag, "Replaced pending notification");
                true
            }
            None => false,
        };

        info!(tag = %tag, delay_ms = delay.as_millis() as u64, "Notification scheduled");
        ScheduledNotification {
            tag,
            fires_at,
            replaced,
        }
    }

    /// Cancel a pending notification. Returns whether one was pending.
    pub fn cancel(&self, tag: &str) -> bool {
        match Self::lock(&self.pending).remove(tag) {
            Some(timer) => {
                timer.handle.abort();
                debug!(tag, "Cancelled pending notification");
                true
            }
            None => false,
        }
    }

    pub fn pending_tags(&self) -> Vec<String> {
        let mut tags: Vec<String> = Self::lock(&self.pending).keys().cloned().collect();
        tags.sort();
        tags
    }
}

/// When a timer armed at `now` fires, saturating at the latest
/// representable instant for delays beyond the calendar's range.
fn fire_time(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
