//! Periodic background sync hook.
//!
//! Only the `check-calendar` tag is recognised, and checking the calendar
//! currently amounts to a log line. Hosts without periodic sync never call
//! this.

use tracing::{debug, info};

pub const CHECK_CALENDAR_TAG: &str = "check-calendar";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Checked,
    Ignored,
}

pub async fn handle_periodic_sync(tag: &str) -> SyncOutcome {
    if tag != CHECK_CALENDAR_TAG {
        debug!(tag, "Ignoring periodic sync");
        return SyncOutcome::Ignored;
    }
    info!("Periodic sync - checking calendar");
    check_calendar_events().await;
    SyncOutcome::Checked
}

/// Extension point for background reminder refresh. Reminders are armed by
/// the page through `SCHEDULE_NOTIFICATION` messages, so this only records
/// that the host woke the agent.
async fn check_calendar_events() {
    info!("Checking calendar events");
}
