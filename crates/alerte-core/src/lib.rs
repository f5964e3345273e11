//! Core library for the Alerte Calendrier background agent.
//!
//! The agent keeps the application shell available offline, shows deferred
//! reminder notifications on behalf of the page, and routes notification
//! clicks back to an application window.
//!
//! - `manager`: versioned offline cache (install, activate, lookup, resolve)
//! - `storage`: cache generations in memory or on disk
//! - `fetch`: network access for cache misses
//! - `notifications` / `message`: scheduling requested by the page
//! - `clients`: window enumeration and click routing
//! - `agent`: one handler per host event, tying the above together

pub mod agent;
pub mod clients;
pub mod config;
pub mod error;
pub mod fetch;
pub mod format;
pub mod manager;
pub mod message;
pub mod notifications;
pub mod request;
pub mod storage;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use agent::{Agent, AgentEvent, AgentHost, EventOutcome, Lifecycle};
pub use clients::{ClickOutcome, ClientQuery, Clients, NotificationClick, WindowClient};
pub use config::{AgentConfig, NotificationStyle};
pub use error::{
    AgentError, CleanupError, HostError, InstallError, ManifestFetchError, NetworkError,
    ResolveError, StorageError,
};
pub use fetch::{Fetcher, HttpFetcher, OfflineFetcher};
pub use manager::{ActivationReport, InstallReport, OfflineCacheManager};
pub use message::{ClientMessage, ScheduleRequest};
pub use notifications::{
    NotificationAction, NotificationOptions, NotificationScheduler, Notifier,
    ScheduledNotification,
};
pub use request::{CachedEntry, Request, RequestKey, RequestMode, Resolved, Response, ResponseSource};
pub use storage::{CacheStorage, DiskStorage, MemoryStorage};
pub use sync::{SyncOutcome, CHECK_CALENDAR_TAG};
