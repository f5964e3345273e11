//! Host-facing event handlers.
//!
//! The host delivers one event at a time per agent instance and may tear an
//! idle instance down between events. Every handler here is an `async fn`
//! whose future resolves only once all the work it started has settled,
//! including the host effects it triggers. Hosts must drive that future to
//! completion before discarding the instance; otherwise cache writes or
//! deletions can be cut short.
//!
//! The one exception is a scheduled notification: its timer is detached from
//! the message event and dies with the process.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, warn};

use crate::clients::{route_click, ClickOutcome, Clients, NotificationClick};
use crate::config::AgentConfig;
use crate::error::{AgentError, HostError, NetworkError};
use crate::fetch::Fetcher;
use crate::manager::{ActivationReport, InstallReport, OfflineCacheManager};
use crate::message::ClientMessage;
use crate::notifications::{NotificationScheduler, Notifier, ScheduledNotification};
use crate::request::{Request, Resolved};
use crate::storage::CacheStorage;
use crate::sync::{handle_periodic_sync, SyncOutcome};

/// Host lifecycle effects.
#[async_trait]
pub trait Lifecycle: Send + Sync {
    /// Let a freshly installed agent activate without waiting for windows
    /// controlled by the previous one to close.
    async fn skip_waiting(&self) -> Result<(), HostError>;
}

/// Everything the host provides besides storage and network.
#[derive(Clone)]
pub struct AgentHost {
    pub lifecycle: Arc<dyn Lifecycle>,
    pub clients: Arc<dyn Clients>,
    pub notifier: Arc<dyn Notifier>,
}

#[derive(Debug, Clone)]
pub enum AgentEvent {
    Install,
    Activate,
    Fetch(Request),
    Message(Value),
    NotificationClick(NotificationClick),
    PeriodicSync(String),
}

#[derive(Debug)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivationReport),
    Responded(Resolved),
    Scheduled(ScheduledNotification),
    /// The message was not one the agent understands.
    Ignored,
    ClickRouted(ClickOutcome),
    Synced(SyncOutcome),
}

#[derive(Clone)]
pub struct Agent {
    config: AgentConfig,
    cache: OfflineCacheManager,
    scheduler: NotificationScheduler,
    host: AgentHost,
}

impl Agent {
    /// Fails when the configured origin is not an absolute URL.
    pub fn new(
        config: AgentConfig,
        storage: Arc<dyn CacheStorage>,
        fetcher: Arc<dyn Fetcher>,
        host: AgentHost,
    ) -> Result<Self, NetworkError> {
        let cache = OfflineCacheManager::new(&config, storage, fetcher)?;
        let scheduler =
            NotificationScheduler::new(Arc::clone(&host.notifier), config.notification.clone());
        Ok(Self {
            config,
            cache,
            scheduler,
            host,
        })
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn cache(&self) -> &OfflineCacheManager {
        &self.cache
    }

    pub fn scheduler(&self) -> &NotificationScheduler {
        &self.scheduler
    }

    /// Route an event to its handler.
    pub async fn dispatch(&self, event: AgentEvent) -> Result<EventOutcome, AgentError> {
        match event {
            AgentEvent::Install => self.on_install().await.map(EventOutcome::Installed),
            AgentEvent::Activate => self.on_activate().await.map(EventOutcome::Activated),
            AgentEvent::Fetch(request) => {
                self.on_fetch(&request).await.map(EventOutcome::Responded)
            }
            AgentEvent::Message(data) => Ok(match self.on_message(&data) {
                Some(scheduled) => EventOutcome::Scheduled(scheduled),
                None => EventOutcome::Ignored,
            }),
            AgentEvent::NotificationClick(click) => self
                .on_notification_click(&click)
                .await
                .map(EventOutcome::ClickRouted),
            AgentEvent::PeriodicSync(tag) => {
                Ok(EventOutcome::Synced(self.on_periodic_sync(&tag).await))
            }
        }
    }

    /// Populate the cache generation, then ask the host to skip waiting.
    /// A failed install leaves the previous generation in charge.
    pub async fn on_install(&self) -> Result<InstallReport, AgentError> {
        info!(generation = %self.cache.generation(), "Install event");
        let report = self.cache.install().await?;
        self.host.lifecycle.skip_waiting().await?;
        Ok(report)
    }

    /// Drop superseded generations, then claim open windows.
    pub async fn on_activate(&self) -> Result<ActivationReport, AgentError> {
        info!(generation = %self.cache.generation(), "Activate event");
        let report = self.cache.activate().await?;
        self.host.clients.claim().await?;
        Ok(report)
    }

    pub async fn on_fetch(&self, request: &Request) -> Result<Resolved, AgentError> {
        Ok(self.cache.resolve(request).await?)
    }

    /// Handle a posted message. Returns the scheduled notification, or `None`
    /// when the message was ignored. Must be called within a Tokio runtime.
    pub fn on_message(&self, data: &Value) -> Option<ScheduledNotification> {
        match ClientMessage::parse(data) {
            ClientMessage::ScheduleNotification(request) => {
                Some(self.scheduler.schedule(request))
            }
            ClientMessage::Unknown => None,
        }
    }

    /// Close the clicked notification and bring the application forward.
    pub async fn on_notification_click(
        &self,
        click: &NotificationClick,
    ) -> Result<ClickOutcome, AgentError> {
        info!(tag = %click.tag, action = ?click.action, "Notification clicked");
        if let Err(e) = self.host.notifier.close(&click.tag).await {
            warn!(tag = %click.tag, error = %e, "Failed to close notification");
        }
        Ok(route_click(
            self.host.clients.as_ref(),
            &self.config.app_identifier,
            &self.config.root_path,
        )
        .await?)
    }

    pub async fn on_periodic_sync(&self, tag: &str) -> SyncOutcome {
        handle_periodic_sync(tag).await
    }
}
