//! Application windows and notification-click routing.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::HostError;

/// An open application window as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowClient {
    pub id: String,
    pub url: String,
    /// Whether the host can bring this window to the foreground.
    pub focusable: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientQuery {
    /// Also report windows not controlled by this agent.
    pub include_uncontrolled: bool,
}

/// Host side of window management.
#[async_trait]
pub trait Clients: Send + Sync {
    async fn match_all(&self, query: ClientQuery) -> Result<Vec<WindowClient>, HostError>;

    async fn focus(&self, id: &str) -> Result<(), HostError>;

    /// Some hosts cannot open windows at all.
    fn can_open_windows(&self) -> bool;

    async fn open_window(&self, url: &str) -> Result<(), HostError>;

    /// Take control of already-open windows immediately ("claim clients").
    async fn claim(&self) -> Result<(), HostError>;
}

/// A click on a notification shown by the agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationClick {
    pub tag: String,
    /// Action button that was clicked, if any.
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    /// An existing application window was focused.
    Focused(String),
    /// A new window was opened at this URL.
    Opened(String),
    /// No application window and the host cannot open one.
    NoWindow,
}

/// Bring the application to the foreground: focus the first focusable window
/// whose URL contains `app_identifier`, otherwise open one at `root_path`.
pub async fn route_click(
    clients: &dyn Clients,
    app_identifier: &str,
    root_path: &str,
) -> Result<ClickOutcome, HostError> {
    let windows = clients
        .match_all(ClientQuery {
            include_uncontrolled: true,
        })
        .await?;
    debug!(windows = windows.len(), "Routing notification click");

    if let Some(window) = windows
        .iter()
        .find(|w| w.focusable && w.url.contains(app_identifier))
    {
        clients.focus(&window.id).await?;
        info!(client = %window.id, url = %window.url, "Focused application window");
        return Ok(ClickOutcome::Focused(window.id.clone()));
    }

    if clients.can_open_windows() {
        clients.open_window(root_path).await?;
        info!(url = %root_path, "Opened application window");
        return Ok(ClickOutcome::Opened(root_path.to_string()));
    }

    Ok(ClickOutcome::NoWindow)
}
