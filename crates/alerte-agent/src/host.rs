//! Console implementation of the host seams.
//!
//! There are no real windows or notification centre here: notifications are
//! printed, and windows are whatever URLs the user passed on the command line.

use async_trait::async_trait;
use tracing::info;

use alerte_core::{
    ClientQuery, Clients, HostError, Lifecycle, NotificationOptions, Notifier, WindowClient,
};

#[derive(Debug, Clone, Default)]
pub struct ConsoleHost {
    windows: Vec<WindowClient>,
}

impl ConsoleHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend these URLs are open application windows.
    pub fn with_windows(urls: &[String]) -> Self {
        let windows = urls
            .iter()
            .enumerate()
            .map(|(i, url)| WindowClient {
                id: format!("window-{}", i + 1),
                url: url.clone(),
                focusable: true,
            })
            .collect();
        Self { windows }
    }
}

#[async_trait]
impl Lifecycle for ConsoleHost {
    async fn skip_waiting(&self) -> Result<(), HostError> {
        info!("New generation will take over without waiting");
        Ok(())
    }
}

#[async_trait]
impl Clients for ConsoleHost {
    async fn match_all(&self, _query: ClientQuery) -> Result<Vec<WindowClient>, HostError> {
        Ok(self.windows.clone())
    }

    async fn focus(&self, id: &str) -> Result<(), HostError> {
        let window = self
            .windows
            .iter()
            .find(|w| w.id == id)
            .ok_or_else(|| HostError::UnknownClient(id.to_string()))?;
        println!("Focus {} ({})", window.id, window.url);
        Ok(())
    }

    fn can_open_windows(&self) -> bool {
        true
    }

    async fn open_window(&self, url: &str) -> Result<(), HostError> {
        println!("Open new window at {}", url);
        Ok(())
    }

    async fn claim(&self) -> Result<(), HostError> {
        info!(windows = self.windows.len(), "Claimed open windows");
        Ok(())
    }
}

#[async_trait]
impl Notifier for ConsoleHost {
    async fn show(&self, title: &str, options: &NotificationOptions) -> Result<(), HostError> {
        println!("[{}] {}", options.tag, title);
        if !options.body.is_empty() {
            println!("    {}", options.body);
        }
        let actions: Vec<&str> = options.actions.iter().map(|a| a.title.as_str()).collect();
        if !actions.is_empty() {
            println!("    actions: {}", actions.join(", "));
        }
        Ok(())
    }

    async fn close(&self, tag: &str) -> Result<(), HostError> {
        info!(tag, "Notification closed");
        Ok(())
    }
}
