//! Agent configuration.
//!
//! The cache generation identifier and the asset manifest are explicit values
//! injected into the agent at construction. Bump `generation` whenever any
//! manifest asset changes, otherwise clients keep the old snapshot.
//!
//! Configuration is stored at `~/.config/alerte-calendrier/config.json`;
//! a missing file means defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "alerte-calendrier";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Current cache generation
const DEFAULT_GENERATION: &str = "alerte-calendrier-v1";

/// Application shell assets cached at install time
const DEFAULT_MANIFEST: [&str; 5] = [
    "/",
    "/index.html",
    "/manifest.json",
    "/icon-192.png",
    "/icon-512.png",
];

const DEFAULT_FALLBACK_PATH: &str = "/index.html";

const DEFAULT_ORIGIN: &str = "http://localhost:8080";

const DEFAULT_ICON: &str = "/icon-192.png";

/// Vibration pattern in milliseconds: buzz, pause, buzz, pause, buzz
const DEFAULT_VIBRATE: [u32; 5] = [200, 100, 200, 100, 200];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationStyle {
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub dismiss_action: String,
    pub dismiss_title: String,
}

impl Default for NotificationStyle {
    fn default() -> Self {
        Self {
            icon: DEFAULT_ICON.to_string(),
            badge: DEFAULT_ICON.to_string(),
            vibrate: DEFAULT_VIBRATE.to_vec(),
            dismiss_action: "dismiss".to_string(),
            dismiss_title: "OK".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Name of the cache generation this build owns.
    pub generation: String,
    /// Paths that must be cached before the generation can activate.
    pub manifest: Vec<String>,
    /// Cached page served to navigations when the network is down.
    pub fallback_path: String,
    /// Origin relative manifest paths are fetched from.
    pub origin: String,
    /// Substring identifying application windows.
    pub app_identifier: String,
    /// Where a notification click opens a new window.
    pub root_path: String,
    /// Treat non-2xx network responses as network failures when resolving.
    pub treat_error_status_as_failure: bool,
    pub notification: NotificationStyle,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            generation: DEFAULT_GENERATION.to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(|p| p.to_string()).collect(),
            fallback_path: DEFAULT_FALLBACK_PATH.to_string(),
            origin: DEFAULT_ORIGIN.to_string(),
            app_identifier: APP_NAME.to_string(),
            root_path: "/".to_string(),
            treat_error_status_as_failure: false,
            notification: NotificationStyle::default(),
        }
    }
}

impl AgentConfig {
    /// Load from the default location, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Root of the on-disk cache storage.
    pub fn cache_dir() -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn validate(&self) -> Result<()> {
        if self.generation.trim().is_empty() {
            bail!("Cache generation identifier must not be empty");
        }
        reqwest::Url::parse(&self.origin)
            .with_context(|| format!("Invalid application origin: {}", self.origin))?;
        if self.manifest.is_empty() {
            bail!("Cache manifest must list at least one asset");
        }
        // The host cache rejects a batch that adds the same request twice
        let mut seen = HashSet::new();
        for path in &self.manifest {
            if !seen.insert(path.as_str()) {
                bail!("Cache manifest lists {} more than once", path);
            }
        }
        if !seen.contains(self.fallback_path.as_str()) {
            bail!(
                "Offline fallback page {} must be part of the cache manifest",
                self.fallback_path
            );
        }
        Ok(())
    }
}
