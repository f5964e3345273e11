//! Alerte Calendrier agent - a console host for the background agent.
//!
//! Drives the same handlers a browser host would (install, activate, fetch,
//! message, notification click, periodic sync) against an on-disk cache and
//! the application origin from the configuration.

mod host;

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use alerte_core::{
    Agent, AgentConfig, AgentEvent, AgentHost, CacheStorage, DiskStorage, EventOutcome, Fetcher,
    HttpFetcher, NotificationClick, OfflineFetcher, Request, CHECK_CALENDAR_TAG,
};

use host::ConsoleHost;

// ============================================================================
// Constants
// ============================================================================

/// How often `notify` checks whether its timer has fired (in milliseconds)
const PENDING_POLL_INTERVAL_MS: u64 = 100;

/// Log file name prefix inside `--log-dir`
const LOG_FILE_PREFIX: &str = "alerte-agent.log";

#[derive(Parser)]
#[command(
    name = "alerte-agent",
    version,
    about = "Offline cache and reminder agent for Alerte Calendrier"
)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cache storage directory (defaults to the user cache directory)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Also write logs to daily files in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the manifest and store it as the current generation
    Install,
    /// Delete every generation except the current one
    Activate,
    /// Answer a request the way the agent would
    Resolve {
        url: String,
        /// Treat the request as a top-level page load
        #[arg(long)]
        navigate: bool,
        /// Pretend the network is down
        #[arg(long)]
        offline: bool,
        /// Write the response body to stdout
        #[arg(long)]
        body: bool,
    },
    /// List stored generations and their entries
    Generations,
    /// Schedule a notification and wait for it to fire
    Notify {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        body: String,
        /// Delay in milliseconds
        #[arg(long, default_value_t = 0)]
        delay: i64,
        #[arg(long)]
        event_id: String,
    },
    /// Simulate a click on a notification
    Click {
        #[arg(long, default_value = "alerte")]
        tag: String,
        /// URL of an open window (repeatable)
        #[arg(long = "window")]
        windows: Vec<String>,
    },
    /// Fire a periodic sync event
    Sync {
        #[arg(long, default_value = CHECK_CALENDAR_TAG)]
        tag: String,
    },
    /// Write the default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Initialize the tracing subscriber for logging.
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _log_guard = init_tracing(cli.log_dir.as_deref());

    let config_path = match cli.config.clone() {
        Some(path) => path,
        None => AgentConfig::config_path()?,
    };

    let cache_dir = match cli.cache_dir.clone() {
        Some(dir) => dir,
        None => AgentConfig::cache_dir()?,
    };
    // init-config must work even when the existing file is invalid
    let load_config = || -> Result<AgentConfig> {
        let config = AgentConfig::load_from(&config_path)?;
        info!(generation = %config.generation, cache = %cache_dir.display(), "Alerte agent starting");
        Ok(config)
    };

    match cli.command {
        Command::Install => {
            let agent = build_agent(load_config()?, &cache_dir, false, ConsoleHost::new())?;
            let report = agent.on_install().await?;
            println!(
                "Installed {} ({} entries)",
                report.generation, report.stored
            );
        }
        Command::Activate => {
            let agent = build_agent(load_config()?, &cache_dir, false, ConsoleHost::new())?;
            let report = agent.on_activate().await?;
            println!("Current generation: {}", report.current);
            for name in &report.deleted {
                println!("Deleted {}", name);
            }
            for failure in &report.failures {
                eprintln!("Warning: {}", failure);
            }
        }
        Command::Resolve {
            url,
            navigate,
            offline,
            body,
        } => {
            let agent = build_agent(load_config()?, &cache_dir, offline, ConsoleHost::new())?;
            let request = if navigate {
                Request::navigate(url.as_str())
            } else {
                Request::get(url.as_str())
            };
            let resolved = agent.on_fetch(&request).await?;
            if body {
                io::stdout().write_all(&resolved.response.body)?;
            } else {
                println!(
                    "{} {} ({} bytes) from {}",
                    resolved.response.status,
                    url,
                    resolved.response.body.len(),
                    resolved.source
                );
            }
        }
        Command::Generations => list_generations(&load_config()?, &cache_dir).await?,
        Command::Notify {
            title,
            body,
            delay,
            event_id,
        } => {
            let agent = build_agent(load_config()?, &cache_dir, true, ConsoleHost::new())?;
            let message = json!({
                "type": "SCHEDULE_NOTIFICATION",
                "title": title,
                "body": body,
                "delay": delay,
                "eventId": event_id,
            });
            match agent.dispatch(AgentEvent::Message(message)).await? {
                EventOutcome::Scheduled(scheduled) => {
                    eprintln!("Notification {} due at {}", scheduled.tag, scheduled.fires_at);
                }
                _ => bail!("Notification request was not accepted"),
            }
            // Timers die with the process, so stay alive until it fires
            while !agent.scheduler().pending_tags().is_empty() {
                tokio::time::sleep(Duration::from_millis(PENDING_POLL_INTERVAL_MS)).await;
            }
        }
        Command::Click { tag, windows } => {
            let agent = build_agent(
                load_config()?,
                &cache_dir,
                true,
                ConsoleHost::with_windows(&windows),
            )?;
            let click = NotificationClick { tag, action: None };
            agent.on_notification_click(&click).await?;
        }
        Command::Sync { tag } => {
            let agent = build_agent(load_config()?, &cache_dir, true, ConsoleHost::new())?;
            let outcome = agent.on_periodic_sync(&tag).await;
            println!("Periodic sync {}: {:?}", tag, outcome);
        }
        Command::InitConfig { force } => init_config(&config_path, force)?,
    }

    Ok(())
}

fn build_agent(
    config: AgentConfig,
    cache_dir: &Path,
    offline: bool,
    console: ConsoleHost,
) -> Result<Agent> {
    let storage: Arc<dyn CacheStorage> = Arc::new(DiskStorage::new(cache_dir));
    let fetcher: Arc<dyn Fetcher> = if offline {
        Arc::new(OfflineFetcher)
    } else {
        Arc::new(
            HttpFetcher::new(&config.origin)
                .with_context(|| format!("Invalid origin in config: {}", config.origin))?,
        )
    };
    let console = Arc::new(console);
    let host = AgentHost {
        lifecycle: console.clone(),
        clients: console.clone(),
        notifier: console,
    };
    let origin = config.origin.clone();
    Agent::new(config, storage, fetcher, host)
        .with_context(|| format!("Invalid origin in config: {}", origin))
}

async fn list_generations(config: &AgentConfig, cache_dir: &Path) -> Result<()> {
    let storage = DiskStorage::new(cache_dir);
    let generations = storage.generations().await?;
    if generations.is_empty() {
        println!("No cache generations in {}", cache_dir.display());
        return Ok(());
    }

    for generation in generations {
        let marker = if generation == config.generation { "*" } else { " " };
        println!("{} {}", marker, generation);
        for key in storage.keys(&generation).await? {
            match storage.lookup(&generation, &key).await? {
                Some(entry) => println!(
                    "    {:<24} {} {:>8} bytes  {}",
                    key.url,
                    entry.response.status,
                    entry.response.body.len(),
                    entry.age_display()
                ),
                None => println!("    {:<24} (incomplete)", key.url),
            }
        }
    }
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!(
            "Config file {} already exists (use --force to overwrite)",
            path.display()
        );
    }
    AgentConfig::default().save_to(path)?;
    println!("Wrote default configuration to {}", path.display());
    Ok(())
}
