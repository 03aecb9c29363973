//! vigil - offline queue and delivery tooling for proctoring sessions
//!
//! Operator CLI for the detection event pipeline: inspect the durable
//! offline queue, push it to the ingestion server, and clear entries that
//! exhausted their retry budget.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Queue database: $XDG_DATA_HOME/vigil/queue.db (~/.local/share/vigil/queue.db)
//! - Logs: $XDG_STATE_HOME/vigil/vigil.log (~/.local/state/vigil/vigil.log)
//! - Config: $XDG_CONFIG_HOME/vigil/config.toml (~/.config/vigil/config.toml)

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use vigil_core::offline::{load_queue, save_queue, status_of, OfflineQueue, SqliteStore};
use vigil_core::{ApiClient, Config, StaticToken};

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Inspect and sync the proctoring event queue")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show offline queue status
    Status,
    /// Sync queued events to the ingestion server
    Sync,
    /// Remove entries that exhausted their retry budget
    ClearFailed,
    /// Show resolved configuration and file locations
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        vigil_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("vigil CLI starting");

    match args.command {
        Command::Status => status(&config),
        Command::Sync => sync(&config).await,
        Command::ClearFailed => clear_failed(&config),
        Command::Config => show_config(&config),
    }
}

fn open_store() -> Result<SqliteStore> {
    let path = Config::queue_db_path();
    SqliteStore::open(&path)
        .with_context(|| format!("failed to open queue database at {}", path.display()))
}

fn status(config: &Config) -> Result<()> {
    let store = open_store()?;
    let queue = load_queue(&store);
    let status = status_of(&queue, config.offline.retry_attempts);

    println!("Queue: {}", Config::queue_db_path().display());
    println!("  total:   {}", status.total);
    println!("  pending: {}", status.pending);
    println!("  failed:  {}", status.failed);
    if let Some(oldest) = status.oldest {
        println!("  oldest:  {}", oldest.to_rfc3339());
    }
    if let Some(newest) = status.newest {
        println!("  newest:  {}", newest.to_rfc3339());
    }
    Ok(())
}

async fn sync(config: &Config) -> Result<()> {
    let store = open_store()?;
    let before = load_queue(&store).len();
    if before == 0 {
        println!("Queue is empty, nothing to sync.");
        return Ok(());
    }

    if !config.delivery.is_ready() {
        anyhow::bail!(
            "delivery.server_url is not configured; edit {}",
            Config::config_path().display()
        );
    }

    let token = Arc::new(StaticToken(config.delivery.api_key.clone()));
    let client =
        Arc::new(ApiClient::new(&config.delivery, token).context("failed to create API client")?);

    // One-shot invocation: assume online, let the transport surface failures
    let (_online_tx, online_rx) = watch::channel(true);
    let mut queue = OfflineQueue::new(&config.offline, Box::new(store), client, online_rx);

    queue.sync_now().await;
    let status = queue.status();
    queue.cleanup();

    // Count by queue totals: the background worker may also sync entries
    let synced = before.saturating_sub(status.total);
    println!("Synced {} of {} queued event(s).", synced, before);
    if status.total > 0 {
        println!(
            "{} event(s) remain ({} failed); re-run sync or clear-failed.",
            status.total, status.failed
        );
    }
    Ok(())
}

fn clear_failed(config: &Config) -> Result<()> {
    let store = open_store()?;
    let mut queue = load_queue(&store);
    let before = queue.len();
    queue.retain(|entry| !entry.is_exhausted(config.offline.retry_attempts));
    let cleared = before - queue.len();

    if cleared > 0 {
        save_queue(&store, &queue);
        tracing::info!(cleared, "Cleared failed queue entries");
    }
    println!("Cleared {} failed event(s); {} remain.", cleared, queue.len());
    Ok(())
}

fn show_config(config: &Config) -> Result<()> {
    println!("Config file: {}", Config::config_path().display());
    println!("Queue db:    {}", Config::queue_db_path().display());
    println!("Log file:    {}", Config::log_path().display());
    println!();
    println!("[delivery]");
    println!(
        "  server_url        = {}",
        config.delivery.server_url.as_deref().unwrap_or("(unset)")
    );
    println!(
        "  api_key           = {}",
        if config.delivery.api_key.is_some() {
            "(set)"
        } else {
            "(unset)"
        }
    );
    println!("  batch_size        = {}", config.delivery.batch_size);
    println!("  flush_interval_ms = {}", config.delivery.flush_interval_ms);
    println!("  retry_attempts    = {}", config.delivery.retry_attempts);
    println!("  retry_delay_ms    = {}", config.delivery.retry_delay_ms);
    println!("[offline]");
    println!("  max_queue_size    = {}", config.offline.max_queue_size);
    println!("  sync_interval_ms  = {}", config.offline.sync_interval_ms);
    println!("  retry_attempts    = {}", config.offline.retry_attempts);
    println!("  retry_delay_ms    = {}", config.offline.retry_delay_ms);
    println!("[pipeline]");
    println!("  max_events        = {}", config.pipeline.max_events);
    Ok(())
}
