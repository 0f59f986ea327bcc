//! Command execution handlers.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use quickslot_core::{Actor, QuickSlot, RuntimeOptions, SettingsStore};

use super::args::{Cli, Commands};
use crate::console;
use crate::host::LocalHost;

/// Dispatch the parsed command line.
pub async fn dispatch_command(cli: Cli) -> Result<()> {
    let command = cli.command.unwrap_or(Commands::Run { no_autosave: false });
    match command {
        Commands::Run { no_autosave } => run_console(&cli.config, no_autosave).await,
        Commands::Backup => run_backup(&cli.config).await,
        Commands::List => run_list(&cli.config).await,
        Commands::Init => run_init(&cli.config),
    }
}

/// Load settings and bring the subsystem up against a local host.
pub fn start(config: &Path) -> Result<Arc<QuickSlot>> {
    let store = SettingsStore::new(config);
    let settings = store
        .load_or_default()
        .with_context(|| format!("Failed to load settings from {}", config.display()))?;

    let host = Arc::new(LocalHost::new(settings.host.clone(), settings.server_path.clone()));
    let qs = QuickSlot::new(settings, store, host.clone(), RuntimeOptions::default())
        .context("Backup subsystem failed to start")?;
    host.attach(&qs);
    Ok(qs)
}

async fn run_console(config: &Path, no_autosave: bool) -> Result<()> {
    let qs = start(config)?;
    if no_autosave {
        info!("Autosave timer not started");
    } else {
        qs.start_autosave();
    }

    let prefix = qs.settings().prefix.clone();
    println!("QuickSlot ready, type {prefix} for help or exit to quit");
    console::run(qs).await
}

async fn run_backup(config: &Path) -> Result<()> {
    let qs = start(config)?;
    let worker = Arc::clone(&qs);
    let report = tokio::task::spawn_blocking(move || worker.schedule_backup(&Actor::Console))
        .await?
        .context("Backup failed")?;
    info!(bytes = report.bytes, "Backup written to slot 1");
    qs.shutdown();
    Ok(())
}

async fn run_list(config: &Path) -> Result<()> {
    let qs = start(config)?;
    let worker = Arc::clone(&qs);
    tokio::task::spawn_blocking(move || worker.list(&Actor::Console, true)).await??;
    Ok(())
}

fn run_init(config: &Path) -> Result<()> {
    let existed = config.exists();
    SettingsStore::new(config)
        .load_or_default()
        .with_context(|| format!("Failed to initialise {}", config.display()))?;
    if existed {
        println!("Settings already present at {}", config.display());
    } else {
        println!("Wrote default settings to {}", config.display());
    }
    Ok(())
}
