//! QuickSlot CLI - Main entry point.
//!
//! Runs the backup subsystem against a server directory: an interactive
//! console by default, or a single `backup` / `list` / `init` command.

use anyhow::Result;
use clap::Parser;

use quickslot_cli::cli::{Cli, dispatch_command};
use quickslot_cli::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Keeps the file writer alive until exit.
    let _log_guard = logging::init(cli.effective_log_level(), cli.log_file.as_deref())?;

    dispatch_command(cli).await
}
