//! CLI argument structures and parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::{CONFIG_ENV, DEFAULT_CONFIG_PATH, LOG_LEVEL_ENV};

/// Log verbosity level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors
    Warn,
    /// Show informational messages, warnings, and errors (default)
    #[default]
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// QuickSlot - rotating slot backups for a live world directory
///
/// Without a subcommand, starts the interactive console.
#[derive(Debug, Parser)]
#[command(name = "quickslot")]
#[command(author, version)]
#[command(about = "Rotating slot backups for a live world directory", long_about = None)]
pub struct Cli {
    /// Settings file
    #[arg(long, short = 'c', global = true, env = CONFIG_ENV, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Log level
    #[arg(long = "log-level", global = true, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Enable verbose output (same as --log-level debug)
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Also write logs to this file
    #[arg(long = "log-file", global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// `--log-level`, then `-v`, then `$QUICKSLOT_LOG`, then info.
    pub fn effective_log_level(&self) -> LogLevel {
        if let Some(level) = self.log_level {
            return level;
        }
        if self.verbose {
            return LogLevel::Debug;
        }
        std::env::var(LOG_LEVEL_ENV)
            .ok()
            .and_then(|value| LogLevel::from_str_loose(&value))
            .unwrap_or_default()
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run the interactive console with the autosave timer (default)
    Run {
        /// Do not start the autosave timer
        #[arg(long)]
        no_autosave: bool,
    },

    /// Take one backup now and exit
    Backup,

    /// List the stored slots and exit
    List,

    /// Write the default settings file if it does not exist
    Init,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_log_level_from_str_loose() {
        assert_eq!(LogLevel::from_str_loose("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str_loose("Debug"), Some(LogLevel::Debug));
        assert_eq!(LogLevel::from_str_loose("loud"), None);
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["quickslot", "--config", "qs.toml"]).unwrap();
        assert_eq!(cli.config, PathBuf::from("qs.toml"));
        assert!(cli.command.is_none());
        assert!(cli.log_file.is_none());
    }

    #[test]
    fn test_verbose_and_explicit_level() {
        let cli = Cli::try_parse_from(["quickslot", "-v", "list"]).unwrap();
        assert_eq!(cli.effective_log_level(), LogLevel::Debug);
        assert!(matches!(cli.command, Some(Commands::List)));

        let cli = Cli::try_parse_from(["quickslot", "-v", "--log-level", "error"]).unwrap();
        assert_eq!(cli.effective_log_level(), LogLevel::Error);
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from(["quickslot", "run", "--no-autosave"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Run { no_autosave: true })));
    }
}
