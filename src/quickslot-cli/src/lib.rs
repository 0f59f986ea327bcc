//! QuickSlot CLI library module.
//!
//! - `cli/` - argument parsing and command dispatch
//! - `host` - host implementation for a plain server directory
//! - `logging` - tracing subscriber setup
//! - `console` - interactive console loop

pub mod cli;
pub mod console;
pub mod host;
pub mod logging;

/// Default settings file, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./config/quickslot.toml";

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "QUICKSLOT_CONFIG";

/// Environment variable carrying the log level.
pub const LOG_LEVEL_ENV: &str = "QUICKSLOT_LOG";
