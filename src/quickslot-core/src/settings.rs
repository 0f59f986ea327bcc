//! Persisted settings document.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::duration::{minutes, parse_threshold};
use crate::fs_ops::atomic_write;
use crate::{QuickSlotError, Result};

/// Upper bound accepted by the `slot` command.
pub const MAX_SLOT_COUNT: u32 = 1000;

/// One retention threshold: a bare number of minutes or a unit token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThresholdSpec {
    Minutes(f64),
    Token(String),
}

impl ThresholdSpec {
    pub fn to_duration(&self) -> Result<Duration> {
        match self {
            Self::Minutes(value) => minutes(*value),
            Self::Token(token) => parse_threshold(token),
        }
    }
}

impl From<&str> for ThresholdSpec {
    fn from(token: &str) -> Self {
        Self::Token(token.to_string())
    }
}

/// Shell commands used by the local host to drive an external server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCommands {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_off_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_on_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flush_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_command: Option<String>,
}

/// Backup subsystem settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Whether the autosave timer takes backups.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Whether `list` reports the total size of the backup directory.
    #[serde(default = "default_true")]
    pub size_display: bool,

    /// Number of addressable slots.
    #[serde(default = "default_slot_count")]
    pub slot_count: u32,

    /// Command prefix token.
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Directory holding `slot1..slotN` and the safety copy.
    #[serde(default = "default_backup_path")]
    pub backup_path: PathBuf,

    /// Suspend server autosave while copying.
    #[serde(default = "default_true")]
    pub turn_off_auto_save: bool,

    /// Skip `session.lock` when copying worlds.
    #[serde(default = "default_true")]
    pub ignore_session_lock: bool,

    /// Retention strategy name.
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Strategy thresholds.
    #[serde(default = "default_strategy_config")]
    pub strategy_config: Vec<ThresholdSpec>,

    /// Tracked world directories below `server_path`.
    #[serde(default = "default_world_names")]
    pub world_names: Vec<String>,

    /// Folder name (below `backup_path`) of the pre-restore safety copy.
    #[serde(default = "default_overwrite_folder")]
    pub overwrite_backup_folder: String,

    /// Live server directory containing the worlds.
    #[serde(default = "default_server_path")]
    pub server_path: PathBuf,

    /// Minimum permission level per sub-command.
    #[serde(default = "default_permissions")]
    pub minimum_permission_level: BTreeMap<String, u8>,

    #[serde(default)]
    pub host: HostCommands,
}

fn default_true() -> bool {
    true
}

fn default_slot_count() -> u32 {
    10
}

fn default_prefix() -> String {
    "!!qs".to_string()
}

fn default_backup_path() -> PathBuf {
    PathBuf::from("./quickslot_backups")
}

fn default_strategy() -> String {
    "default".to_string()
}

fn default_strategy_config() -> Vec<ThresholdSpec> {
    ["10min", "1h", "3h", "1d", "2d", "3d", "5d", "10d", "1M", "2M"]
        .into_iter()
        .map(ThresholdSpec::from)
        .collect()
}

fn default_world_names() -> Vec<String> {
    vec!["world".to_string()]
}

fn default_permissions() -> BTreeMap<String, u8> {
    [
        ("help", 0),
        ("enable", 2),
        ("disable", 2),
        ("slot", 2),
        ("back", 2),
        ("confirm", 1),
        ("abort", 1),
        ("list", 0),
        ("del", 2),
    ]
    .into_iter()
    .map(|(name, level)| (name.to_string(), level))
    .collect()
}

fn default_overwrite_folder() -> String {
    "overwrite".to_string()
}

fn default_server_path() -> PathBuf {
    PathBuf::from("./server")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            size_display: true,
            slot_count: default_slot_count(),
            prefix: default_prefix(),
            backup_path: default_backup_path(),
            turn_off_auto_save: true,
            ignore_session_lock: true,
            strategy: default_strategy(),
            strategy_config: default_strategy_config(),
            world_names: default_world_names(),
            overwrite_backup_folder: default_overwrite_folder(),
            server_path: default_server_path(),
            minimum_permission_level: default_permissions(),
            host: HostCommands::default(),
        }
    }
}

impl Settings {
    /// Directory of the pre-restore safety copy.
    pub fn overwrite_folder(&self) -> PathBuf {
        self.backup_path.join(&self.overwrite_backup_folder)
    }

    /// Minimum level required for `command`, if it is gated.
    pub fn required_level(&self, command: &str) -> Option<u8> {
        self.minimum_permission_level.get(command).copied()
    }

    /// Check values a hand-edited document could get wrong.
    pub fn validate(&self) -> Result<()> {
        if !(1..=MAX_SLOT_COUNT).contains(&self.slot_count) {
            return Err(QuickSlotError::InvalidSetting(format!(
                "slot_count must be in [1, {MAX_SLOT_COUNT}], got {}",
                self.slot_count
            )));
        }
        if self.world_names.is_empty() {
            return Err(QuickSlotError::InvalidSetting(
                "world_names must name at least one directory".to_string(),
            ));
        }
        if self.prefix.trim().is_empty() || self.prefix.contains(char::is_whitespace) {
            return Err(QuickSlotError::InvalidSetting(format!(
                "prefix must be a single token, got '{}'",
                self.prefix
            )));
        }
        Ok(())
    }
}

/// Loads and rewrites the settings document.
#[derive(Debug, Clone)]
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, writing defaults when it is missing or unreadable.
    pub fn load_or_default(&self) -> Result<Settings> {
        if !self.path.exists() {
            info!(path = %self.path.display(), "Settings file missing, writing defaults");
            let settings = Settings::default();
            self.save(&settings)?;
            return Ok(settings);
        }

        let text = fs::read_to_string(&self.path)?;
        match toml::from_str::<Settings>(&text) {
            Ok(settings) => {
                debug!(path = %self.path.display(), "Loaded settings");
                Ok(settings)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Settings file is invalid, replacing with defaults");
                let settings = Settings::default();
                self.save(&settings)?;
                Ok(settings)
            }
        }
    }

    /// Strict load without fallback.
    pub fn load(&self) -> Result<Settings> {
        let text = fs::read_to_string(&self.path)?;
        Ok(toml::from_str(&text)?)
    }

    /// Rewrite the whole document atomically.
    pub fn save(&self, settings: &Settings) -> Result<()> {
        let text = toml::to_string_pretty(settings)?;
        atomic_write(&self.path, text.as_bytes())?;
        debug!(path = %self.path.display(), "Saved settings");
        Ok(())
    }
}
