//! Rotating slot backups for a live world directory.
//!
//! A running server keeps writing its world directories while this crate
//! snapshots them into numbered slots (`slot1` is always the newest), thins
//! the history with a retention strategy, and restores a chosen slot through
//! a confirm / countdown / swap protocol.
//!
//! # Architecture
//!
//! ```text
//! timer tick / operator command
//!             │
//!             ▼
//!   ┌───────────────────┐   admission    ┌────────────────────┐
//!   │  QuickSlot (ctx)  │ ─────────────▶ │  TaskCoordinator   │
//!   └───────────────────┘                └────────────────────┘
//!        │          │
//!        ▼          ▼
//!   backup.rs    restore.rs ──▶ SlotStore ──▶ <backup_path>/slotN/
//!        │
//!        ▼
//!   RetentionStrategy
//! ```
//!
//! Every mutating operation holds a [`TaskGuard`] for its whole duration;
//! dropping the guard is the only way admission is released.

pub mod autosave;
pub mod backup;
pub mod command;
pub mod duration;
pub mod fs_ops;
pub mod host;
pub mod manager;
pub mod restore;
pub mod settings;
pub mod slot;
pub mod store;
pub mod strategy;
pub mod task;

#[cfg(test)]
mod test_support;

pub use autosave::{AutosaveHandle, AutosaveTimer};
pub use backup::BackupReport;
pub use command::{Command, dispatch};
pub use duration::parse_threshold;
pub use host::{Actor, FlushSignal, Host};
pub use manager::{QuickSlot, RuntimeOptions, SlotListing};
pub use restore::{PendingRestore, RestoreOutcome, RestoreState};
pub use settings::{HostCommands, Settings, SettingsStore, ThresholdSpec};
pub use slot::{SlotMetadata, TIME_FORMAT};
pub use store::SlotStore;
pub use strategy::{DefaultStrategy, RetentionStrategy, strategy_from_settings};
pub use task::{TaskCoordinator, TaskGuard, TaskKind};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the backup subsystem.
#[derive(Debug, Error)]
pub enum QuickSlotError {
    /// Slot number outside `1..=slot_count` or not a number.
    #[error("Invalid slot '{input}', expected a number in [1, {max}]")]
    InvalidSlot { input: String, max: u32 },

    /// Slot has no metadata file.
    #[error("Slot {0} is empty")]
    EmptySlot(u32),

    /// The selected slot was replaced or removed after selection.
    #[error("Slot {0} changed since it was selected")]
    SlotChanged(u32),

    /// Retention strategy name not registered.
    #[error("Unknown retention strategy '{0}'")]
    UnknownStrategy(String),

    /// Threshold token could not be parsed.
    #[error("Invalid duration '{0}'")]
    InvalidDuration(String),

    /// A setting value is out of range.
    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    /// Admission refused because an incompatible task is queued ahead.
    #[error("A {blocking} task is still in progress")]
    Conflict { blocking: TaskKind },

    /// Copying a tracked directory failed.
    #[error("Failed to copy {path}: {source}")]
    Copy {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The host never reported the flush as complete.
    #[error("Timed out after {0}s waiting for the world to be saved")]
    FlushTimeout(u64),

    /// The subsystem is shutting down.
    #[error("Operation interrupted by shutdown")]
    Interrupted,

    /// A host collaborator call failed.
    #[error("Host error: {0}")]
    Host(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse settings: {0}")]
    TomlRead(#[from] toml::de::Error),

    #[error("Failed to serialize settings: {0}")]
    TomlWrite(#[from] toml::ser::Error),
}

pub type Result<T> = std::result::Result<T, QuickSlotError>;

/// Prefix on every operator-facing message.
pub const MESSAGE_PREFIX: &str = "[QS] ";
