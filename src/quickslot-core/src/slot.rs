//! Per-slot metadata (`slotN/info.json`).

use chrono::{DateTime, Local, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Timestamp format used in slot metadata and the safety copy note.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Comment written on scheduled backups.
pub const AUTOMATIC_COMMENT: &str = "automatic";

/// Metadata stored alongside every slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMetadata {
    /// Creation time, local, formatted with [`TIME_FORMAT`].
    #[serde(rename = "time")]
    pub created_at: String,
    #[serde(default)]
    pub comment: String,
}

impl SlotMetadata {
    pub fn new(created_at: DateTime<Local>, comment: impl Into<String>) -> Self {
        Self {
            created_at: format_time(created_at),
            comment: comment.into(),
        }
    }

    /// Metadata stamped with the current local time.
    pub fn now(comment: impl Into<String>) -> Self {
        Self::new(Local::now(), comment)
    }

    /// Parsed creation time, `None` if the stored string is malformed.
    pub fn created(&self) -> Option<DateTime<Local>> {
        parse_time(&self.created_at)
    }

    /// Age relative to `now`. Unparsable or future timestamps count as zero.
    pub fn age_at(&self, now: DateTime<Local>) -> Duration {
        self.created()
            .and_then(|created| (now - created).to_std().ok())
            .unwrap_or(Duration::ZERO)
    }
}

impl fmt::Display for SlotMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let comment = if self.comment.is_empty() {
            "(empty)"
        } else {
            self.comment.as_str()
        };
        write!(f, "Date: {}; Comment: {}", self.created_at, comment)
    }
}

pub fn format_time(time: DateTime<Local>) -> String {
    time.format(TIME_FORMAT).to_string()
}

pub fn parse_time(text: &str) -> Option<DateTime<Local>> {
    let naive = NaiveDateTime::parse_from_str(text, TIME_FORMAT).ok()?;
    Local.from_local_datetime(&naive).earliest()
}
