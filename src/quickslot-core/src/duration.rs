//! Magnitude + unit duration tokens (`10min`, `1.5h`, `2d`, `1M`, `1y`).

use once_cell::sync::Lazy;
use regex::Regex;
use std::time::Duration;

use crate::{QuickSlotError, Result};

const MINUTE: f64 = 60.0;
const HOUR: f64 = 60.0 * MINUTE;
const DAY: f64 = 24.0 * HOUR;
const MONTH: f64 = 30.0 * DAY;
const YEAR: f64 = 365.0 * DAY;

static THRESHOLD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^\s*(\d+(?:\.\d+)?)\s*(min|h|d|m|y)?\s*$").expect("threshold regex is valid")
});

/// Seconds per unit suffix. Suffixes are matched case-insensitively, so
/// `m`/`M` is a month and minutes must be spelled `min`.
fn unit_seconds(unit: Option<&str>) -> f64 {
    match unit.map(str::to_ascii_lowercase).as_deref() {
        None | Some("min") => MINUTE,
        Some("h") => HOUR,
        Some("d") => DAY,
        Some("m") => MONTH,
        Some("y") => YEAR,
        Some(_) => MINUTE,
    }
}

/// Parse a threshold token into a duration. A bare number is minutes.
pub fn parse_threshold(token: &str) -> Result<Duration> {
    let caps = THRESHOLD_RE
        .captures(token)
        .ok_or_else(|| QuickSlotError::InvalidDuration(token.to_string()))?;

    let magnitude: f64 = caps[1]
        .parse()
        .map_err(|_| QuickSlotError::InvalidDuration(token.to_string()))?;
    let secs = magnitude * unit_seconds(caps.get(2).map(|m| m.as_str()));

    Duration::try_from_secs_f64(secs).map_err(|_| QuickSlotError::InvalidDuration(token.to_string()))
}

/// Minutes given as a plain number.
pub fn minutes(value: f64) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 {
        return Err(QuickSlotError::InvalidDuration(value.to_string()));
    }
    Duration::try_from_secs_f64(value * MINUTE)
        .map_err(|_| QuickSlotError::InvalidDuration(value.to_string()))
}
