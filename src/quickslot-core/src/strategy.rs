//! Retention strategies deciding which slots survive the next backup.

use std::time::Duration;
use tracing::debug;

use crate::settings::Settings;
use crate::{QuickSlotError, Result};

/// Slack subtracted from every bucket boundary to absorb timer jitter.
pub const JITTER_TOLERANCE: Duration = Duration::from_secs(10);

/// A keep/discard policy over slot ages.
pub trait RetentionStrategy: Send + Sync {
    /// Registered name of the strategy.
    fn name(&self) -> &'static str;

    /// Pace of the autosave timer.
    fn minimum_interval(&self) -> Duration;

    /// Decide, for each age (youngest first), whether to keep that slot.
    ///
    /// The returned vector has the same length as `ages`.
    fn decide_keep(&self, ages: &[Duration]) -> Vec<bool>;
}

/// Thins history into widening time buckets, discarding at most one slot
/// per backup.
///
/// With thresholds `t0 < t1 < ... < tn` and ages sorted youngest first,
/// slot `i` is dropped when slot `i + 1` is still younger than `t(i+1)`:
/// the bucket is not due to promote yet, so two slots would crowd it.
#[derive(Debug, Clone)]
pub struct DefaultStrategy {
    thresholds: Vec<Duration>,
}

impl DefaultStrategy {
    pub const NAME: &'static str = "default";

    pub fn new(mut thresholds: Vec<Duration>) -> Result<Self> {
        if thresholds.is_empty() {
            return Err(QuickSlotError::InvalidSetting(
                "strategy_config needs at least one threshold".to_string(),
            ));
        }
        if thresholds.iter().any(Duration::is_zero) {
            return Err(QuickSlotError::InvalidSetting(
                "strategy thresholds must be positive".to_string(),
            ));
        }
        thresholds.sort();
        Ok(Self { thresholds })
    }

    pub fn thresholds(&self) -> &[Duration] {
        &self.thresholds
    }
}

impl RetentionStrategy for DefaultStrategy {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn minimum_interval(&self) -> Duration {
        self.thresholds[0]
    }

    fn decide_keep(&self, ages: &[Duration]) -> Vec<bool> {
        let mut keep = vec![true; ages.len()];

        if ages.len() < self.thresholds.len() {
            return keep;
        }

        for i in 0..self.thresholds.len() - 1 {
            if ages[i + 1] + JITTER_TOLERANCE < self.thresholds[i + 1] {
                debug!(index = i, age_secs = ages[i + 1].as_secs(), "Bucket not due, evicting");
                keep[i] = false;
                break;
            }
        }

        keep
    }
}

type StrategyFactory = fn(&Settings) -> Result<Box<dyn RetentionStrategy>>;

fn default_factory(settings: &Settings) -> Result<Box<dyn RetentionStrategy>> {
    let thresholds = settings
        .strategy_config
        .iter()
        .map(|spec| spec.to_duration())
        .collect::<Result<Vec<_>>>()?;
    Ok(Box::new(DefaultStrategy::new(thresholds)?))
}

const STRATEGIES: &[(&str, StrategyFactory)] = &[(DefaultStrategy::NAME, default_factory)];

/// Names of all registered strategies.
pub fn strategy_names() -> impl Iterator<Item = &'static str> {
    STRATEGIES.iter().map(|(name, _)| *name)
}

/// Build the strategy named in `settings`.
pub fn strategy_from_settings(settings: &Settings) -> Result<Box<dyn RetentionStrategy>> {
    let factory = STRATEGIES
        .iter()
        .find(|(name, _)| *name == settings.strategy)
        .map(|(_, factory)| *factory)
        .ok_or_else(|| QuickSlotError::UnknownStrategy(settings.strategy.clone()))?;
    factory(settings)
}
