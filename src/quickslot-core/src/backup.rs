//! Scheduled backups: rotate the slots, flush the world, copy it into slot 1.

use chrono::{DateTime, Local};
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::host::{Actor, Host};
use crate::manager::QuickSlot;
use crate::slot::{AUTOMATIC_COMMENT, SlotMetadata};
use crate::strategy::RetentionStrategy;
use crate::task::TaskKind;
use crate::{QuickSlotError, Result};

/// Outcome of a successful backup.
#[derive(Debug, Clone)]
pub struct BackupReport {
    pub metadata: SlotMetadata,
    pub elapsed: Duration,
    pub bytes: u64,
    /// Slot whose contents were dropped to make room, if any.
    pub evicted: Option<u32>,
}

/// Slot ages relative to `now`, youngest first, with their slot numbers.
pub fn slot_ages(
    slots: &BTreeMap<u32, SlotMetadata>,
    now: DateTime<Local>,
) -> (Vec<Duration>, Vec<u32>) {
    let mut aged: Vec<(Duration, u32)> = slots
        .iter()
        .map(|(&slot, meta)| (meta.age_at(now), slot))
        .collect();
    aged.sort();
    aged.into_iter().unzip()
}

/// First slot number the next backup may take over. Every slot below it is
/// kept and shifts up by one.
///
/// Once every configured slot is kept, the numerically largest one gives way.
/// That assumes slot numbers follow age order, which rotation maintains.
pub fn plan_free_slot(
    slots: &BTreeMap<u32, SlotMetadata>,
    strategy: &dyn RetentionStrategy,
    slot_count: u32,
    now: DateTime<Local>,
) -> u32 {
    let (ages, indices) = slot_ages(slots, now);
    let keep = strategy.decide_keep(&ages);
    let kept = keep.iter().filter(|&&k| k).count();

    let keep_set: BTreeSet<u32> = if kept < slot_count as usize {
        indices
            .iter()
            .zip(&keep)
            .filter(|&(_, &k)| k)
            .map(|(&slot, _)| slot)
            .collect()
    } else {
        (1..slot_count).collect()
    };

    (1..).find(|slot| !keep_set.contains(slot)).unwrap_or(1)
}

/// Resumes host autosave when dropped.
struct AutosaveSuspension<'a> {
    host: &'a dyn Host,
}

impl<'a> AutosaveSuspension<'a> {
    fn begin(host: &'a dyn Host) -> Result<Self> {
        host.suspend_autosave()?;
        Ok(Self { host })
    }
}

impl Drop for AutosaveSuspension<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.host.resume_autosave() {
            error!(error = %e, "Failed to resume server autosave");
        }
    }
}

impl QuickSlot {
    /// Rotate the slots and take a fresh backup into slot 1.
    ///
    /// Failures are reported to `actor` and returned; admission is released
    /// on every path.
    pub fn schedule_backup(&self, actor: &Actor) -> Result<BackupReport> {
        let _guard = match self.tasks.register(TaskKind::Backup, || {}) {
            Ok(guard) => guard,
            Err(e) => {
                // Backup queues behind every kind.
                error!(error = %e, "Backup admission refused, compatibility table is broken");
                return Err(e);
            }
        };

        self.tell(actor, "Backing up... please wait");
        let started = Instant::now();

        match self.run_backup(actor, started) {
            Ok(report) => {
                info!(
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    bytes = report.bytes,
                    evicted = ?report.evicted,
                    "Backup completed"
                );
                self.tell(
                    actor,
                    &format!("Backup finished in {:.1}s", report.elapsed.as_secs_f64()),
                );
                self.tell(actor, &report.metadata.to_string());
                Ok(report)
            }
            Err(QuickSlotError::Interrupted) => {
                warn!("Backup interrupted by shutdown");
                self.tell(actor, "Shutting down, backup interrupted!");
                Err(QuickSlotError::Interrupted)
            }
            Err(e) => {
                error!(error = %e, "Backup failed");
                self.tell(actor, &format!("Backup failed: {e}"));
                Err(e)
            }
        }
    }

    fn run_backup(&self, actor: &Actor, started: Instant) -> Result<BackupReport> {
        let slot_count = self.settings.read().slot_count;
        let now = Local::now();

        let free = plan_free_slot(
            &self.store.cached_slots(),
            self.strategy.as_ref(),
            slot_count,
            now,
        );
        let evicted = self.rotate(free)?;

        let bytes = self.create_backup()?;

        let metadata = SlotMetadata::now(AUTOMATIC_COMMENT);
        self.store.write_metadata(1, &metadata)?;
        self.store.set_cached(1, metadata.clone());
        debug!(%actor, "Slot 1 written");

        Ok(BackupReport {
            metadata,
            elapsed: started.elapsed(),
            bytes,
            evicted,
        })
    }

    /// Free slot 1 by dropping `free` and shifting `1..free` up by one.
    fn rotate(&self, free: u32) -> Result<Option<u32>> {
        let evicted = self.store.folder_for(free).exists().then_some(free);
        if evicted.is_some() {
            info!(slot = free, "Evicting slot");
        }
        self.store.remove_slot_contents(free)?;

        for slot in (2..=free).rev() {
            self.store.move_slot(slot - 1, slot)?;
        }
        Ok(evicted)
    }

    /// Flush the live world and copy it into slot 1.
    fn create_backup(&self) -> Result<u64> {
        let turn_off_auto_save = self.settings.read().turn_off_auto_save;

        let _suspension = if turn_off_auto_save {
            Some(AutosaveSuspension::begin(self.host.as_ref())?)
        } else {
            None
        };

        self.flush.reset();
        self.host.force_flush()?;
        self.flush.wait(
            self.options.flush_timeout,
            self.options.flush_poll,
            &self.shutdown,
        )?;

        match self.store.copy_live_into(1) {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                // A slot without metadata counts as empty; drop the partial copy.
                if let Err(cleanup) = self.store.remove_slot_contents(1) {
                    warn!(error = %cleanup, "Failed to remove partial backup");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slot::format_time;
    use crate::strategy::DefaultStrategy;
    use crate::test_support::fixture;
    use pretty_assertions::assert_eq;
    use std::fs;

    fn aged(now: DateTime<Local>, minutes: &[(u32, i64)]) -> BTreeMap<u32, SlotMetadata> {
        minutes
            .iter()
            .map(|&(slot, m)| {
                let created = now - chrono::Duration::minutes(m);
                (slot, SlotMetadata {
                    created_at: format_time(created),
                    comment: String::new(),
                })
            })
            .collect()
    }

    fn thresholds(minutes: &[u64]) -> DefaultStrategy {
        DefaultStrategy::new(minutes.iter().map(|m| Duration::from_secs(m * 60)).collect()).unwrap()
    }

    #[test]
    fn test_slot_ages_sorted() {
        let now = Local::now();
        let slots = aged(now, &[(1, 50), (2, 5), (3, 500)]);
        let (ages, indices) = slot_ages(&slots, now);
        assert_eq!(indices, vec![2, 1, 3]);
        assert!(ages.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_plan_empty_store() {
        let now = Local::now();
        let strategy = thresholds(&[10, 60, 180]);
        assert_eq!(plan_free_slot(&BTreeMap::new(), &strategy, 3, now), 1);
    }

    #[test]
    fn test_plan_while_filling() {
        let now = Local::now();
        let strategy = thresholds(&[10, 60, 180]);
        let slots = aged(now, &[(1, 10), (2, 20)]);
        assert_eq!(plan_free_slot(&slots, &strategy, 3, now), 3);
    }

    #[test]
    fn test_plan_saturated_falls_back_to_largest() {
        let now = Local::now();
        let strategy = thresholds(&[10, 60, 180]);
        let slots = aged(now, &[(1, 5), (2, 65), (3, 190)]);
        assert_eq!(plan_free_slot(&slots, &strategy, 3, now), 3);
    }

    #[test]
    fn test_plan_drops_crowded_bucket() {
        let now = Local::now();
        let strategy = thresholds(&[10, 60, 180]);
        let slots = aged(now, &[(1, 5), (2, 30), (3, 190)]);
        assert_eq!(plan_free_slot(&slots, &strategy, 3, now), 1);

        let slots = aged(now, &[(1, 5), (2, 65), (3, 120)]);
        assert_eq!(plan_free_slot(&slots, &strategy, 3, now), 2);
    }

    #[test]
    fn test_backup_into_empty_store() {
        let (_temp, qs, host) = fixture(3);
        let report = qs.schedule_backup(&Actor::Console).unwrap();

        assert_eq!(report.metadata.comment, AUTOMATIC_COMMENT);
        assert_eq!(report.evicted, None);
        assert_eq!(qs.store().read_metadata(1), Some(report.metadata.clone()));
        assert_eq!(qs.store().cached(1), Some(report.metadata));
        assert!(qs.store().folder_for(1).join("world").join("level.dat").exists());
        assert!(!qs.store().folder_for(1).join("world").join("session.lock").exists());

        let calls = host.calls();
        assert_eq!(calls, vec!["suspend_autosave", "force_flush", "resume_autosave"]);
        assert!(host.saw("Backup finished"));
        assert!(qs.tasks().is_idle());
    }

    #[test]
    fn test_rotation_keeps_slots_contiguous() {
        let (_temp, qs, _host) = fixture(3);
        for round in 0..5 {
            qs.schedule_backup(&Actor::System).unwrap();
            let cached = qs.store().cached_slots();
            let expected: Vec<u32> = (1..=cached.len() as u32).collect();
            assert_eq!(cached.keys().copied().collect::<Vec<_>>(), expected, "round {round}");
            assert!(cached.len() <= 3);
        }
        assert_eq!(qs.store().cached_slots().len(), 3);
        assert!(!qs.store().folder_for(4).exists());
    }

    #[test]
    fn test_flush_timeout_resumes_autosave() {
        let (_temp, qs, host) = fixture(3);
        host.set_ack_flush(false);

        let err = qs.schedule_backup(&Actor::Console).unwrap_err();
        assert!(matches!(err, QuickSlotError::FlushTimeout(_)));
        assert_eq!(host.calls().last().map(String::as_str), Some("resume_autosave"));
        assert!(host.saw("Backup failed"));
        assert!(qs.store().read_metadata(1).is_none());
        assert!(qs.tasks().is_idle());
    }

    #[test]
    fn test_copy_failure_leaves_no_slot() {
        let (temp, qs, host) = fixture(3);
        fs::remove_dir_all(temp.path().join("server").join("world")).unwrap();

        let err = qs.schedule_backup(&Actor::Console).unwrap_err();
        assert!(matches!(err, QuickSlotError::Copy { .. }));
        assert!(!qs.store().folder_for(1).exists());
        assert!(qs.store().cached(1).is_none());
        assert!(host.calls().contains(&"resume_autosave".to_string()));
        assert!(qs.tasks().is_idle());
    }

    #[test]
    fn test_shutdown_interrupts_flush_wait() {
        let (_temp, qs, host) = fixture(3);
        host.set_ack_flush(false);
        qs.shutdown.store(true, std::sync::atomic::Ordering::SeqCst);

        let err = qs.schedule_backup(&Actor::Console).unwrap_err();
        assert!(matches!(err, QuickSlotError::Interrupted));
        assert!(host.saw("backup interrupted"));
    }
}
