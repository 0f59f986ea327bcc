//! Restore protocol: select, confirm, countdown, swap.
//!
//! ```text
//! Idle ──select──▶ Selected ──confirm──▶ Confirming ──▶ Executing ──▶ Idle
//!                     │                      │
//!                     └──────── abort ───────┴──▶ Idle
//! ```
//!
//! The swap is not reversible. If it fails after the live worlds were
//! removed, the live directory stays empty until an operator restores again
//! or copies the safety copy back by hand. Restoring into an emptied live
//! directory works; missing worlds are left out of the safety copy.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::host::Actor;
use crate::manager::QuickSlot;
use crate::slot::SlotMetadata;
use crate::task::TaskKind;
use crate::{MESSAGE_PREFIX, QuickSlotError, Result};

/// The outstanding restore selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRestore {
    pub slot: u32,
    pub metadata: SlotMetadata,
}

/// Where the restore protocol currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestoreState {
    #[default]
    Idle,
    Selected,
    Confirming,
    Executing,
}

impl fmt::Display for RestoreState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Selected => "selected",
            Self::Confirming => "confirming",
            Self::Executing => "executing",
        };
        f.write_str(s)
    }
}

/// How a `confirm` ended when it did not fail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreOutcome {
    Restored(u32),
    Aborted,
    NothingToConfirm,
}

/// Resets the phase to `Idle` when the confirm call returns.
struct PhaseReset<'a>(&'a Mutex<RestoreState>);

impl Drop for PhaseReset<'_> {
    fn drop(&mut self) {
        *self.0.lock() = RestoreState::Idle;
    }
}

impl QuickSlot {
    pub fn restore_state(&self) -> RestoreState {
        let phase = *self.restore_phase.lock();
        match phase {
            RestoreState::Idle if self.pending.lock().is_some() => RestoreState::Selected,
            phase => phase,
        }
    }

    pub fn pending_restore(&self) -> Option<PendingRestore> {
        self.pending.lock().clone()
    }

    /// Select a slot for restore. Takes no admission.
    pub fn select_restore(&self, actor: &Actor, slot_input: &str) -> Result<PendingRestore> {
        let (slot, metadata) = match self.check_slot(slot_input) {
            Ok(checked) => checked,
            Err(e) => {
                self.report_slot_error(actor, &e);
                return Err(e);
            }
        };

        let selection = PendingRestore { slot, metadata };
        *self.pending.lock() = Some(selection.clone());
        self.abort.store(false, Ordering::SeqCst);
        info!(slot, %actor, "Restore selected");

        let prefix = self.settings.read().prefix.clone();
        self.tell(actor, &format!("Ready to restore slot {slot}"));
        self.tell(actor, &selection.metadata.to_string());
        self.tell(
            actor,
            &format!("Use {prefix} confirm to proceed or {prefix} abort to cancel"),
        );
        Ok(selection)
    }

    /// Run the pending restore after a countdown.
    pub fn confirm_restore(&self, actor: &Actor) -> Result<RestoreOutcome> {
        if self.pending.lock().is_none() {
            self.tell(actor, "Nothing to confirm");
            return Ok(RestoreOutcome::NothingToConfirm);
        }

        let _guard = match self.tasks.register(TaskKind::Restore, self.waiting_notice(actor)) {
            Ok(guard) => guard,
            Err(QuickSlotError::Conflict { blocking }) => {
                self.tell(actor, &format!("A {blocking} task is in progress, restore cancelled"));
                return Err(QuickSlotError::Conflict { blocking });
            }
            Err(e) => return Err(e),
        };

        // Aborted or superseded while waiting for admission.
        let Some(selection) = self.pending.lock().take() else {
            self.tell(actor, "Nothing to confirm");
            return Ok(RestoreOutcome::NothingToConfirm);
        };

        // A delete or backup may have run since the selection.
        if let Err(e) = self.verify_selection(&selection) {
            warn!(slot = selection.slot, error = %e, "Selected slot no longer matches");
            self.tell(actor, &format!("{e}, restore cancelled"));
            return Err(e);
        }

        let _reset = PhaseReset(&self.restore_phase);
        *self.restore_phase.lock() = RestoreState::Confirming;

        if !self.countdown(selection.slot) {
            info!(slot = selection.slot, "Restore aborted during countdown");
            self.host.broadcast(&format!("{MESSAGE_PREFIX}Restore interrupted!"));
            return Ok(RestoreOutcome::Aborted);
        }

        *self.restore_phase.lock() = RestoreState::Executing;
        match self.swap_in(actor, selection.slot) {
            Ok(()) => {
                info!(slot = selection.slot, %actor, "Restore completed");
                self.announce(actor, &format!("Restored slot {}", selection.slot));
                Ok(RestoreOutcome::Restored(selection.slot))
            }
            Err(e) => {
                error!(slot = selection.slot, error = %e, "Restore failed");
                let overwrite = self.store.overwrite_folder().display().to_string();
                self.announce(
                    actor,
                    &format!("Restore failed: {e}; previous worlds are kept in {overwrite}"),
                );
                Err(e)
            }
        }
    }

    fn verify_selection(&self, selection: &PendingRestore) -> Result<()> {
        match self.store.read_metadata(selection.slot) {
            None => Err(QuickSlotError::EmptySlot(selection.slot)),
            Some(current) if current != selection.metadata => {
                Err(QuickSlotError::SlotChanged(selection.slot))
            }
            Some(_) => Ok(()),
        }
    }

    /// Count down, broadcasting once a second. False when aborted.
    fn countdown(&self, slot: u32) -> bool {
        let tick = self.options.countdown_tick.max(Duration::from_millis(1));
        let total = self.options.restore_countdown;
        let ticks = (total.as_millis() / tick.as_millis()).max(1) as u64;
        let ticks_per_second = (1000 / tick.as_millis()).max(1) as u64;
        let prefix = self.settings.read().prefix.clone();

        for i in 0..ticks {
            if self.abort.load(Ordering::SeqCst) || self.is_shutting_down() {
                return false;
            }
            if i % ticks_per_second == 0 {
                let remaining = (ticks - i) * tick.as_millis() as u64;
                let seconds = remaining.div_ceil(1000);
                self.host.broadcast(&format!(
                    "{MESSAGE_PREFIX}Restoring slot {slot} in {seconds}s [abort: {prefix} abort]"
                ));
            }
            thread::sleep(tick);
        }
        !(self.abort.load(Ordering::SeqCst) || self.is_shutting_down())
    }

    fn swap_in(&self, actor: &Actor, slot: u32) -> Result<()> {
        self.host.stop_live_process()?;
        self.host.wait_until_stopped()?;

        self.store.write_safety_copy(actor)?;
        self.store.remove_live_worlds()?;
        if let Err(e) = self.store.copy_slot_to_live(slot) {
            warn!(slot, "Live worlds removed but restore copy failed");
            return Err(e);
        }

        self.host.start_live_process()
    }

    /// Cancel any selection or running countdown.
    pub fn abort_restore(&self, actor: &Actor) {
        self.abort.store(true, Ordering::SeqCst);
        let cleared = self.pending.lock().take();
        info!(%actor, had_selection = cleared.is_some(), "Restore aborted");
        self.tell(actor, "Operation aborted!");
    }
}
