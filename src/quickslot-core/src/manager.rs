//! The subsystem context shared by every operation.
//!
//! One [`QuickSlot`] is built at startup and dropped at shutdown. It owns the
//! settings, the slot store, the admission queue, the pending restore and the
//! abort/shutdown flags; backup and restore logic live in their own modules
//! as further `impl QuickSlot` blocks.

use parking_lot::{Mutex, RwLock, RwLockReadGuard};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::autosave::{AutosaveHandle, AutosaveTimer};
use crate::fs_ops::format_size;
use crate::host::{Actor, FlushSignal, Host};
use crate::restore::{PendingRestore, RestoreState};
use crate::settings::{MAX_SLOT_COUNT, Settings, SettingsStore};
use crate::slot::SlotMetadata;
use crate::store::SlotStore;
use crate::strategy::{RetentionStrategy, strategy_from_settings};
use crate::task::{DEFAULT_POLL_INTERVAL, TaskCoordinator, TaskKind};
use crate::{MESSAGE_PREFIX, QuickSlotError, Result};

/// Timing knobs that are not part of the persisted settings.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Delay between `confirm` and the actual restore.
    pub restore_countdown: Duration,
    /// Abort flag re-check interval during the countdown.
    pub countdown_tick: Duration,
    /// Admission queue re-check interval.
    pub admission_poll: Duration,
    /// Longest wait for the host to report a completed save.
    pub flush_timeout: Duration,
    /// Shutdown re-check interval while waiting for the save.
    pub flush_poll: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            restore_countdown: Duration::from_secs(10),
            countdown_tick: Duration::from_millis(100),
            admission_poll: DEFAULT_POLL_INTERVAL,
            flush_timeout: Duration::from_secs(300),
            flush_poll: Duration::from_millis(100),
        }
    }
}

/// Non-empty slots in `1..=slot_count`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SlotListing {
    pub slots: Vec<(u32, SlotMetadata)>,
    /// Total backup directory size, when size display is on.
    pub total_size: Option<u64>,
}

/// Backup subsystem context.
pub struct QuickSlot {
    pub(crate) settings: RwLock<Settings>,
    settings_store: SettingsStore,
    pub(crate) strategy: Box<dyn RetentionStrategy>,
    pub(crate) store: SlotStore,
    pub(crate) tasks: TaskCoordinator,
    pub(crate) host: Arc<dyn Host>,
    pub(crate) pending: Mutex<Option<PendingRestore>>,
    pub(crate) restore_phase: Mutex<RestoreState>,
    pub(crate) abort: AtomicBool,
    pub(crate) shutdown: Arc<AtomicBool>,
    pub(crate) flush: FlushSignal,
    pub(crate) options: RuntimeOptions,
    autosave: Mutex<Option<AutosaveHandle>>,
}

impl QuickSlot {
    /// Load settings from `settings_store` and bring the subsystem up.
    pub fn start(
        settings_store: SettingsStore,
        host: Arc<dyn Host>,
        options: RuntimeOptions,
    ) -> Result<Arc<Self>> {
        let settings = settings_store.load_or_default()?;
        Self::new(settings, settings_store, host, options)
    }

    /// Build the context from already loaded settings.
    ///
    /// An unknown or misconfigured retention strategy disables the whole
    /// subsystem: the error is reported to the console and returned.
    pub fn new(
        settings: Settings,
        settings_store: SettingsStore,
        host: Arc<dyn Host>,
        options: RuntimeOptions,
    ) -> Result<Arc<Self>> {
        settings.validate()?;

        let strategy = match strategy_from_settings(&settings) {
            Ok(strategy) => strategy,
            Err(e) => {
                error!(strategy = %settings.strategy, error = %e, "Retention strategy unusable, backups disabled");
                host.reply(
                    &Actor::Console,
                    &format!("{MESSAGE_PREFIX}Failed to initialize strategy, backups disabled: {e}"),
                );
                return Err(e);
            }
        };

        let store = SlotStore::new(&settings);
        store.load_all_metadata(settings.slot_count)?;

        info!(
            strategy = strategy.name(),
            interval_secs = strategy.minimum_interval().as_secs(),
            slot_count = settings.slot_count,
            "Backup subsystem ready"
        );

        Ok(Arc::new(Self {
            settings: RwLock::new(settings),
            settings_store,
            strategy,
            store,
            tasks: TaskCoordinator::with_poll_interval(options.admission_poll),
            host,
            pending: Mutex::new(None),
            restore_phase: Mutex::new(RestoreState::Idle),
            abort: AtomicBool::new(false),
            shutdown: Arc::new(AtomicBool::new(false)),
            flush: FlushSignal::new(),
            options,
            autosave: Mutex::new(None),
        }))
    }

    pub fn settings(&self) -> RwLockReadGuard<'_, Settings> {
        self.settings.read()
    }

    pub fn store(&self) -> &SlotStore {
        &self.store
    }

    pub fn tasks(&self) -> &TaskCoordinator {
        &self.tasks
    }

    pub fn strategy(&self) -> &dyn RetentionStrategy {
        self.strategy.as_ref()
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Host hook: the world save requested by a backup has finished.
    pub fn notify_saved(&self) {
        self.flush.notify();
    }

    /// Start the background autosave loop. A second call is a no-op.
    pub fn start_autosave(self: &Arc<Self>) {
        let mut slot = self.autosave.lock();
        if slot.is_none() {
            *slot = Some(AutosaveTimer::new(self).spawn());
        }
    }

    /// Interrupt pending work and wait for the autosave loop to exit.
    pub fn shutdown(&self) {
        self.abort.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
        let handle = self.autosave.lock().take();
        if let Some(mut handle) = handle {
            handle.stop();
        }
        info!("Backup subsystem stopped");
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Direct reply; the autosave actor has nobody to reply to, so it
    /// broadcasts.
    pub(crate) fn tell(&self, actor: &Actor, message: &str) {
        let message = format!("{MESSAGE_PREFIX}{message}");
        match actor {
            Actor::System => self.host.broadcast(&message),
            _ => self.host.reply(actor, &message),
        }
    }

    /// Broadcast when a player triggered it, otherwise reply.
    pub(crate) fn announce(&self, actor: &Actor, message: &str) {
        if actor.is_player() {
            self.host.broadcast(&format!("{MESSAGE_PREFIX}{message}"));
        } else {
            self.tell(actor, message);
        }
    }

    pub(crate) fn tell_raw(&self, actor: &Actor, message: &str) {
        match actor {
            Actor::System => self.host.broadcast(message),
            _ => self.host.reply(actor, message),
        }
    }

    pub(crate) fn waiting_notice<'a>(&'a self, actor: &'a Actor) -> impl FnOnce() + 'a {
        move || self.tell(actor, "Waiting for other tasks to finish...")
    }

    // ------------------------------------------------------------------
    // Slot validation
    // ------------------------------------------------------------------

    /// Parse a slot reference and check it is in range.
    pub fn parse_slot(&self, input: &str) -> Result<u32> {
        let max = self.settings.read().slot_count;
        match input.trim().parse::<u32>() {
            Ok(slot) if (1..=max).contains(&slot) => Ok(slot),
            _ => Err(QuickSlotError::InvalidSlot {
                input: input.to_string(),
                max,
            }),
        }
    }

    /// Parse a slot reference and require it to hold a backup.
    pub fn check_slot(&self, input: &str) -> Result<(u32, SlotMetadata)> {
        let slot = self.parse_slot(input)?;
        let meta = self
            .store
            .read_metadata(slot)
            .ok_or(QuickSlotError::EmptySlot(slot))?;
        Ok((slot, meta))
    }

    pub(crate) fn report_slot_error(&self, actor: &Actor, err: &QuickSlotError) {
        match err {
            QuickSlotError::InvalidSlot { max, .. } => self.tell(
                actor,
                &format!("Invalid slot, expected a number in [1, {max}]"),
            ),
            QuickSlotError::EmptySlot(slot) => {
                self.tell(actor, &format!("Invalid slot, slot {slot} is empty"))
            }
            other => self.tell(actor, &other.to_string()),
        }
    }

    // ------------------------------------------------------------------
    // List / delete
    // ------------------------------------------------------------------

    /// Collect the non-empty slots without reporting.
    pub fn collect_listing(&self, with_size: bool) -> SlotListing {
        let (slot_count, size_display) = {
            let settings = self.settings.read();
            (settings.slot_count, settings.size_display)
        };
        let slots: Vec<_> = (1..=slot_count)
            .filter_map(|slot| self.store.read_metadata(slot).map(|meta| (slot, meta)))
            .collect();
        let total_size =
            (with_size && size_display && !slots.is_empty()).then(|| self.store.total_size());
        SlotListing { slots, total_size }
    }

    /// Show every non-empty slot to `actor`.
    pub fn list(&self, actor: &Actor, with_size: bool) -> Result<SlotListing> {
        let _guard = self.tasks.register(TaskKind::List, self.waiting_notice(actor))?;

        let listing = self.collect_listing(with_size);
        let prefix = self.settings.read().prefix.clone();

        self.tell_raw(actor, "== Slots ==");
        if listing.slots.is_empty() {
            self.tell_raw(actor, "(no backups)");
        }
        for (slot, meta) in &listing.slots {
            self.tell_raw(
                actor,
                &format!(
                    "[Slot {slot}] [restore: {prefix} back {slot}] [delete: {prefix} del {slot}] {meta}"
                ),
            );
        }
        if let Some(size) = listing.total_size {
            self.tell_raw(actor, &format!("Total backup size: {}", format_size(size)));
        }
        Ok(listing)
    }

    /// Delete one slot.
    pub fn delete(&self, actor: &Actor, slot_input: &str) -> Result<()> {
        let _guard = match self.tasks.register(TaskKind::Delete, self.waiting_notice(actor)) {
            Ok(guard) => guard,
            Err(QuickSlotError::Conflict { blocking }) => {
                self.tell(actor, &format!("A {blocking} task is unfinished, delete cancelled"));
                return Err(QuickSlotError::Conflict { blocking });
            }
            Err(e) => return Err(e),
        };

        let (slot, _) = match self.check_slot(slot_input) {
            Ok(checked) => checked,
            Err(e) => {
                self.report_slot_error(actor, &e);
                return Err(e);
            }
        };

        match self.store.remove_slot_contents(slot) {
            Ok(()) => {
                info!(slot, %actor, "Deleted slot");
                self.announce(actor, &format!("Deleted slot {slot}"));
                Ok(())
            }
            Err(e) => {
                error!(slot, error = %e, "Failed to delete slot");
                self.announce(actor, &format!("Delete failed, see the server log: {e}"));
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Apply `change` under settings admission and persist the document.
    ///
    /// If writing fails the in-memory settings are reloaded from disk.
    pub fn update_settings(
        &self,
        actor: &Actor,
        change: impl FnOnce(&mut Settings),
    ) -> Result<()> {
        let _guard = self
            .tasks
            .register(TaskKind::ReconfigureSetting, self.waiting_notice(actor))?;

        let mut settings = self.settings.write();
        change(&mut *settings);
        match self.settings_store.save(&settings) {
            Ok(()) => {
                drop(settings);
                self.tell(actor, "Settings updated");
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Failed to save settings");
                match self.settings_store.load() {
                    Ok(reloaded) => *settings = reloaded,
                    Err(reload_err) => {
                        warn!(error = %reload_err, "Failed to reload settings, keeping in-memory values")
                    }
                }
                drop(settings);
                self.tell(actor, &format!("Saving settings failed: {e}; reloaded from disk"));
                Err(e)
            }
        }
    }

    /// Turn autosave on or off. Returns whether anything changed.
    pub fn set_enabled(&self, actor: &Actor, enabled: bool) -> Result<bool> {
        if self.settings.read().enabled == enabled {
            let state = if enabled { "enabled" } else { "disabled" };
            self.tell(actor, &format!("Automatic backup is already {state}"));
            return Ok(false);
        }
        self.update_settings(actor, |settings| settings.enabled = enabled)?;
        info!(enabled, %actor, "Automatic backup toggled");
        Ok(true)
    }

    /// Change the number of addressable slots.
    pub fn set_slot_count(&self, actor: &Actor, input: &str) -> Result<u32> {
        let count = match input.trim().parse::<u32>() {
            Ok(count) if (1..=MAX_SLOT_COUNT).contains(&count) => count,
            _ => {
                self.tell(actor, &format!("Invalid input, allowed range is [1, {MAX_SLOT_COUNT}]"));
                return Err(QuickSlotError::InvalidSetting(format!(
                    "slot count '{input}' not in [1, {MAX_SLOT_COUNT}]"
                )));
            }
        };
        self.update_settings(actor, |settings| settings.slot_count = count)?;
        info!(slot_count = count, %actor, "Slot count changed");
        Ok(count)
    }
}
