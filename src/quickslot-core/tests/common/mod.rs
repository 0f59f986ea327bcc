//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::Local;
use parking_lot::Mutex;
use tempfile::TempDir;

use quickslot_core::{
    Actor, Host, QuickSlot, RuntimeOptions, Settings, SettingsStore, SlotMetadata, ThresholdSpec,
};

// =============================================================================
// Recording host
// =============================================================================

/// Host double. Flushes are acknowledged right away unless `hold_flush` is
/// set, in which case the test calls `QuickSlot::notify_saved` itself.
pub struct RecordingHost {
    pub calls: Mutex<Vec<&'static str>>,
    pub messages: Mutex<Vec<String>>,
    pub hold_flush: AtomicBool,
    context: Mutex<Option<Weak<QuickSlot>>>,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            hold_flush: AtomicBool::new(false),
            context: Mutex::new(None),
        })
    }

    pub fn attach(&self, qs: &Arc<QuickSlot>) {
        *self.context.lock() = Some(Arc::downgrade(qs));
    }

    pub fn called(&self, call: &str) -> bool {
        self.calls.lock().iter().any(|c| *c == call)
    }

    pub fn saw(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }
}

impl Host for RecordingHost {
    fn suspend_autosave(&self) -> quickslot_core::Result<()> {
        self.calls.lock().push("suspend_autosave");
        Ok(())
    }

    fn resume_autosave(&self) -> quickslot_core::Result<()> {
        self.calls.lock().push("resume_autosave");
        Ok(())
    }

    fn force_flush(&self) -> quickslot_core::Result<()> {
        self.calls.lock().push("force_flush");
        if !self.hold_flush.load(Ordering::SeqCst) {
            if let Some(qs) = self.context.lock().as_ref().and_then(Weak::upgrade) {
                qs.notify_saved();
            }
        }
        Ok(())
    }

    fn stop_live_process(&self) -> quickslot_core::Result<()> {
        self.calls.lock().push("stop_live_process");
        Ok(())
    }

    fn wait_until_stopped(&self) -> quickslot_core::Result<()> {
        self.calls.lock().push("wait_until_stopped");
        Ok(())
    }

    fn start_live_process(&self) -> quickslot_core::Result<()> {
        self.calls.lock().push("start_live_process");
        Ok(())
    }

    fn permission_level(&self, actor: &Actor) -> u8 {
        match actor {
            Actor::Console | Actor::System => 4,
            Actor::Player(_) => 2,
        }
    }

    fn reply(&self, actor: &Actor, message: &str) {
        self.messages.lock().push(format!("{actor}: {message}"));
    }

    fn broadcast(&self, message: &str) {
        self.messages.lock().push(format!("*: {message}"));
    }
}

// =============================================================================
// Fixtures
// =============================================================================

pub fn fast_options() -> RuntimeOptions {
    RuntimeOptions {
        restore_countdown: Duration::from_millis(200),
        countdown_tick: Duration::from_millis(10),
        admission_poll: Duration::from_millis(2),
        flush_timeout: Duration::from_secs(5),
        flush_poll: Duration::from_millis(5),
    }
}

pub fn write_world(server: &Path, content: &[u8]) {
    let world = server.join("world");
    fs::create_dir_all(&world).unwrap();
    fs::write(world.join("level.dat"), content).unwrap();
    fs::write(world.join("session.lock"), b"lock").unwrap();
}

/// Seed `slotN` with a backup `minutes_old` minutes old.
pub fn seed_slot(backups: &Path, slot: u32, minutes_old: i64, comment: &str) {
    let folder = backups.join(format!("slot{slot}"));
    let world = folder.join("world");
    fs::create_dir_all(&world).unwrap();
    fs::write(world.join("level.dat"), comment.as_bytes()).unwrap();

    let created = Local::now() - chrono::Duration::minutes(minutes_old);
    let meta = SlotMetadata::new(created, comment);
    fs::write(folder.join("info.json"), serde_json::to_string(&meta).unwrap()).unwrap();
}

pub fn settings(temp: &TempDir, slot_count: u32, thresholds: &[&str]) -> Settings {
    Settings {
        slot_count,
        backup_path: temp.path().join("backups"),
        server_path: temp.path().join("server"),
        strategy_config: thresholds.iter().map(|&t| ThresholdSpec::from(t)).collect(),
        ..Default::default()
    }
}

pub fn start(temp: &TempDir, settings: Settings) -> (Arc<QuickSlot>, Arc<RecordingHost>) {
    let host = RecordingHost::new();
    let store = SettingsStore::new(temp.path().join("quickslot.toml"));
    store.save(&settings).unwrap();
    let qs = QuickSlot::new(settings, store, host.clone(), fast_options()).unwrap();
    host.attach(&qs);
    (qs, host)
}

pub fn wait_until(mut condition: impl FnMut() -> bool) {
    let started = Instant::now();
    while !condition() {
        assert!(started.elapsed() < Duration::from_secs(5), "timed out waiting");
        std::thread::sleep(Duration::from_millis(2));
    }
}
