//! Shared fixtures for unit tests.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tempfile::TempDir;

use crate::host::{Actor, Host};
use crate::manager::{QuickSlot, RuntimeOptions};
use crate::settings::{Settings, SettingsStore};
use crate::Result;

/// Host double that records every call and message.
pub struct MockHost {
    calls: Mutex<Vec<String>>,
    messages: Mutex<Vec<String>>,
    context: Mutex<Option<Weak<QuickSlot>>>,
    ack_flush: AtomicBool,
    levels: Mutex<HashMap<Actor, u8>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            messages: Mutex::new(Vec::new()),
            context: Mutex::new(None),
            ack_flush: AtomicBool::new(true),
            levels: Mutex::new(HashMap::from([(Actor::Console, 4)])),
        }
    }

    /// Route flush acknowledgements to `qs`.
    pub fn attach(&self, qs: &Arc<QuickSlot>) {
        *self.context.lock() = Some(Arc::downgrade(qs));
    }

    pub fn set_ack_flush(&self, ack: bool) {
        self.ack_flush.store(ack, Ordering::SeqCst);
    }

    pub fn set_level(&self, actor: Actor, level: u8) {
        self.levels.lock().insert(actor, level);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    /// Whether any message so far contains `needle`.
    pub fn saw(&self, needle: &str) -> bool {
        self.messages.lock().iter().any(|m| m.contains(needle))
    }

    fn record(&self, call: &str) {
        self.calls.lock().push(call.to_string());
    }
}

impl Host for MockHost {
    fn suspend_autosave(&self) -> Result<()> {
        self.record("suspend_autosave");
        Ok(())
    }

    fn resume_autosave(&self) -> Result<()> {
        self.record("resume_autosave");
        Ok(())
    }

    fn force_flush(&self) -> Result<()> {
        self.record("force_flush");
        if self.ack_flush.load(Ordering::SeqCst) {
            let qs = self.context.lock().as_ref().and_then(Weak::upgrade);
            if let Some(qs) = qs {
                qs.notify_saved();
            }
        }
        Ok(())
    }

    fn stop_live_process(&self) -> Result<()> {
        self.record("stop_live_process");
        Ok(())
    }

    fn wait_until_stopped(&self) -> Result<()> {
        self.record("wait_until_stopped");
        Ok(())
    }

    fn start_live_process(&self) -> Result<()> {
        self.record("start_live_process");
        Ok(())
    }

    fn permission_level(&self, actor: &Actor) -> u8 {
        self.levels.lock().get(actor).copied().unwrap_or(0)
    }

    fn reply(&self, actor: &Actor, message: &str) {
        self.messages.lock().push(format!("{actor}: {message}"));
    }

    fn broadcast(&self, message: &str) {
        self.messages.lock().push(format!("*: {message}"));
    }
}

/// Runtime options short enough for tests.
pub fn fast_options() -> RuntimeOptions {
    RuntimeOptions {
        restore_countdown: Duration::from_millis(300),
        countdown_tick: Duration::from_millis(10),
        admission_poll: Duration::from_millis(2),
        flush_timeout: Duration::from_millis(200),
        flush_poll: Duration::from_millis(5),
    }
}

/// A temp server with one world, an empty backup directory and a saved
/// settings file at `<temp>/quickslot.toml`.
pub fn fixture(slot_count: u32) -> (TempDir, Arc<QuickSlot>, Arc<MockHost>) {
    let temp = TempDir::new().unwrap();
    let world = temp.path().join("server").join("world");
    fs::create_dir_all(world.join("region")).unwrap();
    fs::write(world.join("level.dat"), b"live").unwrap();
    fs::write(world.join("region").join("r.0.0.mca"), b"chunk").unwrap();
    fs::write(world.join("session.lock"), b"lock").unwrap();

    let settings = Settings {
        slot_count,
        backup_path: temp.path().join("backups"),
        server_path: temp.path().join("server"),
        ..Default::default()
    };
    let settings_store = SettingsStore::new(temp.path().join("quickslot.toml"));
    settings_store.save(&settings).unwrap();

    let host = Arc::new(MockHost::new());
    let qs = QuickSlot::new(settings, settings_store, host.clone(), fast_options()).unwrap();
    host.attach(&qs);
    (temp, qs, host)
}
