//! Interface to the process that owns the live world directory.

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::{QuickSlotError, Result};

/// Who invoked an operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Actor {
    /// Server console operator.
    Console,
    /// An in-game player.
    Player(String),
    /// The autosave timer.
    System,
}

impl Actor {
    pub fn is_player(&self) -> bool {
        matches!(self, Self::Player(_))
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => f.write_str("$Console$"),
            Self::Player(name) => f.write_str(name),
            Self::System => f.write_str("$Autosave$"),
        }
    }
}

/// Operations the backup subsystem needs from the server host.
///
/// Flush completion is reported asynchronously: after [`Host::force_flush`]
/// returns, the host calls [`FlushSignal::notify`] on the signal it was given
/// (see `QuickSlot::notify_saved`) once the world is on disk.
pub trait Host: Send + Sync {
    /// Stop the server's own periodic saving.
    fn suspend_autosave(&self) -> Result<()>;

    fn resume_autosave(&self) -> Result<()>;

    /// Ask the server to write everything to disk.
    fn force_flush(&self) -> Result<()>;

    fn stop_live_process(&self) -> Result<()>;

    /// Block until the server process has fully exited.
    fn wait_until_stopped(&self) -> Result<()>;

    fn start_live_process(&self) -> Result<()>;

    fn permission_level(&self, actor: &Actor) -> u8;

    /// Message to the invoking actor only.
    fn reply(&self, actor: &Actor, message: &str);

    /// Message to everyone.
    fn broadcast(&self, message: &str);
}

/// One-shot "world saved" notification between the host and a backup.
#[derive(Debug, Default)]
pub struct FlushSignal {
    saved: Mutex<bool>,
    changed: Condvar,
}

impl FlushSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm the signal before requesting a flush.
    pub fn reset(&self) {
        *self.saved.lock() = false;
    }

    /// Called by the host once the save has completed.
    pub fn notify(&self) {
        *self.saved.lock() = true;
        self.changed.notify_all();
    }

    /// Wait until notified, re-checking `shutdown` every `poll` and giving up
    /// after `timeout`.
    pub fn wait(&self, timeout: Duration, poll: Duration, shutdown: &AtomicBool) -> Result<()> {
        let deadline = Instant::now() + timeout;
        let mut saved = self.saved.lock();
        loop {
            if *saved {
                return Ok(());
            }
            if shutdown.load(Ordering::SeqCst) {
                return Err(QuickSlotError::Interrupted);
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(QuickSlotError::FlushTimeout(timeout.as_secs()));
            }
            self.changed.wait_for(&mut saved, poll.min(deadline - now));
        }
    }
}
