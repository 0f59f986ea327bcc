//! Background timer that takes a backup every retention interval.

use parking_lot::{Condvar, Mutex};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

use crate::host::Actor;
use crate::manager::QuickSlot;

#[derive(Debug, Default)]
struct StopSignal {
    stopped: Mutex<bool>,
    changed: Condvar,
}

impl StopSignal {
    fn stop(&self) {
        *self.stopped.lock() = true;
        self.changed.notify_all();
    }

    /// Sleep for `period` unless stopped first. Returns true when stopped.
    fn wait(&self, period: Duration) -> bool {
        let deadline = Instant::now() + period;
        let mut stopped = self.stopped.lock();
        while !*stopped {
            if self.changed.wait_until(&mut stopped, deadline).timed_out() {
                break;
            }
        }
        *stopped
    }
}

/// Periodic backup trigger.
pub struct AutosaveTimer {
    context: Weak<QuickSlot>,
    interval: Duration,
}

impl AutosaveTimer {
    /// Timer firing at the strategy's minimum interval.
    pub fn new(qs: &Arc<QuickSlot>) -> Self {
        Self {
            context: Arc::downgrade(qs),
            interval: qs.strategy().minimum_interval(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run one tick: back up if enabled. Returns false once the context is gone
    /// or shutting down.
    fn tick(&self) -> bool {
        let Some(qs) = self.context.upgrade() else {
            return false;
        };
        if qs.is_shutting_down() {
            return false;
        }
        if !qs.settings().enabled {
            debug!("Automatic backup disabled, skipping tick");
            return true;
        }
        if let Err(e) = qs.schedule_backup(&Actor::System) {
            error!(error = %e, "Scheduled backup failed");
        }
        true
    }

    /// Start the timer thread.
    pub fn spawn(self) -> AutosaveHandle {
        let signal = Arc::new(StopSignal::default());
        let thread_signal = Arc::clone(&signal);

        let thread = thread::Builder::new()
            .name("quickslot-autosave".to_string())
            .spawn(move || {
                info!(interval_secs = self.interval.as_secs(), "Autosave timer started");
                loop {
                    if thread_signal.wait(self.interval) {
                        break;
                    }
                    if !self.tick() {
                        break;
                    }
                }
                info!("Autosave timer stopped");
            });

        let thread = match thread {
            Ok(thread) => Some(thread),
            Err(e) => {
                error!(error = %e, "Failed to spawn autosave thread");
                None
            }
        };

        AutosaveHandle { signal, thread }
    }
}

/// Handle for stopping the autosave timer.
pub struct AutosaveHandle {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl AutosaveHandle {
    /// Stop the timer and wait for an in-flight backup to finish.
    pub fn stop(&mut self) {
        self.signal.stop();
        if let Some(handle) = self.thread.take() {
            // The timer thread may itself drop the last context reference.
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Drop for AutosaveHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
