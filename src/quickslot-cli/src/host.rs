//! Host for a server directory whose writer runs outside this process.
//!
//! Each host operation runs the matching shell command from the `[host]`
//! settings table in the server directory. Unset commands are no-ops, and a
//! flush counts as finished as soon as its command exits.

use parking_lot::Mutex;
use std::path::PathBuf;
use std::process::Command;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use quickslot_core::{Actor, Host, HostCommands, QuickSlot, QuickSlotError, Result};

/// Permission level of the local console operator.
pub const CONSOLE_PERMISSION_LEVEL: u8 = 4;

pub struct LocalHost {
    commands: HostCommands,
    workdir: PathBuf,
    context: Mutex<Option<Weak<QuickSlot>>>,
}

impl LocalHost {
    pub fn new(commands: HostCommands, workdir: PathBuf) -> Self {
        Self {
            commands,
            workdir,
            context: Mutex::new(None),
        }
    }

    /// Route flush completions to `qs`.
    pub fn attach(&self, qs: &Arc<QuickSlot>) {
        *self.context.lock() = Some(Arc::downgrade(qs));
    }

    fn run(&self, what: &str, command: Option<&str>) -> Result<()> {
        let Some(command) = command else {
            debug!(what, "No host command configured");
            return Ok(());
        };

        info!(what, command, "Running host command");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.workdir)
            .status()
            .map_err(|e| QuickSlotError::Host(format!("{what}: failed to run '{command}': {e}")))?;

        if status.success() {
            Ok(())
        } else {
            warn!(what, command, %status, "Host command failed");
            Err(QuickSlotError::Host(format!("{what}: '{command}' exited with {status}")))
        }
    }
}

impl Host for LocalHost {
    fn suspend_autosave(&self) -> Result<()> {
        self.run("save-off", self.commands.save_off_command.as_deref())
    }

    fn resume_autosave(&self) -> Result<()> {
        self.run("save-on", self.commands.save_on_command.as_deref())
    }

    fn force_flush(&self) -> Result<()> {
        self.run("flush", self.commands.flush_command.as_deref())?;
        let qs = self.context.lock().as_ref().and_then(Weak::upgrade);
        match qs {
            Some(qs) => qs.notify_saved(),
            None => warn!("Flush finished but no backup context is attached"),
        }
        Ok(())
    }

    fn stop_live_process(&self) -> Result<()> {
        self.run("stop", self.commands.stop_command.as_deref())
    }

    fn wait_until_stopped(&self) -> Result<()> {
        // The stop command only returns once the server is down.
        Ok(())
    }

    fn start_live_process(&self) -> Result<()> {
        self.run("start", self.commands.start_command.as_deref())
    }

    fn permission_level(&self, actor: &Actor) -> u8 {
        match actor {
            Actor::Console | Actor::System => CONSOLE_PERMISSION_LEVEL,
            Actor::Player(_) => 0,
        }
    }

    fn reply(&self, _actor: &Actor, message: &str) {
        println!("{message}");
    }

    fn broadcast(&self, message: &str) {
        println!("{message}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn host(temp: &TempDir, commands: HostCommands) -> LocalHost {
        LocalHost::new(commands, temp.path().to_path_buf())
    }

    #[test]
    fn test_unset_commands_are_noops() {
        let temp = TempDir::new().unwrap();
        let host = host(&temp, HostCommands::default());
        host.suspend_autosave().unwrap();
        host.force_flush().unwrap();
        host.stop_live_process().unwrap();
        host.start_live_process().unwrap();
    }

    #[test]
    fn test_commands_run_in_workdir() {
        let temp = TempDir::new().unwrap();
        let host = host(&temp, HostCommands {
            flush_command: Some("echo saved > flushed.txt".to_string()),
            ..Default::default()
        });
        host.force_flush().unwrap();
        assert_eq!(fs::read_to_string(temp.path().join("flushed.txt")).unwrap().trim(), "saved");
    }

    #[test]
    fn test_failing_command_is_host_error() {
        let temp = TempDir::new().unwrap();
        let host = host(&temp, HostCommands {
            stop_command: Some("exit 3".to_string()),
            ..Default::default()
        });
        let err = host.stop_live_process().unwrap_err();
        assert!(matches!(err, QuickSlotError::Host(_)));
    }

    #[test]
    fn test_permission_levels() {
        let temp = TempDir::new().unwrap();
        let host = host(&temp, HostCommands::default());
        assert_eq!(host.permission_level(&Actor::Console), CONSOLE_PERMISSION_LEVEL);
        assert_eq!(host.permission_level(&Actor::Player("x".into())), 0);
    }
}
