//! Operator command surface: `<prefix> <sub-command> [arg]`.

use tracing::debug;

use crate::host::Actor;
use crate::manager::QuickSlot;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Enable,
    Disable,
    /// Change the slot count.
    Slot(String),
    /// Select a slot to restore.
    Back(String),
    Confirm,
    Abort,
    List,
    Del(String),
    /// Prefix matched but the rest did not.
    Usage,
}

impl Command {
    /// Parse a console or chat line. `None` when it does not start with
    /// `prefix`.
    pub fn parse(line: &str, prefix: &str) -> Option<Self> {
        let words: Vec<&str> = line.split_whitespace().collect();
        if words.first() != Some(&prefix) {
            return None;
        }

        let command = match words[1..] {
            [] | ["help"] => Self::Help,
            ["enable"] => Self::Enable,
            ["disable"] => Self::Disable,
            ["slot", count] => Self::Slot(count.to_string()),
            ["back"] => Self::Back("1".to_string()),
            ["back", slot] => Self::Back(slot.to_string()),
            ["confirm"] => Self::Confirm,
            ["abort"] => Self::Abort,
            ["list"] => Self::List,
            ["del", slot] => Self::Del(slot.to_string()),
            _ => Self::Usage,
        };
        Some(command)
    }

    /// Key into `minimum_permission_level`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Help | Self::Usage => "help",
            Self::Enable => "enable",
            Self::Disable => "disable",
            Self::Slot(_) => "slot",
            Self::Back(_) => "back",
            Self::Confirm => "confirm",
            Self::Abort => "abort",
            Self::List => "list",
            Self::Del(_) => "del",
        }
    }

    /// Help and abort are always allowed.
    pub fn is_gated(&self) -> bool {
        !matches!(self, Self::Help | Self::Usage | Self::Abort)
    }
}

const HELP: &str = "\
------ QuickSlot ------
Rotating slot backups of the live world.
{p} - show this help
{p} enable - turn on automatic backups
{p} disable - turn off automatic backups
{p} slot <count> - set the number of slots (1-1000)
{p} back [<slot>] - restore the world from <slot> (default 1)
{p} confirm - confirm a selected restore
{p} abort - cancel a restore at any time
{p} list - show all backups
{p} del <slot> - delete a backup";

/// Parse and run one command line for `actor`. Returns false when the line
/// is not addressed to us.
pub fn dispatch(qs: &QuickSlot, actor: &Actor, line: &str) -> bool {
    let prefix = qs.settings().prefix.clone();
    let Some(command) = Command::parse(line, &prefix) else {
        return false;
    };
    debug!(%actor, ?command, "Dispatching command");

    if command.is_gated() {
        let required = qs.settings().required_level(command.name());
        if let Some(required) = required {
            if qs.host.permission_level(actor) < required {
                qs.tell(actor, "Insufficient permission");
                return true;
            }
        }
    }

    // Outcomes are already reported to the actor.
    match command {
        Command::Help => print_help(qs, actor, &prefix),
        Command::Enable => {
            let _ = qs.set_enabled(actor, true);
        }
        Command::Disable => {
            let _ = qs.set_enabled(actor, false);
        }
        Command::Slot(count) => {
            let _ = qs.set_slot_count(actor, &count);
        }
        Command::Back(slot) => {
            let _ = qs.select_restore(actor, &slot);
        }
        Command::Confirm => {
            let _ = qs.confirm_restore(actor);
        }
        Command::Abort => qs.abort_restore(actor),
        Command::List => {
            let _ = qs.list(actor, true);
        }
        Command::Del(slot) => {
            let _ = qs.delete(actor, &slot);
        }
        Command::Usage => qs.tell(actor, &format!("Invalid arguments, type {prefix} for help")),
    }
    true
}

fn print_help(qs: &QuickSlot, actor: &Actor, prefix: &str) {
    for line in HELP.replace("{p}", prefix).lines() {
        qs.tell_raw(actor, line);
    }
    let _ = qs.list(actor, false);
    qs.tell_raw(actor, &format!("Quick restore of the latest backup: {prefix} back"));
}
