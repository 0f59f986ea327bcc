//! Interactive console: one operator command per stdin line.
//!
//! Commands run on the blocking pool so `abort` can be typed while a restore
//! countdown is in progress. Stdin is read on a plain thread; a blocked read
//! on the runtime's pool would hold up runtime shutdown.

use anyhow::Result;
use std::io::BufRead;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use quickslot_core::{Actor, QuickSlot, dispatch};

/// Lines that end the console.
const EXIT_WORDS: [&str; 2] = ["exit", "quit"];

/// Handle one console line. Returns false when the console should exit.
pub fn handle_line(qs: &QuickSlot, line: &str) -> bool {
    let line = line.trim();
    if line.is_empty() {
        return true;
    }
    if EXIT_WORDS.contains(&line) {
        return false;
    }
    if !dispatch(qs, &Actor::Console, line) {
        let prefix = qs.settings().prefix.clone();
        println!("Unknown command, type {prefix} for help");
    }
    true
}

fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    let spawned = thread::Builder::new()
        .name("quickslot-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                match line {
                    Ok(line) => {
                        if tx.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to read console input");
                        break;
                    }
                }
            }
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to spawn console reader");
    }
    rx
}

/// Read commands until EOF, `exit` or Ctrl+C, then shut the subsystem down.
pub async fn run(qs: Arc<QuickSlot>) -> Result<()> {
    let mut lines = spawn_stdin_reader();
    let mut in_flight = JoinSet::new();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down");
                break;
            }
            line = lines.recv() => {
                let Some(line) = line else {
                    debug!("Console input closed");
                    break;
                };
                if EXIT_WORDS.contains(&line.trim()) {
                    break;
                }
                let qs = Arc::clone(&qs);
                in_flight.spawn_blocking(move || handle_line(&qs, &line));
            }
            Some(done) = in_flight.join_next(), if !in_flight.is_empty() => {
                if let Err(e) = done {
                    warn!(error = %e, "Console command panicked");
                }
            }
        }
    }

    let stopping = Arc::clone(&qs);
    tokio::task::spawn_blocking(move || stopping.shutdown()).await?;
    while let Some(done) = in_flight.join_next().await {
        if let Err(e) = done {
            warn!(error = %e, "Console command panicked");
        }
    }
    Ok(())
}
