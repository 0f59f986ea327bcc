//! Filesystem helpers for world directories and settings persistence.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::{QuickSlotError, Result};

/// Lock file the server holds while a world is open.
pub const SESSION_LOCK_FILE: &str = "session.lock";

/// Temp file suffix for atomic writes.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Recursively copy `src` into `dst`, skipping files named `skip_file`.
///
/// `dst` must not exist yet or must be an empty directory.
pub fn copy_tree(src: &Path, dst: &Path, skip_file: Option<&str>) -> Result<u64> {
    let copy_err = |path: &Path, source: io::Error| QuickSlotError::Copy {
        path: path.to_path_buf(),
        source,
    };

    if !src.is_dir() {
        return Err(copy_err(
            src,
            io::Error::new(io::ErrorKind::NotFound, "source directory does not exist"),
        ));
    }

    let mut bytes = 0u64;
    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(src).to_path_buf();
            copy_err(&path, io::Error::other(e.to_string()))
        })?;

        let relative = entry
            .path()
            .strip_prefix(src)
            .map_err(|e| copy_err(entry.path(), io::Error::other(e.to_string())))?;
        let target = dst.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target).map_err(|e| copy_err(&target, e))?;
        } else if file_type.is_file() {
            if skip_file.is_some_and(|skip| entry.file_name() == skip) {
                debug!(path = %entry.path().display(), "Skipping lock file");
                continue;
            }
            bytes += fs::copy(entry.path(), &target).map_err(|e| copy_err(entry.path(), e))?;
        } else {
            debug!(path = %entry.path().display(), "Skipping non-regular file");
        }
    }

    Ok(bytes)
}

/// Copy every tracked world from `src_root` into `dst_root`.
///
/// Stops at the first failing world; the caller decides what a partial
/// destination means.
pub fn copy_worlds(
    src_root: &Path,
    dst_root: &Path,
    worlds: &[String],
    skip_file: Option<&str>,
) -> Result<u64> {
    fs::create_dir_all(dst_root)?;
    let mut total = 0;
    for world in worlds {
        total += copy_tree(&src_root.join(world), &dst_root.join(world), skip_file)?;
    }
    Ok(total)
}

/// Remove every tracked world below `root`. Missing worlds are fine.
pub fn remove_worlds(root: &Path, worlds: &[String]) -> Result<()> {
    for world in worlds {
        let path = root.join(world);
        match fs::remove_dir_all(&path) {
            Ok(()) => debug!(path = %path.display(), "Removed world"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Total size in bytes of regular files below `path`.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!(error = %e, "Skipping unreadable entry while sizing");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}

/// Human-readable size: MB below 1 GiB, GB above.
pub fn format_size(bytes: u64) -> String {
    const MIB: f64 = (1u64 << 20) as f64;
    const GIB: u64 = 1 << 30;
    if bytes < GIB {
        format!("{:.2} MB", bytes as f64 / MIB)
    } else {
        format!("{:.2} GB", bytes as f64 / GIB as f64)
    }
}

/// Write data to a file atomically using temp file + rename.
pub fn atomic_write<P: AsRef<Path>>(path: P, data: &[u8]) -> io::Result<()> {
    let path = path.as_ref();
    let temp_path = path.with_extension(format!(
        "{}{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        TEMP_SUFFIX
    ));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = File::create(&temp_path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(data)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;

    fs::rename(&temp_path, path)?;

    debug!(path = %path.display(), "Atomic write completed");
    Ok(())
}
