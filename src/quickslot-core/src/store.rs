//! On-disk slot layout and the in-memory metadata cache.
//!
//! ```text
//! <backup_path>/
//!     slot1/          newest
//!         info.json
//!         world/
//!     slot2/
//!     ...
//!     overwrite/      safety copy taken before every restore
//!         info.txt
//!         world/
//! ```
//!
//! A slot without `info.json` is empty, whatever else its directory holds.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::fs_ops::{self, SESSION_LOCK_FILE};
use crate::host::Actor;
use crate::settings::Settings;
use crate::slot::{SlotMetadata, format_time};
use crate::Result;

/// Metadata file name inside each slot.
pub const METADATA_FILE: &str = "info.json";

/// Note written into the safety copy.
pub const SAFETY_NOTE_FILE: &str = "info.txt";

/// Slot directories plus a cache of their metadata.
#[derive(Debug)]
pub struct SlotStore {
    backup_path: PathBuf,
    server_path: PathBuf,
    overwrite_folder: PathBuf,
    world_names: Vec<String>,
    ignore_session_lock: bool,
    cache: Mutex<BTreeMap<u32, SlotMetadata>>,
}

impl SlotStore {
    pub fn new(settings: &Settings) -> Self {
        Self {
            backup_path: settings.backup_path.clone(),
            server_path: settings.server_path.clone(),
            overwrite_folder: settings.overwrite_folder(),
            world_names: settings.world_names.clone(),
            ignore_session_lock: settings.ignore_session_lock,
            cache: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    pub fn server_path(&self) -> &Path {
        &self.server_path
    }

    pub fn overwrite_folder(&self) -> &Path {
        &self.overwrite_folder
    }

    pub fn world_names(&self) -> &[String] {
        &self.world_names
    }

    fn skip_file(&self) -> Option<&'static str> {
        self.ignore_session_lock.then_some(SESSION_LOCK_FILE)
    }

    pub fn folder_for(&self, slot: u32) -> PathBuf {
        self.backup_path.join(format!("slot{slot}"))
    }

    fn metadata_path(&self, slot: u32) -> PathBuf {
        self.folder_for(slot).join(METADATA_FILE)
    }

    /// Read `info.json` from disk. Missing or unreadable means empty.
    pub fn read_metadata(&self, slot: u32) -> Option<SlotMetadata> {
        let path = self.metadata_path(slot);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(slot, error = %e, "Failed to read slot metadata");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(slot, error = %e, "Slot metadata is malformed");
                None
            }
        }
    }

    pub fn write_metadata(&self, slot: u32, meta: &SlotMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(meta)?;
        fs_ops::atomic_write(self.metadata_path(slot), json.as_bytes())?;
        debug!(slot, "Wrote slot metadata");
        Ok(())
    }

    /// Populate the cache from slots `1..=slot_count`.
    pub fn load_all_metadata(&self, slot_count: u32) -> Result<usize> {
        fs::create_dir_all(&self.backup_path)?;
        let mut cache = self.cache.lock();
        cache.clear();
        for slot in 1..=slot_count {
            if !self.folder_for(slot).is_dir() {
                continue;
            }
            match self.read_metadata(slot) {
                Some(meta) => {
                    cache.insert(slot, meta);
                }
                None => warn!(slot, "Slot directory has no readable metadata, treating as empty"),
            }
        }
        info!(slots = cache.len(), "Loaded slot metadata");
        Ok(cache.len())
    }

    pub fn cached(&self, slot: u32) -> Option<SlotMetadata> {
        self.cache.lock().get(&slot).cloned()
    }

    /// Snapshot of the cache.
    pub fn cached_slots(&self) -> BTreeMap<u32, SlotMetadata> {
        self.cache.lock().clone()
    }

    pub fn set_cached(&self, slot: u32, meta: SlotMetadata) {
        self.cache.lock().insert(slot, meta);
    }

    /// Copy the live worlds into `slot`, which must be empty.
    pub fn copy_live_into(&self, slot: u32) -> Result<u64> {
        let dst = self.folder_for(slot);
        let bytes = fs_ops::copy_worlds(&self.server_path, &dst, &self.world_names, self.skip_file())?;
        info!(slot, bytes, "Copied live worlds into slot");
        Ok(bytes)
    }

    /// Copy a slot's worlds over the (already cleared) live directory.
    pub fn copy_slot_to_live(&self, slot: u32) -> Result<u64> {
        let src = self.folder_for(slot);
        let bytes = fs_ops::copy_worlds(&src, &self.server_path, &self.world_names, None)?;
        info!(slot, bytes, "Copied slot into live directory");
        Ok(bytes)
    }

    /// Delete the live worlds.
    pub fn remove_live_worlds(&self) -> Result<()> {
        fs_ops::remove_worlds(&self.server_path, &self.world_names)
    }

    /// Delete a slot directory and forget its metadata.
    pub fn remove_slot_contents(&self, slot: u32) -> Result<()> {
        let folder = self.folder_for(slot);
        match fs::remove_dir_all(&folder) {
            Ok(()) => debug!(slot, "Removed slot directory"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.cache.lock().remove(&slot);
        Ok(())
    }

    /// Rename slot `from` to `to`, carrying its cache entry. `to` must be free.
    pub fn move_slot(&self, from: u32, to: u32) -> Result<()> {
        let src = self.folder_for(from);
        let dst = self.folder_for(to);

        if dst.exists() {
            // Stale directory without metadata.
            fs::remove_dir_all(&dst)?;
        }
        if src.exists() {
            fs::rename(&src, &dst)?;
        }

        let mut cache = self.cache.lock();
        match cache.remove(&from) {
            Some(meta) => {
                cache.insert(to, meta);
            }
            None => {
                cache.remove(&to);
            }
        }
        debug!(from, to, "Moved slot");
        Ok(())
    }

    /// Replace the safety copy with the current live worlds.
    pub fn write_safety_copy(&self, actor: &Actor) -> Result<()> {
        let folder = &self.overwrite_folder;
        match fs::remove_dir_all(folder) {
            Ok(()) => debug!(path = %folder.display(), "Removed previous safety copy"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        // An earlier failed swap can leave the live directory empty.
        let present: Vec<String> = self
            .world_names
            .iter()
            .filter(|world| {
                let exists = self.server_path.join(world.as_str()).is_dir();
                if !exists {
                    warn!(world = world.as_str(), "Live world missing, left out of safety copy");
                }
                exists
            })
            .cloned()
            .collect();
        fs_ops::copy_worlds(&self.server_path, folder, &present, self.skip_file())?;

        let note = format!(
            "Overwrite time: {}\nConfirmed by: {}",
            format_time(chrono::Local::now()),
            actor
        );
        fs::write(folder.join(SAFETY_NOTE_FILE), note)?;
        info!(path = %folder.display(), %actor, "Saved safety copy of live worlds");
        Ok(())
    }

    /// Bytes used by the whole backup directory.
    pub fn total_size(&self) -> u64 {
        fs_ops::dir_size(&self.backup_path)
    }
}
