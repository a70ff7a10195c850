//! Durable record of every watched directory and its index.
//!
//! The manifest is a single JSON file in the data directory. Loading never
//! fails: a missing or unreadable manifest yields an empty one, which in
//! turn makes every directory rebuild from scratch.

use std::{collections::BTreeMap, io::Write, path::Path};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    slot::IndexSlot,
};

/// Current on-disk format version.
pub const MANIFEST_VERSION: u32 = 1;

/// Index state of one watched directory.
///
/// Every key in `last_indexed_per_file` names a file that contributed at
/// least one chunk to the index as of `last_update`. Files that produced
/// no chunks are tracked in `skipped_files` so they are not reprocessed
/// until they change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryEntry {
    /// Slot name of the serialized vector index.
    pub index_location: String,
    /// Relative path (`/`-separated) -> mtime in nanoseconds.
    pub last_indexed_per_file: BTreeMap<String, u64>,
    pub skipped_files: BTreeMap<String, u64>,
    /// Live chunks in the index.
    pub document_count: usize,
    /// Stored entries including retired ones.
    pub stored_count: usize,
    /// `None` means the directory was never indexed.
    pub last_update: Option<DateTime<Utc>>,
    /// Set when the embedding configuration changed since the last
    /// rebuild.
    pub stale: bool,
}

impl DirectoryEntry {
    pub fn new(slot: &IndexSlot) -> Self {
        Self {
            index_location: slot.as_str().to_string(),
            ..Self::default()
        }
    }

    pub fn slot(&self) -> IndexSlot {
        IndexSlot::from_name(self.index_location.clone())
    }

    /// Recorded mtime for `key`, whether it was indexed or skipped.
    pub fn recorded_mtime(&self, key: &str) -> Option<u64> {
        self.last_indexed_per_file
            .get(key)
            .or_else(|| self.skipped_files.get(key))
            .copied()
    }

    pub fn file_count(&self) -> usize {
        self.last_indexed_per_file.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Manifest {
    pub version: u32,
    /// Fingerprint of the embedding configuration the indexes were built
    /// with.
    pub config_fingerprint: String,
    pub embedding_model: String,
    /// Canonical directory path -> entry.
    pub directories: BTreeMap<String, DirectoryEntry>,
    pub last_cleanup: Option<DateTime<Utc>>,
}

impl Default for Manifest {
    fn default() -> Self {
        Self {
            version: MANIFEST_VERSION,
            config_fingerprint: String::new(),
            embedding_model: String::new(),
            directories: BTreeMap::new(),
            last_cleanup: None,
        }
    }
}

/// Manifest key of a (canonical) directory path.
pub fn directory_key(directory: &Path) -> String {
    directory.to_string_lossy().into_owned()
}

impl Manifest {
    /// Load the manifest at `path`, falling back to an empty manifest when
    /// it is missing or cannot be parsed.
    pub fn load(path: &Path) -> Self {
        match Self::read(path) {
            Ok(Some(manifest)) => manifest,
            Ok(None) => {
                tracing::debug!(path = %path.display(), "no manifest yet");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    "ignoring unreadable manifest: {e}"
                );
                Self::default()
            }
        }
    }

    fn read(path: &Path) -> Result<Option<Self>> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Write the manifest atomically: a temporary file in the same
    /// directory is flushed, then renamed over `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let fail = |e: std::io::Error| {
            Error::ManifestIo(format!("{}: {e}", path.display()))
        };

        std::fs::create_dir_all(parent).map_err(fail)?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(fail)?;
        serde_json::to_writer_pretty(&mut tmp, self)
            .map_err(|e| fail(e.into()))?;
        tmp.write_all(b"\n").map_err(fail)?;
        tmp.as_file().sync_all().map_err(fail)?;
        tmp.persist(path).map_err(|e| fail(e.error))?;
        Ok(())
    }

    /// Adopt a new embedding configuration fingerprint.
    ///
    /// When it differs from the stored one every entry is marked stale.
    /// Returns whether anything changed.
    pub fn apply_fingerprint(&mut self, fingerprint: &str, model: &str) -> bool {
        if self.config_fingerprint == fingerprint {
            return false;
        }
        for entry in self.directories.values_mut() {
            entry.stale = true;
        }
        self.config_fingerprint = fingerprint.to_string();
        self.embedding_model = model.to_string();
        true
    }

    /// Slot names of every known directory.
    pub fn slots(&self) -> impl Iterator<Item = &str> {
        self.directories.values().map(|e| e.index_location.as_str())
    }
}
