use std::collections::HashSet;

use crate::{manifest::DirectoryEntry, walker::DiscoveredFile};

/// Result of comparing discovered files against a directory entry.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Files with no recorded mtime.
    pub new_files: Vec<DiscoveredFile>,
    /// Files whose mtime is newer than the recorded one.
    pub changed_files: Vec<DiscoveredFile>,
    /// Recorded keys that are no longer on disk.
    pub deleted_keys: Vec<String>,
    pub unchanged: usize,
}

impl DiffResult {
    /// New and changed files, sorted by relative path.
    pub fn modified_files(&self) -> Vec<DiscoveredFile> {
        let mut files: Vec<DiscoveredFile> = self
            .new_files
            .iter()
            .chain(&self.changed_files)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        files
    }

    pub fn has_changes(&self) -> bool {
        !self.new_files.is_empty()
            || !self.changed_files.is_empty()
            || !self.deleted_keys.is_empty()
    }
}

/// Compare discovered files against what `entry` recorded.
///
/// A file counts as changed only when its mtime exceeds the recorded
/// value. Without an entry every file is new.
pub fn diff_directory(
    entry: Option<&DirectoryEntry>,
    discovered: &[DiscoveredFile],
) -> DiffResult {
    let mut result = DiffResult::default();
    let mut seen = HashSet::new();

    for file in discovered {
        let key = file.key();
        match entry.and_then(|e| e.recorded_mtime(&key)) {
            None => result.new_files.push(file.clone()),
            Some(recorded) if file.mtime > recorded => {
                result.changed_files.push(file.clone());
            }
            Some(_) => result.unchanged += 1,
        }
        seen.insert(key);
    }

    if let Some(entry) = entry {
        result.deleted_keys = entry
            .last_indexed_per_file
            .keys()
            .chain(entry.skipped_files.keys())
            .filter(|key| !seen.contains(key.as_str()))
            .cloned()
            .collect();
        result.deleted_keys.sort();
    }

    result
}
