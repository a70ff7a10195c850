use std::path::Path;

/// Prefix shared by every index slot directory name.
pub const SLOT_PREFIX: &str = "index_";

/// Number of hex characters of the path hash kept in a slot name.
const SLOT_HASH_LEN: usize = 10;

/// A stable storage slot name derived from a watched directory path.
///
/// The same directory path always maps to the same slot, across runs and
/// across processes, so re-indexing a directory reuses its storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexSlot(String);

impl IndexSlot {
    /// Derive the slot for a (canonicalized) directory path.
    pub fn for_directory(directory: &Path) -> Self {
        let hash = blake3::hash(directory.to_string_lossy().as_bytes());
        let hex = hash.to_hex();
        Self(format!("{SLOT_PREFIX}{}", &hex[..SLOT_HASH_LEN]))
    }

    /// Wrap an existing slot name, e.g. one read back from the manifest.
    pub fn from_name(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether a directory name looks like an index slot.
    pub fn is_slot_name(name: &str) -> bool {
        name.strip_prefix(SLOT_PREFIX).is_some_and(|rest| {
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_hexdigit())
        })
    }
}

impl std::fmt::Display for IndexSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
