use std::path::{Path, PathBuf};

use crate::{
    error::{Error, Result},
    slot::IndexSlot,
};

/// Name of the manifest file inside the data directory.
pub const MANIFEST_FILENAME: &str = "index_manifest.json";

/// Environment variable overriding the data directory.
pub const DATA_DIR_ENV_VAR: &str = "DOCWEAVE_DATA_DIR";

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Resolve the data directory from, in order of priority:
    /// 1. An explicit path (from --data-dir)
    /// 2. The DOCWEAVE_DATA_DIR environment variable
    /// 3. The XDG data directory (~/.local/share/docweave/)
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let root = if let Some(path) = explicit {
            path.to_path_buf()
        } else if let Ok(val) = std::env::var(DATA_DIR_ENV_VAR) {
            PathBuf::from(val)
        } else {
            xdg::BaseDirectories::with_prefix("docweave")
                .get_data_home()
                .ok_or_else(|| {
                    Error::Config(
                        "could not determine XDG data home directory".into(),
                    )
                })?
        };

        std::fs::create_dir_all(&root)
            .map_err(|_| Error::DataDir(root.clone()))?;

        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILENAME)
    }

    /// Directory holding one sub-directory per index slot.
    pub fn indices_dir(&self) -> PathBuf {
        self.root.join("indices")
    }

    /// Storage location of the vector index for `slot`.
    ///
    /// The directory itself is not created; the vector index creates it
    /// when it is first saved.
    pub fn slot_dir(&self, slot: &IndexSlot) -> PathBuf {
        self.indices_dir().join(slot.as_str())
    }
}
