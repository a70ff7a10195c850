use std::{
    io,
    path::{Path, PathBuf},
    time::SystemTime,
};

use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::error::{Error, Result};

/// A discovered document file.
#[derive(Debug, Clone)]
pub struct DiscoveredFile {
    /// Path relative to the watched directory.
    pub relative_path: PathBuf,
    /// Fully resolved absolute path.
    pub absolute_path: PathBuf,
    /// Last modification time as nanoseconds since the Unix epoch.
    pub mtime: u64,
}

impl DiscoveredFile {
    /// The key this file is recorded under in the manifest.
    pub fn key(&self) -> String {
        path_key(&self.relative_path)
    }
}

/// Manifest key for a path relative to the watched directory.
pub fn path_key(relative: &Path) -> String {
    relative.to_string_lossy().replace('\\', "/")
}

/// Build, VCS and cache directories that are never descended into.
const SKIP_DIRS: &[&str] = &[
    "venv",
    ".venv",
    "__pycache__",
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    ".pytest_cache",
    ".mypy_cache",
    "target",
    "build",
    "dist",
    ".cache",
];

/// Binary or otherwise non-textual extensions.
const SKIP_EXTENSIONS: &[&str] = &[
    "pyc", "pyd", "dll", "so", "dylib", "exe", "bin", "dat", "pkl", "h5",
    "pth", "o", "a", "class", "jar", "zip", "gz", "tar", "png", "jpg",
    "jpeg", "gif", "ico", "pdf", "db", "redb", "sqlite",
];

/// Decides which files under a watched directory are eligible.
#[derive(Debug, Clone)]
pub struct FileFilter {
    ignore: GlobSet,
    excluded: Vec<PathBuf>,
}

impl Default for FileFilter {
    fn default() -> Self {
        Self {
            ignore: GlobSet::empty(),
            excluded: Vec::new(),
        }
    }
}

impl FileFilter {
    /// Build a filter from extra glob patterns, matched against paths
    /// relative to the watched directory.
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GlobSetBuilder::new();
        for pattern in patterns {
            let glob = Glob::new(pattern).map_err(|e| {
                Error::Config(format!("invalid ignore pattern {pattern:?}: {e}"))
            })?;
            builder.add(glob);
        }
        let ignore = builder.build().map_err(|e| {
            Error::Config(format!("invalid ignore patterns: {e}"))
        })?;
        Ok(Self {
            ignore,
            excluded: Vec::new(),
        })
    }

    /// Never descend into `dir` (absolute path), e.g. the index storage
    /// root when it lives inside a watched directory.
    pub fn exclude(mut self, dir: &Path) -> Self {
        let dir = dir.canonicalize().unwrap_or_else(|_| dir.to_path_buf());
        self.excluded.push(dir);
        self
    }

    fn skips_dir(&self, name: &str, absolute: &Path) -> bool {
        name.starts_with('.')
            || SKIP_DIRS.contains(&name)
            || self.excluded.iter().any(|ex| absolute.starts_with(ex))
    }

    fn skips_file(&self, relative: &Path) -> bool {
        let hidden = relative
            .file_name()
            .and_then(|n| n.to_str())
            .is_none_or(|n| n.starts_with('.'));
        let binary = relative
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                SKIP_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
            });
        hidden || binary || self.ignore.is_match(relative)
    }

    /// Whether a path relative to the watched directory would be indexed.
    ///
    /// Used by the watcher to ignore events for files discovery would
    /// never pick up.
    pub fn is_eligible(&self, root: &Path, relative: &Path) -> bool {
        let mut current = root.to_path_buf();
        let components: Vec<_> = relative.components().collect();
        let Some((_, parents)) = components.split_last() else {
            return false;
        };
        for component in parents {
            current.push(component);
            let name = component.as_os_str().to_string_lossy();
            if self.skips_dir(&name, &current) {
                return false;
            }
        }
        !self.skips_file(relative)
    }
}

/// Recursively walk a directory and discover eligible document files.
///
/// Skips hidden files and directories, build/VCS/cache directories and
/// binary extensions. Results are sorted by relative path.
pub fn discover_files(
    root: &Path,
    filter: &FileFilter,
) -> Result<Vec<DiscoveredFile>> {
    let canonical_root = root.canonicalize()?;
    let mut results = Vec::new();
    walk_dir(&canonical_root, &canonical_root, filter, &mut results)?;
    results.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
    Ok(results)
}

fn walk_dir(
    root: &Path,
    current: &Path,
    filter: &FileFilter,
    results: &mut Vec<DiscoveredFile>,
) -> Result<()> {
    let entries = match std::fs::read_dir(current) {
        Ok(entries) => entries,
        // subdirectory removed mid-walk
        Err(e) if e.kind() == io::ErrorKind::NotFound && current != root => {
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for entry in entries {
        let entry = entry?;
        let file_name = entry.file_name();
        let name = file_name.to_string_lossy();
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            if !filter.skips_dir(&name, &path) {
                walk_dir(root, &path, filter, results)?;
            }
        } else if file_type.is_symlink() {
            let resolved = match path.canonicalize() {
                Ok(p) => p,
                Err(_) => continue, // broken symlink
            };
            // Directory symlinks are not followed (cycle prevention).
            if resolved.is_file()
                && let Some(df) = make_discovered(root, &path, &resolved)?
                && !filter.skips_file(&df.relative_path)
            {
                results.push(df);
            }
        } else if file_type.is_file()
            && let Some(df) = make_discovered(root, &path, &path)?
            && !filter.skips_file(&df.relative_path)
        {
            results.push(df);
        }
    }

    Ok(())
}

fn make_discovered(
    root: &Path,
    original_path: &Path,
    absolute_path: &Path,
) -> Result<Option<DiscoveredFile>> {
    let Ok(relative_path) = original_path.strip_prefix(root) else {
        return Ok(None);
    };

    let metadata = match std::fs::metadata(absolute_path) {
        Ok(metadata) => metadata,
        // removed between read_dir and stat, e.g. an editor swap file
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let mtime = metadata
        .modified()
        .unwrap_or(SystemTime::UNIX_EPOCH)
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();

    Ok(Some(DiscoveredFile {
        relative_path: relative_path.to_path_buf(),
        absolute_path: absolute_path.to_path_buf(),
        mtime: u64::try_from(mtime).unwrap_or(u64::MAX),
    }))
}
