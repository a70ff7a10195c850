//! Filesystem watcher that flags a directory for reindexing.
//!
//! The watcher never indexes anything itself. Its callback only sets a
//! [`ReindexFlag`]; the caller checks the flag before its next query and
//! runs an incremental `get_or_create_index` when it is set.

use std::{
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use notify_debouncer_mini::{DebouncedEvent, Debouncer, new_debouncer};

use crate::{error::Result, walker::FileFilter};

/// Quiet period before a burst of events is reported.
pub const DEBOUNCE: Duration = Duration::from_secs(1);

/// Shared "files changed" flag.
#[derive(Debug, Clone, Default)]
pub struct ReindexFlag(Arc<AtomicBool>);

impl ReindexFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }

    /// Run `reindex` if the flag is set, clearing it first.
    ///
    /// A failed run sets the flag again so the change is retried on the
    /// next check instead of waiting for another filesystem event.
    pub fn run_if_set<T>(&self, reindex: impl FnOnce() -> Result<T>) -> Option<Result<T>> {
        if !self.take() {
            return None;
        }
        let result = reindex();
        if result.is_err() {
            self.set();
        }
        Some(result)
    }
}

/// Watches a directory tree for as long as it is alive.
pub struct ReindexWatcher {
    root: PathBuf,
    _debouncer: Debouncer<notify::RecommendedWatcher>,
}

impl ReindexWatcher {
    /// Start watching `root` recursively. Changes to files the walker
    /// would index set `flag`.
    pub fn start(root: &Path, filter: FileFilter, flag: ReindexFlag) -> Result<Self> {
        let root = root.canonicalize()?;
        let event_root = root.clone();

        let mut debouncer = new_debouncer(
            DEBOUNCE,
            move |events: std::result::Result<Vec<DebouncedEvent>, notify::Error>| {
                let events = match events {
                    Ok(events) => events,
                    Err(e) => {
                        tracing::warn!("watcher error: {e}");
                        return;
                    }
                };

                let relevant = events.iter().any(|event| {
                    event
                        .path
                        .strip_prefix(&event_root)
                        .is_ok_and(|relative| filter.is_eligible(&event_root, relative))
                });
                if relevant {
                    tracing::debug!(events = events.len(), "files changed");
                    flag.set();
                }
            },
        )?;

        debouncer
            .watcher()
            .watch(&root, notify::RecursiveMode::Recursive)?;
        tracing::debug!(root = %root.display(), "watching for changes");

        Ok(Self {
            root,
            _debouncer: debouncer,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}
