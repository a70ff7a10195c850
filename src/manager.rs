//! Orchestrates the manifest, chunking, embedding and the vector index.
//!
//! [`IndexManager::get_or_create_index`] decides per call whether a
//! directory needs a full rebuild, an incremental update or can reuse its
//! persisted index. The manifest is the only state shared between
//! directories; it is locked only to snapshot an entry and to commit the
//! result, never while chunking or embedding.

use std::{
    collections::BTreeMap,
    marker::PhantomData,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::Serialize;

use crate::{
    chunking::{Chunk, ChunkSource, META_SOURCE, TextChunkSource},
    config::IndexerConfig,
    data_dir::DataDir,
    embedding::{EmbeddingProvider, config_fingerprint, embed_all},
    error::{Error, Result},
    incremental::{DiffResult, diff_directory},
    manifest::{DirectoryEntry, Manifest, directory_key},
    slot::IndexSlot,
    vector_index::{EmbeddedChunk, FlatIndex, VectorIndex},
    walker::{DiscoveredFile, FileFilter, discover_files},
};

/// What `get_or_create_index` did to produce the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexAction {
    Rebuilt,
    Updated,
    Reused,
}

/// A ready-to-query index plus a report of how it was obtained.
#[derive(Debug)]
pub struct IndexOutcome<V> {
    pub index: V,
    pub action: IndexAction,
    /// Relative paths of files that were (re)chunked and embedded.
    pub modified_files: Vec<PathBuf>,
    /// Relative paths of recorded files no longer on disk.
    pub removed_files: Vec<PathBuf>,
    /// Live chunks in the index.
    pub document_count: usize,
}

/// Result of loading a persisted index.
#[derive(Debug)]
pub enum IndexLoad<V> {
    Loaded(V),
    /// The artifact is missing, corrupt or incompatible.
    NeedsRebuild { location: PathBuf, reason: String },
}

/// Outcome of one indexing pass.
enum Pass<V> {
    Done(IndexOutcome<V>),
    NeedsRebuild { location: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    First,
    ForcedRetry,
}

/// Chunks and vectors for a set of files.
#[derive(Default)]
struct EmbeddedFiles {
    chunks: Vec<EmbeddedChunk>,
    indexed: BTreeMap<String, u64>,
    skipped: BTreeMap<String, u64>,
}

/// One watched directory as reported by [`IndexManager::status`].
#[derive(Debug, Clone, Serialize)]
pub struct DirectoryStatus {
    pub directory: PathBuf,
    pub slot: String,
    pub document_count: usize,
    pub file_count: usize,
    pub skipped_count: usize,
    pub last_update: Option<DateTime<Utc>>,
    pub stale: bool,
    /// Whether the index artifact is present on disk.
    pub on_disk: bool,
    /// Superseded entries still stored in the artifact. Only a forced
    /// rebuild drops them.
    pub retired_count: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    /// Watched directories whose index was removed.
    pub removed_directories: Vec<PathBuf>,
    /// Slot directories not referenced by the manifest.
    pub removed_orphans: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CleanupOutcome {
    /// Cleanup already ran on this calendar day.
    Skipped { last_cleanup: DateTime<Utc> },
    Ran(CleanupReport),
}

/// Owns the manifest and every index slot under one data directory.
pub struct IndexManager<V: VectorIndex = FlatIndex> {
    data_dir: DataDir,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Arc<dyn ChunkSource>,
    config: IndexerConfig,
    filter: FileFilter,
    fingerprint: String,
    manifest: Mutex<Manifest>,
    _index: PhantomData<fn() -> V>,
}

impl<V: VectorIndex> IndexManager<V> {
    /// Open the manager for `data_dir`.
    ///
    /// The configuration fingerprint is recomputed here. If it differs
    /// from the stored one every known directory is marked for rebuild and
    /// the manifest is saved before anything else happens.
    pub fn open(
        data_dir: DataDir,
        embedder: Arc<dyn EmbeddingProvider>,
        config: IndexerConfig,
    ) -> Result<Self> {
        config.validate()?;
        let filter = FileFilter::new(&config.extra_ignore)?
            .exclude(data_dir.root());
        let chunker: Arc<dyn ChunkSource> = Arc::new(TextChunkSource::new(
            config.chunk_size,
            config.chunk_overlap,
        ));
        let fingerprint =
            config_fingerprint(embedder.model_name(), embedder.dimension(), &config);

        let manifest_path = data_dir.manifest_path();
        let mut manifest = Manifest::load(&manifest_path);
        if manifest.apply_fingerprint(&fingerprint, embedder.model_name()) {
            if !manifest.directories.is_empty() {
                tracing::info!(
                    directories = manifest.directories.len(),
                    model = embedder.model_name(),
                    "embedding configuration changed, marking indexes for rebuild"
                );
            }
            if let Err(e) = manifest.save(&manifest_path) {
                tracing::warn!("could not save manifest: {e}");
            }
        }

        Ok(Self {
            data_dir,
            embedder,
            chunker,
            config,
            filter,
            fingerprint,
            manifest: Mutex::new(manifest),
            _index: PhantomData,
        })
    }

    /// Replace the default text chunker.
    pub fn with_chunk_source(mut self, chunker: Arc<dyn ChunkSource>) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data_dir
    }

    pub fn config(&self) -> &IndexerConfig {
        &self.config
    }

    pub fn filter(&self) -> &FileFilter {
        &self.filter
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.embedder)
    }

    /// A copy of the current manifest.
    pub fn manifest(&self) -> Manifest {
        self.lock_manifest().clone()
    }

    fn lock_manifest(&self) -> MutexGuard<'_, Manifest> {
        self.manifest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return a ready-to-query index for `directory`.
    ///
    /// Rebuilds when no index exists on disk, when forced, or when the
    /// embedding configuration changed; updates incrementally when files
    /// were added, modified or deleted; otherwise reuses the persisted
    /// index. A persisted index that cannot be loaded triggers a single
    /// forced rebuild.
    pub fn get_or_create_index(
        &self,
        directory: &Path,
        force_rebuild: bool,
    ) -> Result<IndexOutcome<V>> {
        let directory = resolve_directory(directory)?;
        let mut attempt = Attempt::First;
        loop {
            let force = force_rebuild || attempt == Attempt::ForcedRetry;
            let pass = match self.index_pass(&directory, force)? {
                // an index rebuilt after a failed load has to load itself
                Pass::Done(outcome) if attempt == Attempt::ForcedRetry => {
                    self.reopen(&directory, outcome)
                }
                pass => pass,
            };
            match pass {
                Pass::Done(outcome) => return Ok(outcome),
                Pass::NeedsRebuild { location, reason } => match attempt {
                    Attempt::First => {
                        tracing::warn!(
                            directory = %directory.display(),
                            "persisted index unusable ({reason}), rebuilding"
                        );
                        attempt = Attempt::ForcedRetry;
                    }
                    Attempt::ForcedRetry => {
                        return Err(Error::corrupt(location, reason));
                    }
                },
            }
        }
    }

    fn index_pass(&self, directory: &Path, force: bool) -> Result<Pass<V>> {
        let key = directory_key(directory);
        let slot = IndexSlot::for_directory(directory);
        let location = self.data_dir.slot_dir(&slot);
        let entry = self.lock_manifest().directories.get(&key).cloned();

        let files = discover_files(directory, &self.filter)?;
        let diff = diff_directory(entry.as_ref(), &files);

        let rebuild_reason = match &entry {
            _ if force => Some("forced"),
            None => Some("directory not in manifest"),
            Some(e) if e.stale => Some("embedding configuration changed"),
            Some(_) if !V::exists(&location) => Some("no index on disk"),
            Some(_) => None,
        };

        if let Some(reason) = rebuild_reason {
            tracing::info!(
                directory = %directory.display(),
                files = files.len(),
                "full rebuild: {reason}"
            );
            return self
                .rebuild(directory, &key, &slot, &location, &files)
                .map(Pass::Done);
        }

        let entry = entry.unwrap_or_else(|| DirectoryEntry::new(&slot));
        let index = match self.load_index(&location) {
            IndexLoad::Loaded(index) => index,
            IndexLoad::NeedsRebuild { location, reason } => {
                return Ok(Pass::NeedsRebuild { location, reason });
            }
        };

        if !diff.has_changes() {
            tracing::info!(
                directory = %directory.display(),
                documents = index.live_count(),
                "reusing index"
            );
            let document_count = index.live_count();
            return Ok(Pass::Done(IndexOutcome {
                index,
                action: IndexAction::Reused,
                modified_files: Vec::new(),
                removed_files: Vec::new(),
                document_count,
            }));
        }

        self.update(directory, &key, &location, entry, index, &diff)
            .map(Pass::Done)
    }

    fn reopen(&self, directory: &Path, outcome: IndexOutcome<V>) -> Pass<V> {
        let location = self.data_dir.slot_dir(&IndexSlot::for_directory(directory));
        match self.load_index(&location) {
            IndexLoad::Loaded(_) => Pass::Done(outcome),
            IndexLoad::NeedsRebuild { location, reason } => {
                Pass::NeedsRebuild { location, reason }
            }
        }
    }

    fn load_index(&self, location: &Path) -> IndexLoad<V> {
        match V::load(location) {
            Ok(index) if index.dimension() != self.embedder.dimension() => {
                IndexLoad::NeedsRebuild {
                    location: location.to_path_buf(),
                    reason: format!(
                        "index dimension {} does not match provider dimension {}",
                        index.dimension(),
                        self.embedder.dimension()
                    ),
                }
            }
            Ok(index) => IndexLoad::Loaded(index),
            Err(e) => IndexLoad::NeedsRebuild {
                location: location.to_path_buf(),
                reason: e.to_string(),
            },
        }
    }

    fn rebuild(
        &self,
        directory: &Path,
        key: &str,
        slot: &IndexSlot,
        location: &Path,
        files: &[DiscoveredFile],
    ) -> Result<IndexOutcome<V>> {
        let embedded = self.embed_files(files)?;
        let index =
            V::create_from_chunks(self.embedder.dimension(), embedded.chunks)?;
        index.save(location)?;

        let document_count = index.live_count();
        let mut entry = DirectoryEntry::new(slot);
        entry.last_indexed_per_file = embedded.indexed;
        entry.skipped_files = embedded.skipped;
        entry.document_count = document_count;
        entry.stored_count = index.len();
        entry.last_update = Some(Utc::now());
        self.commit(key, entry);

        tracing::info!(
            directory = %directory.display(),
            documents = document_count,
            "index rebuilt"
        );
        Ok(IndexOutcome {
            index,
            action: IndexAction::Rebuilt,
            modified_files: files.iter().map(|f| f.relative_path.clone()).collect(),
            removed_files: Vec::new(),
            document_count,
        })
    }

    fn update(
        &self,
        directory: &Path,
        key: &str,
        location: &Path,
        mut entry: DirectoryEntry,
        mut index: V,
        diff: &DiffResult,
    ) -> Result<IndexOutcome<V>> {
        let modified = diff.modified_files();
        let embedded = self.embed_files(&modified)?;

        // Deleted files and files that no longer yield chunks.
        let retired: Vec<PathBuf> = diff
            .deleted_keys
            .iter()
            .chain(embedded.skipped.keys())
            .map(PathBuf::from)
            .collect();
        let retired_count = index.retire_sources(&retired);
        index.add_chunks(embedded.chunks)?;
        index.save(location)?;

        for removed in &diff.deleted_keys {
            entry.last_indexed_per_file.remove(removed);
            entry.skipped_files.remove(removed);
        }
        for (file, mtime) in embedded.skipped {
            entry.last_indexed_per_file.remove(&file);
            entry.skipped_files.insert(file, mtime);
        }
        for (file, mtime) in embedded.indexed {
            entry.skipped_files.remove(&file);
            entry.last_indexed_per_file.insert(file, mtime);
        }
        let document_count = index.live_count();
        entry.document_count = document_count;
        entry.stored_count = index.len();
        entry.last_update = Some(Utc::now());
        entry.stale = false;
        self.commit(key, entry);

        tracing::info!(
            directory = %directory.display(),
            modified = modified.len(),
            removed = diff.deleted_keys.len(),
            retired = retired_count,
            documents = document_count,
            "index updated"
        );
        Ok(IndexOutcome {
            index,
            action: IndexAction::Updated,
            modified_files: modified.into_iter().map(|f| f.relative_path).collect(),
            removed_files: diff.deleted_keys.iter().map(PathBuf::from).collect(),
            document_count,
        })
    }

    /// Chunk `files` in parallel, then embed every chunk.
    ///
    /// Chunks are attributed to the file's manifest key so the index can
    /// retire them when the file changes.
    fn embed_files(&self, files: &[DiscoveredFile]) -> Result<EmbeddedFiles> {
        let per_file: Vec<(String, u64, Vec<Chunk>)> = files
            .par_iter()
            .map(|file| {
                let key = file.key();
                let chunks: Vec<Chunk> = self
                    .chunker
                    .load(&file.absolute_path)
                    .into_iter()
                    .filter(|c| !c.content.trim().is_empty())
                    .map(|mut chunk| {
                        chunk.source_file = PathBuf::from(&key);
                        chunk.metadata.insert(META_SOURCE.into(), key.clone());
                        chunk
                    })
                    .collect();
                (key, file.mtime, chunks)
            })
            .collect();

        let mut embedded = EmbeddedFiles::default();
        let mut chunks = Vec::new();
        for (key, mtime, file_chunks) in per_file {
            if file_chunks.is_empty() {
                tracing::debug!(file = %key, "no chunks, skipping");
                embedded.skipped.insert(key, mtime);
            } else {
                embedded.indexed.insert(key, mtime);
                chunks.extend(file_chunks);
            }
        }
        if !embedded.skipped.is_empty() {
            tracing::warn!(
                count = embedded.skipped.len(),
                "files produced no chunks"
            );
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors =
            embed_all(self.embedder.as_ref(), &texts, self.config.embed_batch_size)?;
        embedded.chunks = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| EmbeddedChunk { chunk, vector })
            .collect();
        Ok(embedded)
    }

    /// Record `entry` and persist the manifest. A failed save is logged;
    /// the in-memory manifest stays authoritative for this process.
    fn commit(&self, key: &str, entry: DirectoryEntry) {
        let mut manifest = self.lock_manifest();
        manifest.directories.insert(key.to_string(), entry);
        if let Err(e) = manifest.save(&self.data_dir.manifest_path()) {
            tracing::warn!("could not save manifest: {e}");
        }
    }

    /// Remove indexes not updated within the retention window, at most
    /// once per calendar day.
    pub fn cleanup(&self, force: bool) -> Result<CleanupOutcome> {
        self.cleanup_at(Utc::now(), force)
    }

    /// [`cleanup`](Self::cleanup) as if the current time were `now`.
    pub fn cleanup_at(
        &self,
        now: DateTime<Utc>,
        force: bool,
    ) -> Result<CleanupOutcome> {
        let mut manifest = self.lock_manifest();
        if !force
            && let Some(last) = manifest.last_cleanup
            && last.date_naive() == now.date_naive()
        {
            tracing::debug!("cleanup already ran today");
            return Ok(CleanupOutcome::Skipped { last_cleanup: last });
        }

        let cutoff =
            now - chrono::Duration::days(i64::from(self.config.retention_days));
        let mut report = CleanupReport::default();

        let expired: Vec<String> = manifest
            .directories
            .iter()
            .filter(|(_, e)| e.last_update.is_none_or(|t| t < cutoff))
            .map(|(k, _)| k.clone())
            .collect();
        for key in expired {
            if let Some(entry) = manifest.directories.remove(&key) {
                remove_slot(&self.data_dir.slot_dir(&entry.slot()));
                tracing::info!(directory = %key, "removed expired index");
                report.removed_directories.push(PathBuf::from(key));
            }
        }

        let known: Vec<String> = manifest.slots().map(str::to_string).collect();
        report.removed_orphans = self.remove_orphans(&known, cutoff)?;

        manifest.last_cleanup = Some(now);
        if let Err(e) = manifest.save(&self.data_dir.manifest_path()) {
            tracing::warn!("could not save manifest: {e}");
        }
        Ok(CleanupOutcome::Ran(report))
    }

    fn remove_orphans(
        &self,
        known: &[String],
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<PathBuf>> {
        let indices = self.data_dir.indices_dir();
        if !indices.is_dir() {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        for dir_entry in std::fs::read_dir(&indices)? {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            if !IndexSlot::is_slot_name(&name) || known.contains(&name) {
                continue;
            }
            let modified: DateTime<Utc> = match dir_entry
                .metadata()
                .and_then(|m| m.modified())
            {
                Ok(t) => t.into(),
                Err(_) => continue,
            };
            if modified < cutoff {
                let path = dir_entry.path();
                remove_slot(&path);
                tracing::info!(slot = %name, "removed orphaned index");
                removed.push(path);
            }
        }
        removed.sort();
        Ok(removed)
    }

    /// Delete every index and forget every directory. Returns how many
    /// directories were forgotten.
    pub fn clear_all(&self) -> Result<usize> {
        let mut manifest = self.lock_manifest();
        let indices = self.data_dir.indices_dir();
        if indices.exists() {
            std::fs::remove_dir_all(&indices)?;
        }
        let count = manifest.directories.len();
        manifest.directories.clear();
        manifest.save(&self.data_dir.manifest_path())?;
        tracing::info!(directories = count, "cleared all indexes");
        Ok(count)
    }

    /// Every watched directory, sorted by path.
    pub fn status(&self) -> Vec<DirectoryStatus> {
        let manifest = self.lock_manifest();
        manifest
            .directories
            .iter()
            .map(|(key, entry)| DirectoryStatus {
                directory: PathBuf::from(key),
                slot: entry.index_location.clone(),
                document_count: entry.document_count,
                file_count: entry.file_count(),
                skipped_count: entry.skipped_files.len(),
                last_update: entry.last_update,
                stale: entry.stale,
                on_disk: V::exists(&self.data_dir.slot_dir(&entry.slot())),
                retired_count: entry.stored_count.saturating_sub(entry.document_count),
            })
            .collect()
    }
}

impl<V: VectorIndex> std::fmt::Debug for IndexManager<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexManager")
            .field("data_dir", &self.data_dir)
            .field("model", &self.embedder.model_name())
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

/// Canonicalize `directory`, failing unless it is an existing directory.
fn resolve_directory(directory: &Path) -> Result<PathBuf> {
    if !directory.is_dir() {
        return Err(Error::InvalidDirectory(directory.to_path_buf()));
    }
    directory
        .canonicalize()
        .map_err(|_| Error::InvalidDirectory(directory.to_path_buf()))
}

fn remove_slot(path: &Path) {
    if !path.exists() {
        return;
    }
    if let Err(e) = std::fs::remove_dir_all(path) {
        tracing::warn!(path = %path.display(), "could not remove index: {e}");
    }
}
