use std::{
    collections::HashSet,
    path::{Path, PathBuf},
};

use redb::{
    Database,
    ReadableDatabase,
    ReadableTable,
    ReadableTableMetadata,
    TableDefinition,
};
use serde::{Deserialize, Serialize};

use crate::{
    chunking::Chunk,
    error::{Error, Result},
};

/// A chunk together with its dense vector.
#[derive(Debug, Clone)]
pub struct EmbeddedChunk {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// The dense index over embedded chunks.
///
/// Every stored vector has exactly one docstore entry, addressed by the
/// same stable id. Entries are never edited: a newer version of a file
/// retires the older entries of that file instead.
pub trait VectorIndex: Sized + Send + Sync {
    /// Build an index from scratch. An empty `chunks` still produces a
    /// saveable, searchable index.
    fn create_from_chunks(dimension: usize, chunks: Vec<EmbeddedChunk>) -> Result<Self>;

    /// Append chunks. Live entries whose source file appears in `chunks`
    /// are retired first, so the file is logically replaced.
    ///
    /// Retired entries stay in storage and are written by every
    /// [`save`](Self::save), so a file edited repeatedly grows the
    /// artifact. Only a rebuild through
    /// [`create_from_chunks`](Self::create_from_chunks) drops them;
    /// compare [`len`](Self::len) with [`live_count`](Self::live_count).
    fn add_chunks(&mut self, chunks: Vec<EmbeddedChunk>) -> Result<()>;

    /// Retire every live entry from the given source files. Returns how
    /// many entries were retired.
    fn retire_sources(&mut self, sources: &[PathBuf]) -> usize;

    fn save(&self, location: &Path) -> Result<()>;

    /// Load a persisted index. Any missing, unreadable or inconsistent
    /// artifact is reported as [`Error::IndexCorrupt`].
    fn load(location: &Path) -> Result<Self>;

    /// Whether a persisted artifact exists at `location`.
    fn exists(location: &Path) -> bool;

    /// The `k` nearest live chunks, ascending by distance, ties broken by
    /// insertion order.
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Chunk, f32)>>;

    fn dimension(&self) -> usize;

    /// Stored vectors, retired ones included.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Live chunks in insertion order.
    fn live_chunks(&self) -> Vec<Chunk>;

    fn live_count(&self) -> usize;
}

const META: TableDefinition<&str, u64> = TableDefinition::new("meta");
const VECTORS: TableDefinition<u64, &[u8]> = TableDefinition::new("vectors");
const DOCSTORE: TableDefinition<u64, &[u8]> = TableDefinition::new("docstore");

const FORMAT_VERSION: u64 = 1;

/// File name of the persisted index inside its storage directory.
pub const INDEX_FILENAME: &str = "vectors.redb";

#[derive(Debug, Serialize, Deserialize)]
struct DocRecord {
    chunk: Chunk,
    #[serde(default)]
    retired: bool,
}

#[derive(Debug, Clone)]
struct Entry {
    id: u64,
    vector: Vec<f32>,
    chunk: Chunk,
    retired: bool,
}

/// Exact nearest-neighbour index using squared L2 distance.
///
/// Persisted as a single redb file:
/// - `meta`: format version, dimension, next id
/// - `vectors`: id -> `dimension` f32 values (native byte order)
/// - `docstore`: id -> JSON chunk record
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dimension: usize,
    entries: Vec<Entry>,
    next_id: u64,
}

impl FlatIndex {
    /// Path of the artifact for a storage directory.
    pub fn artifact_path(location: &Path) -> PathBuf {
        location.join(INDEX_FILENAME)
    }

    fn check_dimension(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(Error::EmbeddingProvider(format!(
                "vector has dimension {}, index expects {}",
                vector.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn write_db(&self, path: &Path) -> Result<()> {
        let db = Database::create(path)?;
        let txn = db.begin_write()?;
        {
            let mut meta = txn.open_table(META)?;
            meta.insert("format_version", FORMAT_VERSION)?;
            meta.insert("dimension", self.dimension as u64)?;
            meta.insert("next_id", self.next_id)?;

            let mut vectors = txn.open_table(VECTORS)?;
            let mut docstore = txn.open_table(DOCSTORE)?;
            for entry in &self.entries {
                let bytes: &[u8] = bytemuck::cast_slice(&entry.vector);
                vectors.insert(entry.id, bytes)?;
                let record = serde_json::to_vec(&DocRecord {
                    chunk: entry.chunk.clone(),
                    retired: entry.retired,
                })?;
                docstore.insert(entry.id, record.as_slice())?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    fn read_db(path: &Path) -> Result<Self> {
        let db = Database::open(path)?;
        let txn = db.begin_read()?;

        let meta = txn.open_table(META)?;
        let read_meta = |key: &str| -> Result<u64> {
            meta.get(key)?
                .map(|v| v.value())
                .ok_or_else(|| Error::corrupt(path, format!("missing meta key {key}")))
        };
        let version = read_meta("format_version")?;
        if version != FORMAT_VERSION {
            return Err(Error::corrupt(
                path,
                format!("unsupported format version {version}"),
            ));
        }
        let dimension = usize::try_from(read_meta("dimension")?)
            .map_err(|e| Error::corrupt(path, e.to_string()))?;
        let next_id = read_meta("next_id")?;

        let vectors = txn.open_table(VECTORS)?;
        let docstore = txn.open_table(DOCSTORE)?;
        if vectors.len()? != docstore.len()? {
            return Err(Error::corrupt(
                path,
                "vector count does not match docstore count",
            ));
        }

        let mut entries = Vec::new();
        for item in vectors.iter()? {
            let (id, bytes) = item?;
            let id = id.value();
            let bytes = bytes.value();
            if bytes.len() != dimension * std::mem::size_of::<f32>() {
                return Err(Error::corrupt(
                    path,
                    format!("vector {id} has {} bytes", bytes.len()),
                ));
            }
            let vector: Vec<f32> = bytes
                .chunks_exact(std::mem::size_of::<f32>())
                .map(bytemuck::pod_read_unaligned)
                .collect();

            let Some(raw) = docstore.get(id)? else {
                return Err(Error::corrupt(
                    path,
                    format!("vector {id} has no docstore entry"),
                ));
            };
            let record: DocRecord = serde_json::from_slice(raw.value())?;
            if id >= next_id {
                return Err(Error::corrupt(path, format!("id {id} beyond next id")));
            }
            entries.push(Entry {
                id,
                vector,
                chunk: record.chunk,
                retired: record.retired,
            });
        }
        // redb iterates keys in ascending order, which is insertion order.

        Ok(Self {
            dimension,
            entries,
            next_id,
        })
    }
}

impl VectorIndex for FlatIndex {
    fn create_from_chunks(dimension: usize, chunks: Vec<EmbeddedChunk>) -> Result<Self> {
        let mut index = Self {
            dimension,
            entries: Vec::with_capacity(chunks.len()),
            next_id: 0,
        };
        index.add_chunks(chunks)?;
        Ok(index)
    }

    fn add_chunks(&mut self, chunks: Vec<EmbeddedChunk>) -> Result<()> {
        for embedded in &chunks {
            self.check_dimension(&embedded.vector)?;
        }

        let sources: Vec<PathBuf> = chunks
            .iter()
            .map(|c| c.chunk.source_file.clone())
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        self.retire_sources(&sources);

        for embedded in chunks {
            self.entries.push(Entry {
                id: self.next_id,
                vector: embedded.vector,
                chunk: embedded.chunk,
                retired: false,
            });
            self.next_id += 1;
        }
        Ok(())
    }

    fn retire_sources(&mut self, sources: &[PathBuf]) -> usize {
        if sources.is_empty() {
            return 0;
        }
        let sources: HashSet<&PathBuf> = sources.iter().collect();
        let mut retired = 0;
        for entry in &mut self.entries {
            if !entry.retired && sources.contains(&entry.chunk.source_file) {
                entry.retired = true;
                retired += 1;
            }
        }
        retired
    }

    fn save(&self, location: &Path) -> Result<()> {
        std::fs::create_dir_all(location)?;
        let target = Self::artifact_path(location);
        let staging = location.join(format!("{INDEX_FILENAME}.tmp"));
        if staging.exists() {
            std::fs::remove_file(&staging)?;
        }

        self.write_db(&staging)?;
        std::fs::rename(&staging, &target)?;
        tracing::debug!(
            location = %location.display(),
            vectors = self.entries.len(),
            "saved vector index"
        );
        Ok(())
    }

    fn load(location: &Path) -> Result<Self> {
        let path = Self::artifact_path(location);
        if !path.is_file() {
            return Err(Error::corrupt(location, "index artifact is missing"));
        }
        Self::read_db(&path).map_err(|e| match e {
            Error::IndexCorrupt { .. } => e,
            other => Error::corrupt(location, other.to_string()),
        })
    }

    fn exists(location: &Path) -> bool {
        Self::artifact_path(location).is_file()
    }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<(Chunk, f32)>> {
        if k == 0 || self.entries.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(Error::Config(format!(
                "query has dimension {}, index expects {}",
                query.len(),
                self.dimension
            )));
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.retired)
            .map(|(pos, e)| (pos, squared_l2(query, &e.vector)))
            .collect();
        // stable: equal distances keep insertion order
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(pos, distance)| (self.entries[pos].chunk.clone(), distance))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn live_chunks(&self) -> Vec<Chunk> {
        self.entries
            .iter()
            .filter(|e| !e.retired)
            .map(|e| e.chunk.clone())
            .collect()
    }

    fn live_count(&self) -> usize {
        self.entries.iter().filter(|e| !e.retired).count()
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}
