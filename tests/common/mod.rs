#![allow(dead_code)]

use std::{
    hash::{DefaultHasher, Hash, Hasher},
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

use docweave::{
    DataDir,
    EmbeddingProvider,
    Error,
    IndexManager,
    Result,
    config::IndexerConfig,
};
use filetime::FileTime;

pub const DIMENSION: usize = 16;

/// Deterministic bag-of-words embedder.
///
/// Every lowercase word is hashed into one of `DIMENSION - 1` buckets; the
/// last component is constant so no vector is all zeros.
pub struct FakeEmbedder {
    model: String,
    failing: AtomicBool,
    embedded: AtomicUsize,
}

impl FakeEmbedder {
    pub fn new(model: &str) -> Arc<Self> {
        Arc::new(Self {
            model: model.to_string(),
            failing: AtomicBool::new(false),
            embedded: AtomicUsize::new(0),
        })
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of texts embedded so far.
    pub fn embedded(&self) -> usize {
        self.embedded.load(Ordering::SeqCst)
    }

    pub fn vector(text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; DIMENSION];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            word.to_lowercase().hash(&mut hasher);
            vector[(hasher.finish() % (DIMENSION as u64 - 1)) as usize] += 1.0;
        }
        vector[DIMENSION - 1] = 1.0;
        vector
    }
}

impl EmbeddingProvider for FakeEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        DIMENSION
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::EmbeddingProvider("provider unavailable".into()));
        }
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| Self::vector(t)).collect())
    }
}

/// Small chunks so multi-chunk files are easy to write.
pub fn small_chunks() -> IndexerConfig {
    IndexerConfig {
        chunk_size: 60,
        chunk_overlap: 10,
        ..IndexerConfig::default()
    }
}

pub fn open_manager(data: &Path, embedder: &Arc<FakeEmbedder>) -> IndexManager {
    IndexManager::open(
        DataDir::resolve(Some(data)).unwrap(),
        embedder.clone(),
        small_chunks(),
    )
    .unwrap()
}

pub fn write(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
}

/// Move the file's mtime forward so it is seen as modified regardless of
/// filesystem timestamp granularity.
pub fn touch(dir: &Path, relative: &str) {
    let path = dir.join(relative);
    let meta = std::fs::metadata(&path).unwrap();
    let current = FileTime::from_last_modification_time(&meta);
    let later = FileTime::from_unix_time(current.unix_seconds() + 10, current.nanoseconds());
    filetime::set_file_mtime(&path, later).unwrap();
}

/// Rewrite a file and make sure its mtime moves forward.
pub fn rewrite(dir: &Path, relative: &str, content: &str) {
    write(dir, relative, content);
    touch(dir, relative);
}

pub fn long_text(topic: &str, sentences: usize) -> String {
    (0..sentences)
        .map(|i| format!("Sentence {i} talks about {topic} in some detail."))
        .collect::<Vec<_>>()
        .join(" ")
}
