//! docweave - a persistent hybrid search index over a directory of documents.
//!
//! docweave chunks the files under a watched directory, embeds the chunks
//! with an [`EmbeddingProvider`](embedding::EmbeddingProvider) and keeps the
//! vectors in a per-directory index on disk. A manifest records which file
//! versions each index contains, so later calls only re-embed what changed.
//! Queries fuse the dense ranking with an in-memory BM25 ranking built on
//! [Tantivy](https://github.com/quickwit-oss/tantivy).
//!
//! # Quick start
//!
//! ```no_run
//! use std::{path::Path, sync::Arc};
//!
//! use docweave::{DataDir, IndexManager};
//! use docweave::config::{FusionWeights, IndexerConfig};
//! use docweave::remote_embedder::{RemoteEmbedder, RemoteEmbedderConfig};
//! use docweave::search::HybridRetriever;
//! use docweave::vector_index::VectorIndex;
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let embedder = Arc::new(RemoteEmbedder::new(RemoteEmbedderConfig::default()).unwrap());
//! let manager: IndexManager =
//!     IndexManager::open(data_dir, embedder.clone(), IndexerConfig::default()).unwrap();
//!
//! let outcome = manager.get_or_create_index(Path::new("notes"), false).unwrap();
//! let retriever = HybridRetriever::new(embedder, FusionWeights::default()).unwrap();
//! let chunks = outcome.index.live_chunks();
//! let results = retriever
//!     .retrieve("ownership rules", &outcome.index, &chunks, 5)
//!     .unwrap();
//! for r in &results {
//!     println!("{} ({:.3})", r.chunk.source_file.display(), r.score);
//! }
//! ```

pub mod chunking;
pub mod config;
pub mod data_dir;
pub mod embedding;
pub mod error;
pub mod incremental;
pub mod keyword_index;
pub mod manager;
pub mod manifest;
pub mod remote_embedder;
pub mod search;
pub mod slot;
pub mod vector_index;
pub mod walker;
pub mod watcher;

pub use chunking::{Chunk, ChunkSource};
pub use data_dir::DataDir;
pub use embedding::EmbeddingProvider;
pub use error::{Error, Result};
pub use manager::IndexManager;
pub use manifest::Manifest;
pub use vector_index::{FlatIndex, VectorIndex};
