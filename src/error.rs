use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("keyword index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("watcher error: {0}")]
    Watcher(#[from] notify::Error),

    /// The path handed to the manager is missing or not a directory.
    #[error("not a directory: {0}")]
    InvalidDirectory(PathBuf),

    /// A persisted vector index could not be loaded.
    #[error("index at {location} is corrupt: {reason}")]
    IndexCorrupt { location: PathBuf, reason: String },

    /// The embedding provider failed or returned malformed output.
    #[error("embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("manifest I/O error: {0}")]
    ManifestIo(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}

impl Error {
    pub(crate) fn corrupt(
        location: impl Into<PathBuf>,
        reason: impl Into<String>,
    ) -> Self {
        Self::IndexCorrupt {
            location: location.into(),
            reason: reason.into(),
        }
    }
}
