//! Tunables for indexing and retrieval.
//!
//! Every field has a default so an [`IndexerConfig`] can be built with
//! struct-update syntax from [`IndexerConfig::default`].

use crate::error::{Error, Result};

/// Default chunk size in characters.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Default overlap between adjacent chunks in characters.
pub const DEFAULT_CHUNK_OVERLAP: usize = 50;

/// Default number of texts sent to the embedding provider per call.
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 64;

/// Default age after which an unused index is removed by cleanup.
pub const DEFAULT_RETENTION_DAYS: u32 = 30;

#[derive(Debug, Clone)]
pub struct IndexerConfig {
    /// Maximum chunk size in characters.
    pub chunk_size: usize,
    /// Overlap between adjacent chunks in characters.
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    /// Indexes whose last update is older than this are removed by
    /// cleanup.
    pub retention_days: u32,
    /// Extra glob patterns (relative to the watched directory) to skip.
    pub extra_ignore: Vec<String>,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            retention_days: DEFAULT_RETENTION_DAYS,
            extra_ignore: Vec::new(),
        }
    }
}

impl IndexerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(Error::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embed_batch_size == 0 {
            return Err(Error::Config(
                "embed_batch_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

/// Relative weights of the dense and keyword rankings in hybrid fusion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub vector: f32,
    pub keyword: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            vector: 0.7,
            keyword: 0.3,
        }
    }
}

impl FusionWeights {
    pub fn new(vector: f32, keyword: f32) -> Self {
        Self { vector, keyword }
    }

    /// Scale the weights so they sum to 1.
    ///
    /// Fails if either weight is negative or not finite, or if both are
    /// zero.
    ///
    /// # Examples
    ///
    /// ```
    /// use docweave::config::FusionWeights;
    ///
    /// let w = FusionWeights::new(3.0, 1.0).normalized().unwrap();
    /// assert_eq!(w, FusionWeights::new(0.75, 0.25));
    /// assert!(FusionWeights::new(0.0, 0.0).normalized().is_err());
    /// ```
    pub fn normalized(self) -> Result<Self> {
        let valid = |w: f32| w.is_finite() && w >= 0.0;
        if !valid(self.vector) || !valid(self.keyword) {
            return Err(Error::Config(format!(
                "fusion weights must be finite and non-negative, got \
                 vector={} keyword={}",
                self.vector, self.keyword
            )));
        }
        let total = self.vector + self.keyword;
        if total <= 0.0 {
            return Err(Error::Config(
                "fusion weights must not both be zero".into(),
            ));
        }
        Ok(Self {
            vector: self.vector / total,
            keyword: self.keyword / total,
        })
    }
}
