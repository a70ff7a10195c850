use crate::{
    config::IndexerConfig,
    error::{Error, Result},
};

/// Maps batches of texts to fixed-length dense vectors.
///
/// `embed_batch` returns one vector per input, in input order, or fails
/// for the whole batch.
pub trait EmbeddingProvider: Send + Sync {
    /// Identifier of the embedding model, part of the config fingerprint.
    fn model_name(&self) -> &str;

    /// Length of every vector this provider returns.
    fn dimension(&self) -> usize;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed `texts` in batches of at most `batch_size`.
///
/// Validates that the provider returns exactly one vector of the declared
/// dimension per input. Any failure aborts the whole call; no partial
/// result is returned.
pub fn embed_all(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>> {
    let dimension = provider.dimension();
    let mut vectors = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size.max(1)) {
        let embedded = provider.embed_batch(batch)?;
        if embedded.len() != batch.len() {
            return Err(Error::EmbeddingProvider(format!(
                "provider returned {} vectors for {} texts",
                embedded.len(),
                batch.len()
            )));
        }
        if let Some(bad) = embedded.iter().find(|v| v.len() != dimension) {
            return Err(Error::EmbeddingProvider(format!(
                "provider returned a vector of length {}, expected {dimension}",
                bad.len()
            )));
        }
        vectors.extend(embedded);
    }

    tracing::debug!(count = vectors.len(), "embedded texts");
    Ok(vectors)
}

/// Embed a single query string.
pub fn embed_query(provider: &dyn EmbeddingProvider, query: &str) -> Result<Vec<f32>> {
    embed_all(provider, &[query.to_string()], 1)?
        .pop()
        .ok_or_else(|| Error::EmbeddingProvider("no vector for query".into()))
}

/// Fingerprint of everything that makes stored vectors incomparable with
/// fresh ones: model, dimension and the chunking tunables.
///
/// # Examples
///
/// ```
/// use docweave::{config::IndexerConfig, embedding::config_fingerprint};
///
/// let config = IndexerConfig::default();
/// let a = config_fingerprint("model-a", 384, &config);
/// assert_eq!(a, config_fingerprint("model-a", 384, &config));
/// assert_ne!(a, config_fingerprint("model-b", 384, &config));
/// ```
pub fn config_fingerprint(model_name: &str, dimension: usize, config: &IndexerConfig) -> String {
    let mut hasher = blake3::Hasher::new();
    for part in [
        model_name.to_string(),
        dimension.to_string(),
        config.chunk_size.to_string(),
        config.chunk_overlap.to_string(),
    ] {
        hasher.update(part.as_bytes());
        hasher.update(b"\0");
    }
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct CountingProvider {
        dimension: usize,
        calls: AtomicUsize,
        drop_one: bool,
    }

    impl EmbeddingProvider for CountingProvider {
        fn model_name(&self) -> &str {
            "counting"
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let n = if self.drop_one { texts.len() - 1 } else { texts.len() };
            Ok((0..n).map(|i| vec![i as f32; self.dimension]).collect())
        }
    }

    fn provider(drop_one: bool) -> CountingProvider {
        CountingProvider {
            dimension: 3,
            calls: AtomicUsize::new(0),
            drop_one,
        }
    }

    #[test]
    fn batches_respect_batch_size() {
        let p = provider(false);
        let texts: Vec<String> = (0..10).map(|i| format!("t{i}")).collect();

        let vectors = embed_all(&p, &texts, 4).unwrap();
        assert_eq!(vectors.len(), 10);
        assert_eq!(p.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn empty_input_makes_no_calls() {
        let p = provider(false);
        assert!(embed_all(&p, &[], 4).unwrap().is_empty());
        assert_eq!(p.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn short_batch_is_an_error() {
        let p = provider(true);
        let texts = vec!["a".to_string(), "b".to_string()];
        let err = embed_all(&p, &texts, 8).unwrap_err();
        assert!(matches!(err, Error::EmbeddingProvider(_)));
    }

    #[test]
    fn fingerprint_tracks_chunking_tunables() {
        let base = IndexerConfig::default();
        let other = IndexerConfig {
            chunk_size: base.chunk_size * 2,
            ..IndexerConfig::default()
        };
        assert_ne!(
            config_fingerprint("m", 8, &base),
            config_fingerprint("m", 8, &other)
        );
        assert_ne!(
            config_fingerprint("m", 8, &base),
            config_fingerprint("m", 16, &base)
        );
    }
}
