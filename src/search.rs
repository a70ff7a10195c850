use std::{
    collections::HashMap,
    path::PathBuf,
    sync::Arc,
};

use serde::Serialize;

use crate::{
    chunking::{Chunk, META_SECTION},
    config::FusionWeights,
    embedding::{EmbeddingProvider, embed_query},
    error::Result,
    keyword_index::KeywordIndex,
    vector_index::VectorIndex,
};

/// A retrieved chunk with its fused relevance.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Combined score in `[0, 1]`.
    pub score: f32,
    /// 0-based position in the dense ranking, if the chunk was there.
    pub vector_rank: Option<usize>,
    /// Keyword score normalized by the best keyword score.
    pub keyword_score: Option<f32>,
}

/// Fuses dense and keyword rankings.
///
/// Dense results contribute a position score of `1 / (rank + 1)`; keyword
/// results contribute their BM25 score divided by the best one. The two
/// are combined with the normalized [`FusionWeights`].
pub struct HybridRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    weights: FusionWeights,
}

impl HybridRetriever {
    pub fn new(
        embedder: Arc<dyn EmbeddingProvider>,
        weights: FusionWeights,
    ) -> Result<Self> {
        Ok(Self {
            embedder,
            weights: weights.normalized()?,
        })
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    /// Retrieve the `k` most relevant chunks for `query`.
    ///
    /// `chunks` is the universe the keyword index is built from, normally
    /// the index's live chunks.
    pub fn retrieve<V: VectorIndex>(
        &self,
        query: &str,
        index: &V,
        chunks: &[Chunk],
        k: usize,
    ) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_vector = embed_query(self.embedder.as_ref(), query)?;
        let dense: Vec<Chunk> = index
            .search(&query_vector, k)?
            .into_iter()
            .map(|(chunk, _)| chunk)
            .collect();
        let sparse = KeywordIndex::build(chunks)?.score(query)?;

        tracing::debug!(
            dense = dense.len(),
            sparse = sparse.len(),
            "fusing rankings"
        );
        Ok(fuse(dense, sparse, self.weights, k))
    }
}

/// Fuse a dense ranking with keyword scores and keep the top `k`.
///
/// `weights` must already be normalized. Chunks are identified by source
/// file and content; a chunk reached through both rankings appears once.
/// Chunks whose combined score is zero are dropped. Exact ties keep the
/// dense-then-keyword input order.
pub fn fuse(
    dense: Vec<Chunk>,
    sparse: Vec<(Chunk, f32)>,
    weights: FusionWeights,
    k: usize,
) -> Vec<ScoredChunk> {
    let max_keyword = match sparse.iter().map(|(_, s)| *s).fold(0.0, f32::max) {
        max if max > 0.0 => max,
        _ => 1.0,
    };

    let mut positions: HashMap<(PathBuf, String), usize> = HashMap::new();
    let mut fused: Vec<ScoredChunk> = Vec::new();

    for (rank, chunk) in dense.into_iter().enumerate() {
        let key = (chunk.source_file.clone(), chunk.content.clone());
        if positions.contains_key(&key) {
            continue;
        }
        positions.insert(key, fused.len());
        fused.push(ScoredChunk {
            chunk,
            score: 0.0,
            vector_rank: Some(rank),
            keyword_score: None,
        });
    }

    for (chunk, score) in sparse {
        let normalized = score / max_keyword;
        let key = (chunk.source_file.clone(), chunk.content.clone());
        match positions.get(&key) {
            Some(&i) => {
                let existing = &mut fused[i];
                if existing.keyword_score.is_none() {
                    existing.keyword_score = Some(normalized);
                }
            }
            None => {
                positions.insert(key, fused.len());
                fused.push(ScoredChunk {
                    chunk,
                    score: 0.0,
                    vector_rank: None,
                    keyword_score: Some(normalized),
                });
            }
        }
    }

    for candidate in &mut fused {
        let position = candidate
            .vector_rank
            .map_or(0.0, |rank| 1.0 / (rank as f32 + 1.0));
        candidate.score = weights.vector * position
            + weights.keyword * candidate.keyword_score.unwrap_or(0.0);
    }

    fused.retain(|c| c.score > 0.0);
    fused.sort_by(|a, b| b.score.total_cmp(&a.score));
    fused.truncate(k);
    fused
}

/// Render chunks as `## <source>` blocks for prompt assembly.
pub fn format_context(results: &[ScoredChunk]) -> String {
    results
        .iter()
        .map(|r| {
            format!(
                "## {}\n{}",
                r.chunk.source_file.display(),
                r.chunk.content.trim_end()
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Format results for human-readable terminal output.
pub fn format_human(results: &[ScoredChunk]) {
    if results.is_empty() {
        println!("No results found.");
        return;
    }

    for (i, r) in results.iter().enumerate() {
        println!(
            "{:>3}. [{:.3}] {}",
            i + 1,
            r.score,
            r.chunk.source_file.display()
        );
        if let Some(section) = r.chunk.metadata.get(META_SECTION) {
            println!("     {section}");
        }
        let preview: String = r
            .chunk
            .content
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .chars()
            .take(100)
            .collect();
        println!("     {preview}");
    }
    println!("\n{} result(s)", results.len());
}

#[derive(Serialize)]
struct JsonOutput<'a> {
    query: &'a str,
    result_count: usize,
    results: Vec<JsonResult<'a>>,
}

#[derive(Serialize)]
struct JsonResult<'a> {
    rank: usize,
    score: f32,
    source: String,
    vector_rank: Option<usize>,
    keyword_score: Option<f32>,
    metadata: &'a std::collections::BTreeMap<String, String>,
    content: &'a str,
}

/// Serialize results as a JSON document.
pub fn to_json(results: &[ScoredChunk], query: &str) -> Result<String> {
    let output = JsonOutput {
        query,
        result_count: results.len(),
        results: results
            .iter()
            .enumerate()
            .map(|(i, r)| JsonResult {
                rank: i + 1,
                score: r.score,
                source: r.chunk.source_file.display().to_string(),
                vector_rank: r.vector_rank,
                keyword_score: r.keyword_score,
                metadata: &r.chunk.metadata,
                content: &r.chunk.content,
            })
            .collect(),
    };
    Ok(serde_json::to_string(&output)?)
}
