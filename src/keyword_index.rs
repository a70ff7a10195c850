//! Per-session BM25 keyword scoring over a chunk set.
//!
//! The index lives in RAM and reflects exactly the chunks it was built
//! from. It is cheap enough to rebuild for every retrieval call and is
//! never persisted.
//!
//! Tokens are runs of alphanumeric characters, lowercased. Tokens of
//! [`MAX_TOKEN_BYTES`] bytes or more are dropped from both chunks and
//! queries, which still keeps long identifiers and hex digests.

use std::collections::HashSet;

use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    TantivyDocument,
    collector::TopDocs,
    doc,
    query::{BooleanQuery, Occur, Query, TermQuery},
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        TextAnalyzer,
        TokenStream,
    },
};

use crate::{chunking::Chunk, error::Result};

/// Name of the lowercasing word tokenizer.
const TOKENIZER: &str = "lower_words";

/// Length cap for a single token, in UTF-8 bytes.
pub const MAX_TOKEN_BYTES: usize = 256;

/// Indexing memory budget; tantivy's minimum for a single thread.
const WRITER_MEMORY_BUDGET: usize = 15_000_000;

mod fields {
    pub const ORDINAL: &str = "ordinal";
    pub const BODY: &str = "body";
}

/// BM25 scorer over an in-memory chunk set.
pub struct KeywordIndex {
    index: Index,
    reader: IndexReader,
    ordinal: Field,
    body: Field,
    chunks: Vec<Chunk>,
}

fn build_schema() -> (Schema, Field, Field) {
    let mut builder = Schema::builder();
    let ordinal = builder.add_u64_field(fields::ORDINAL, STORED | FAST);
    let body_opts = TextOptions::default().set_indexing_options(
        TextFieldIndexing::default()
            .set_tokenizer(TOKENIZER)
            .set_index_option(IndexRecordOption::WithFreqs),
    );
    let body = builder.add_text_field(fields::BODY, body_opts);
    (builder.build(), ordinal, body)
}

fn register_tokenizers(index: &Index) {
    let analyzer = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_BYTES))
        .filter(LowerCaser)
        .build();
    index.tokenizers().register(TOKENIZER, analyzer);
}

impl KeywordIndex {
    /// Index `chunks`, remembering their order for tie-breaking.
    pub fn build(chunks: &[Chunk]) -> Result<Self> {
        let (schema, ordinal, body) = build_schema();
        let index = Index::create_in_ram(schema);
        register_tokenizers(&index);

        if !chunks.is_empty() {
            let mut writer: IndexWriter =
                index.writer_with_num_threads(1, WRITER_MEMORY_BUDGET)?;
            for (i, chunk) in chunks.iter().enumerate() {
                writer.add_document(doc!(
                    ordinal => i as u64,
                    body => chunk.content.as_str(),
                ))?;
            }
            writer.commit()?;
        }

        let reader = index.reader()?;
        Ok(Self {
            index,
            reader,
            ordinal,
            body,
            chunks: chunks.to_vec(),
        })
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Lowercased word tokens of `text`, as the index sees them.
    fn tokenize(&self, text: &str) -> Result<Vec<String>> {
        let mut analyzer = self.index.tokenizer_for_field(self.body)?;
        let mut stream = analyzer.token_stream(text);
        let mut tokens = Vec::new();
        while stream.advance() {
            tokens.push(stream.token().text.clone());
        }
        Ok(tokens)
    }

    /// Score every chunk sharing at least one term with `query`.
    ///
    /// Results are sorted by descending BM25 score; equal scores keep the
    /// order the chunks were indexed in. Chunks without term overlap are
    /// not returned.
    pub fn score(&self, query: &str) -> Result<Vec<(Chunk, f32)>> {
        if self.chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut seen = HashSet::new();
        let clauses: Vec<(Occur, Box<dyn Query>)> = self
            .tokenize(query)?
            .into_iter()
            .filter(|token| seen.insert(token.clone()))
            .map(|token| {
                let term = Term::from_field_text(self.body, &token);
                let query: Box<dyn Query> =
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs));
                (Occur::Should, query)
            })
            .collect();
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let query = BooleanQuery::new(clauses);
        let top_docs = searcher.search(&query, &TopDocs::with_limit(self.chunks.len()))?;

        let mut scored = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            if score <= 0.0 {
                continue;
            }
            let doc: TantivyDocument = searcher.doc(address)?;
            let Some(ordinal) = doc
                .get_first(self.ordinal)
                .and_then(|v| v.as_u64())
                .and_then(|v| usize::try_from(v).ok())
            else {
                continue;
            };
            scored.push((ordinal, score));
        }
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));

        Ok(scored
            .into_iter()
            .filter_map(|(ordinal, score)| {
                self.chunks.get(ordinal).map(|c| (c.clone(), score))
            })
            .collect())
    }
}

impl std::fmt::Debug for KeywordIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordIndex")
            .field("chunks", &self.chunks.len())
            .finish_non_exhaustive()
    }
}
