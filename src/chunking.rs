//! Chunks and the chunk source contract.
//!
//! A [`ChunkSource`] turns one file into a list of [`Chunk`]s. The
//! default [`TextChunkSource`] reads the file as UTF-8 and splits it into
//! character windows (optionally overlapping) that end on word
//! boundaries, tagging each chunk with its index, file type and, for
//! markdown, the nearest preceding section heading.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

/// Metadata key holding the zero-based chunk index within its file.
pub const META_CHUNK_INDEX: &str = "chunk_index";
/// Metadata key holding the file extension.
pub const META_FILE_TYPE: &str = "file_type";
/// Metadata key holding the nearest markdown heading.
pub const META_SECTION: &str = "section";
/// Metadata key holding the manifest key of the source file.
pub const META_SOURCE: &str = "source";

/// The atomic retrievable unit.
///
/// Chunks are immutable once embedded. When their source file changes
/// they are superseded by the chunks of the new version, never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    /// Path of the file this chunk came from, relative to the watched
    /// directory once the chunk has passed through the index manager.
    pub source_file: PathBuf,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl Chunk {
    pub fn new(content: impl Into<String>, source_file: impl Into<PathBuf>) -> Self {
        Self {
            content: content.into(),
            source_file: source_file.into(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// Turns a file into chunks.
///
/// Implementations must not fail for files they cannot parse: they return
/// an empty list and the caller logs and skips the file.
pub trait ChunkSource: Send + Sync {
    fn load(&self, path: &Path) -> Vec<Chunk>;
}

/// A window of text from a larger document.
#[derive(Debug, Clone)]
pub struct TextWindow {
    pub text: String,
    /// Zero-based window index within the document.
    pub index: usize,
    /// Byte offset where this window starts in the original document.
    pub start_offset: usize,
}

/// Split text into windows of about `chunk_size` characters, each
/// starting `overlap` characters before the previous window's end.
///
/// Windows end on whitespace where one is found in the last 100
/// characters. A trailing remainder shorter than a quarter window is
/// merged into the last window, so every character of the input lands in
/// at least one window. Whitespace-only windows are dropped.
///
/// # Examples
///
/// ```
/// use docweave::chunking::chunk_text;
///
/// let chunks = chunk_text("Hello, world!", 1000, 0);
/// assert_eq!(chunks.len(), 1);
/// assert_eq!(chunks[0].text, "Hello, world!");
///
/// let text = "word ".repeat(500);
/// let chunks = chunk_text(&text, 1000, 200);
/// assert!(chunks.len() >= 2);
/// let last = chunks.last().unwrap();
/// assert_eq!(last.start_offset + last.text.len(), text.len());
/// ```
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<TextWindow> {
    let char_count = text.chars().count();

    if text.trim().is_empty() {
        return Vec::new();
    }
    if char_count <= chunk_size {
        return vec![TextWindow {
            text: text.to_string(),
            index: 0,
            start_offset: 0,
        }];
    }

    // char index -> byte index, with a sentinel for the end of the text
    let char_to_byte: Vec<usize> = text
        .char_indices()
        .map(|(byte_idx, _)| byte_idx)
        .chain(std::iter::once(text.len()))
        .collect();

    let min_tail = (chunk_size / 4).max(1);
    let mut windows = Vec::new();
    let mut start_char = 0;
    let mut index = 0;

    loop {
        let mut end_char = (start_char + chunk_size).min(char_count);
        if char_count - end_char < min_tail {
            end_char = char_count;
        }

        let window_end_char = if end_char < char_count {
            find_word_boundary_char(text, &char_to_byte, start_char, end_char)
        } else {
            end_char
        };

        let start_byte = char_to_byte[start_char];
        let end_byte = char_to_byte[window_end_char];

        let slice = &text[start_byte..end_byte];
        if !slice.trim().is_empty() {
            windows.push(TextWindow {
                text: slice.to_string(),
                index,
                start_offset: start_byte,
            });
            index += 1;
        }

        if window_end_char >= char_count {
            break;
        }
        // never past the previous end, always at least one char forward
        start_char = window_end_char
            .saturating_sub(overlap)
            .max(start_char + 1);
    }

    windows
}

/// Find a break point at or before `pos_char`, preferring whitespace
/// within the last 100 characters of the window.
fn find_word_boundary_char(
    text: &str,
    char_to_byte: &[usize],
    window_start_char: usize,
    pos_char: usize,
) -> usize {
    let search_start_char = pos_char.saturating_sub(100).max(window_start_char + 1);
    if search_start_char >= pos_char {
        return pos_char;
    }

    let start_byte = char_to_byte[search_start_char];
    let end_byte = char_to_byte[pos_char];
    let region = &text[start_byte..end_byte];

    if let Some(ws_offset) = region.rfind(char::is_whitespace) {
        let ws_byte = start_byte + ws_offset;
        // first char strictly after the whitespace
        let idx = char_to_byte.partition_point(|&b| b <= ws_byte);
        return idx.min(pos_char);
    }

    pos_char
}

/// Byte offsets and titles of markdown headings in `text`.
fn markdown_headings(text: &str) -> Vec<(usize, String)> {
    let mut headings = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with('#') {
            let title = trimmed.trim_start_matches('#').trim();
            if !title.is_empty() {
                headings.push((offset, title.to_string()));
            }
        }
        offset += line.len();
    }
    headings
}

/// Default chunk source for plain text, markdown and source files.
#[derive(Debug, Clone, Copy)]
pub struct TextChunkSource {
    chunk_size: usize,
    overlap: usize,
}

impl Default for TextChunkSource {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_OVERLAP)
    }
}

impl TextChunkSource {
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
            overlap,
        }
    }

    /// Chunk already-loaded text as if it came from `path`.
    pub fn chunk_str(&self, path: &Path, text: &str) -> Vec<Chunk> {
        let file_type = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        let headings = if matches!(file_type.as_str(), "md" | "markdown") {
            markdown_headings(text)
        } else {
            Vec::new()
        };

        chunk_text(text, self.chunk_size, self.overlap)
            .into_iter()
            .map(|window| {
                let mut chunk = Chunk::new(window.text, path)
                    .with_metadata(META_CHUNK_INDEX, window.index.to_string())
                    .with_metadata(META_FILE_TYPE, file_type.clone());
                let start = window.start_offset;
                let end = start + chunk.content.len();
                let section = headings
                    .iter()
                    .rev()
                    .find(|(offset, _)| *offset <= start)
                    .or_else(|| headings.iter().find(|(offset, _)| *offset < end));
                if let Some((_, title)) = section {
                    chunk.metadata.insert(META_SECTION.into(), title.clone());
                }
                chunk
            })
            .collect()
    }
}

impl ChunkSource for TextChunkSource {
    fn load(&self, path: &Path) -> Vec<Chunk> {
        match std::fs::read_to_string(path) {
            Ok(text) => self.chunk_str(path, &text),
            Err(e) => {
                tracing::debug!(path = %path.display(), "unreadable as text: {e}");
                Vec::new()
            }
        }
    }
}
