//! Fixed line-window chunking.
//!
//! Windows are anchored at line 1, so an edit that keeps the line count only
//! changes the windows it touches. That keeps reindex deltas proportional to
//! the edit.

use serde::{Deserialize, Serialize};

/// Bytes inspected when sniffing for binary content.
const BINARY_SNIFF_BYTES: usize = 8 * 1024;

/// One line window of a source file, before embedding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub filepath: String,
    /// 1-based, inclusive.
    pub start_line: usize,
    /// 1-based, inclusive.
    pub end_line: usize,
    pub content: String,
    pub content_hash: String,
}

/// Chunker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Lines per window (default: 50).
    pub lines_per_chunk: usize,
    /// Longer lines are truncated in the chunk text (default: 1000).
    pub max_line_chars: usize,
    /// Files above this size are skipped (default: 1 MiB).
    pub max_file_bytes: u64,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            lines_per_chunk: 50,
            max_line_chars: 1000,
            max_file_bytes: 1024 * 1024,
        }
    }
}

/// Split `source` into line windows.
///
/// Whitespace-only windows produce no chunk. A zero `lines_per_chunk` is
/// treated as 1.
#[must_use]
pub fn chunk_source(source: &str, filepath: &str, config: &ChunkerConfig) -> Vec<ChunkSpan> {
    let lines: Vec<&str> = source.lines().collect();
    let window = config.lines_per_chunk.max(1);

    lines
        .chunks(window)
        .enumerate()
        .filter_map(|(i, window_lines)| {
            if window_lines.iter().all(|l| l.trim().is_empty()) {
                return None;
            }
            let start_line = i * window + 1;
            let end_line = start_line + window_lines.len() - 1;
            let content = window_lines
                .iter()
                .map(|l| truncate_chars(l, config.max_line_chars))
                .collect::<Vec<_>>()
                .join("\n");
            Some(ChunkSpan {
                filepath: filepath.to_owned(),
                start_line,
                end_line,
                content_hash: blake3_hex(&content),
                content,
            })
        })
        .collect()
}

/// Deterministic chunk id: UUIDv5 over corpus, location and content hash.
#[must_use]
pub fn chunk_id(corpus_id: &str, span: &ChunkSpan) -> String {
    let key = format!(
        "{corpus_id}\0{}\0{}\0{}\0{}",
        span.filepath, span.start_line, span.end_line, span.content_hash
    );
    uuid::Uuid::new_v5(&uuid::Uuid::NAMESPACE_OID, key.as_bytes()).to_string()
}

/// A NUL byte in the leading bytes marks the file as binary.
#[must_use]
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(BINARY_SNIFF_BYTES).any(|b| *b == 0)
}

/// Text sent to the embedder: a path header followed by the raw chunk.
#[must_use]
pub fn contextualize_for_embedding(relative_path: &str, content: &str) -> String {
    let mut text = String::with_capacity(content.len() + relative_path.len() + 3);
    text.push_str("# ");
    text.push_str(relative_path);
    text.push('\n');
    text.push_str(content);
    text
}

fn truncate_chars(line: &str, max: usize) -> &str {
    match line.char_indices().nth(max) {
        Some((idx, _)) => &line[..idx],
        None => line,
    }
}

fn blake3_hex(input: &str) -> String {
    blake3::hash(input.as_bytes()).to_hex().to_string()
}
