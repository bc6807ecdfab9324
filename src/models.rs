//! Core data types shared across the indexing and retrieval pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A contiguous line range of a file, stored as an indivisible unit of
/// retrieval.
///
/// Chunks are uniquely identified in the store by the natural key
/// `(repository, ref, path, line_start, line_end)`. The `id` field is a
/// deterministic digest of `path#line_start:line_end` so the same span always
/// maps to the same identifier across runs and hosts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    /// Hex SHA-256 of `"{path}#{line_start}:{line_end}"`.
    pub id: String,
    /// Logical repository label (clone URL or `"local"`); never parsed.
    pub repository: String,
    /// Symbolic snapshot label (branch, tag, or directory name); may be empty.
    #[serde(rename = "ref")]
    pub refname: String,
    /// Repo-relative path with forward slashes.
    pub path: String,
    /// Lowercase language tag derived from the file extension; `""` if unknown.
    pub language: String,
    /// Short prose description of the chunk (≤ ~240 chars).
    pub summary: String,
    /// Raw chunk text, exactly the named line span.
    pub content: String,
    /// 1-based inclusive start line.
    pub line_start: i32,
    /// 1-based inclusive end line; always `>= line_start`.
    pub line_end: i32,
    /// Set on first insert, preserved across updates.
    pub created_at: DateTime<Utc>,
}

/// A ranked chunk returned by the hybrid search query.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    /// Composite hybrid score; the search service reports any non-finite
    /// value as 0.
    pub score: f64,
}
