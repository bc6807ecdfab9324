//! Storage abstraction for chunks and the hybrid ranking query.
//!
//! The [`ChunkStore`] trait is the single source of truth for persisted
//! chunk state. Two backends implement it:
//!
//! - [`postgres::PgStore`] — pgvector + pg_trgm + weighted tsvector; all
//!   scoring happens in one SQL statement.
//! - [`memory::MemoryStore`] — in-process backend for tests and offline
//!   runs, scoring through the shared [`crate::ranking`] helpers.
//!
//! # Uniqueness
//!
//! The tuple `(repository, ref, path, line_start, line_end)` is the natural
//! key. Upserts merge on conflict and never create duplicates; the merge
//! preserves an existing non-empty summary and an existing vector when the
//! incoming row lacks them.

pub mod memory;
pub mod postgres;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, SearchResult};

/// Optional filters and the raw query text carried into the ranking query.
#[derive(Debug, Clone, Default)]
pub struct QueryOpts {
    /// Equality filter on the repository label.
    pub repository: Option<String>,
    /// Equality filter on the ref label.
    pub refname: Option<String>,
    /// Equality filter on the language tag.
    pub language: Option<String>,
    /// Case-insensitive substring filter on the path.
    pub path_contains: Option<String>,
    /// Raw query text used for lexical scoring and ranking heuristics.
    pub query_text: String,
}

/// Metadata the indexer needs to decide delta work for one chunk.
#[derive(Debug, Clone, Default)]
pub struct ChunkMeta {
    pub content_hash: String,
    pub summary: String,
    pub has_summary_vec: bool,
}

/// Durable storage of chunks and the hybrid ranking query.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`init_schema`](ChunkStore::init_schema) | Idempotently ensure the schema for dimension D |
/// | [`upsert_chunk`](ChunkStore::upsert_chunk) | Insert or merge a chunk under the natural key |
/// | [`get_chunk_meta`](ChunkStore::get_chunk_meta) | Delta lookup (deliberately ignores ref) |
/// | [`search`](ChunkStore::search) | Hybrid ranking query |
/// | [`list_repositories`](ChunkStore::list_repositories) | Distinct sorted repository labels |
/// | [`list_refs`](ChunkStore::list_refs) | Distinct sorted refs of one repository |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    /// Idempotently ensure the schema exists for embedding dimension `dim`.
    ///
    /// Fails if a prior schema exists with a different dimension; migrating
    /// between dimensions is an explicit operator action, never implicit.
    async fn init_schema(&self, dim: usize) -> Result<()>;

    /// Insert or merge a chunk. On conflict with the natural key:
    /// content, language, and content_hash are overwritten; summary only by
    /// a non-empty value; the vector only when one is provided;
    /// summarized_at is refreshed with a non-empty summary; created_at is
    /// preserved.
    async fn upsert_chunk(
        &self,
        chunk: &Chunk,
        summary_vec: Option<&[f32]>,
        content_hash: &str,
    ) -> Result<()>;

    /// Look up delta metadata by `(repository, path, line_start, line_end)`.
    ///
    /// Ref is not part of the lookup: identical content reachable from
    /// several refs is tolerated without extra model work. Missing rows are
    /// not errors.
    async fn get_chunk_meta(
        &self,
        repository: &str,
        path: &str,
        line_start: i32,
        line_end: i32,
    ) -> Result<Option<ChunkMeta>>;

    /// Hybrid ranking query: up to `k` chunks matching the filters, ordered
    /// by the composite score. An empty trimmed `opts.query_text` yields an
    /// empty result; a `None` query vector degrades to lexical-only ranking.
    async fn search(
        &self,
        summary_vec: Option<&[f32]>,
        k: i64,
        opts: &QueryOpts,
    ) -> Result<Vec<SearchResult>>;

    /// Distinct repository labels, sorted.
    async fn list_repositories(&self) -> Result<Vec<String>>;

    /// Distinct refs of one repository, sorted.
    async fn list_refs(&self, repository: &str) -> Result<Vec<String>>;
}
