//! In-memory [`ChunkStore`] implementation for tests and offline runs.
//!
//! Rows live in a `Vec` behind `std::sync::RwLock`; the natural key is
//! enforced by scan-and-replace on upsert. Ranking reuses the pure helpers
//! in [`crate::ranking`], with one simplification: the lexical signal is
//! query-term overlap against the summary rather than a weighted tsvector
//! rank. Everything the ranking tests pin down — clamps, normalization,
//! bias, penalty, weights — is shared arithmetic with the SQL backend.

use std::sync::RwLock;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Chunk, SearchResult};
use crate::ranking;

use super::{ChunkMeta, ChunkStore, QueryOpts};

/// Words excluded from lexical term extraction, mirroring the stopword
/// filtering the SQL backend gets from its text-search dictionary.
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "is", "it", "of", "on",
    "or", "that", "the", "this", "to", "was", "were", "will", "with",
];

struct StoredRow {
    chunk: Chunk,
    summary_vec: Option<Vec<f32>>,
    content_hash: String,
    _summarized_at: Option<DateTime<Utc>>,
}

/// In-memory chunk store.
pub struct MemoryStore {
    rows: RwLock<Vec<StoredRow>>,
    dim: RwLock<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            dim: RwLock::new(None),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Fraction of extracted query terms present in the summary, in `[0, 1]`.
fn lexical_overlap(query: &str, summary: &str) -> f64 {
    let terms: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1 && !STOPWORDS.contains(t))
        .map(|t| t.to_string())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }
    let summary = summary.to_lowercase();
    let matched = terms.iter().filter(|t| summary.contains(t.as_str())).count();
    (matched as f64 / terms.len() as f64).clamp(0.0, 1.0)
}

#[async_trait]
impl ChunkStore for MemoryStore {
    async fn init_schema(&self, dim: usize) -> Result<()> {
        if dim == 0 {
            bail!("embedding dimension must be greater than zero");
        }
        let mut stored = self.dim.write().unwrap();
        match *stored {
            Some(existing) if existing != dim => bail!(
                "store already initialized with dimension {existing}, \
                 refusing to re-initialize with dimension {dim}; migrate explicitly"
            ),
            _ => *stored = Some(dim),
        }
        Ok(())
    }

    async fn upsert_chunk(
        &self,
        chunk: &Chunk,
        summary_vec: Option<&[f32]>,
        content_hash: &str,
    ) -> Result<()> {
        let mut rows = self.rows.write().unwrap();
        let existing = rows.iter_mut().find(|r| {
            r.chunk.repository == chunk.repository
                && r.chunk.refname == chunk.refname
                && r.chunk.path == chunk.path
                && r.chunk.line_start == chunk.line_start
                && r.chunk.line_end == chunk.line_end
        });

        match existing {
            Some(row) => {
                row.chunk.id = chunk.id.clone();
                row.chunk.language = chunk.language.clone();
                row.chunk.content = chunk.content.clone();
                row.content_hash = content_hash.to_string();
                if !chunk.summary.is_empty() {
                    row.chunk.summary = chunk.summary.clone();
                    row._summarized_at = Some(Utc::now());
                }
                if let Some(vec) = summary_vec {
                    row.summary_vec = Some(vec.to_vec());
                }
                // created_at is preserved.
            }
            None => {
                let now = Utc::now();
                rows.push(StoredRow {
                    chunk: Chunk {
                        created_at: now,
                        ..chunk.clone()
                    },
                    summary_vec: summary_vec.map(|v| v.to_vec()),
                    content_hash: content_hash.to_string(),
                    _summarized_at: if chunk.summary.is_empty() {
                        None
                    } else {
                        Some(now)
                    },
                });
            }
        }
        Ok(())
    }

    async fn get_chunk_meta(
        &self,
        repository: &str,
        path: &str,
        line_start: i32,
        line_end: i32,
    ) -> Result<Option<ChunkMeta>> {
        let rows = self.rows.read().unwrap();
        Ok(rows
            .iter()
            .find(|r| {
                r.chunk.repository == repository
                    && r.chunk.path == path
                    && r.chunk.line_start == line_start
                    && r.chunk.line_end == line_end
            })
            .map(|r| ChunkMeta {
                content_hash: r.content_hash.clone(),
                summary: r.chunk.summary.clone(),
                has_summary_vec: r.summary_vec.is_some(),
            }))
    }

    async fn search(
        &self,
        summary_vec: Option<&[f32]>,
        k: i64,
        opts: &QueryOpts,
    ) -> Result<Vec<SearchResult>> {
        let qtext = opts.query_text.trim();
        if qtext.is_empty() {
            return Ok(Vec::new());
        }

        let tri_term = ranking::longest_token(qtext);
        let asked_script = ranking::wants_script(qtext);

        struct Candidate {
            chunk: Chunk,
            sem: f64,
            lex: f64,
            tri: f64,
            bias: f64,
            noise: f64,
        }

        let rows = self.rows.read().unwrap();
        let candidates: Vec<Candidate> = rows
            .iter()
            .filter(|r| {
                opts.repository
                    .as_deref()
                    .map_or(true, |v| r.chunk.repository == v)
                    && opts.refname.as_deref().map_or(true, |v| r.chunk.refname == v)
                    && opts
                        .language
                        .as_deref()
                        .map_or(true, |v| r.chunk.language == v)
                    && opts.path_contains.as_deref().map_or(true, |v| {
                        r.chunk.path.to_lowercase().contains(&v.to_lowercase())
                    })
            })
            .map(|r| Candidate {
                chunk: r.chunk.clone(),
                sem: ranking::sem_sim(r.summary_vec.as_deref(), summary_vec),
                lex: lexical_overlap(qtext, &r.chunk.summary),
                tri: if tri_term.is_empty() {
                    0.0
                } else {
                    ranking::trigram_similarity(&r.chunk.path, &tri_term)
                },
                bias: ranking::script_bias(asked_script, &r.chunk.language),
                noise: ranking::noise_penalty(&r.chunk.path),
            })
            .collect();
        drop(rows);

        let max_sem = candidates.iter().map(|c| c.sem).fold(0.0, f64::max);
        let max_lex = candidates.iter().map(|c| c.lex).fold(0.0, f64::max);
        let max_tri = candidates.iter().map(|c| c.tri).fold(0.0, f64::max);

        let mut results: Vec<SearchResult> = candidates
            .into_iter()
            .map(|c| {
                let score = ranking::composite(
                    ranking::normalized(c.sem, max_sem),
                    ranking::normalized(c.lex, max_lex),
                    ranking::normalized(c.tri, max_tri),
                    c.bias,
                    c.noise,
                );
                SearchResult {
                    chunk: c.chunk,
                    score,
                }
            })
            .collect();

        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        results.truncate(k.max(0) as usize);
        Ok(results)
    }

    async fn list_repositories(&self) -> Result<Vec<String>> {
        let rows = self.rows.read().unwrap();
        let mut repos: Vec<String> = rows.iter().map(|r| r.chunk.repository.clone()).collect();
        repos.sort();
        repos.dedup();
        Ok(repos)
    }

    async fn list_refs(&self, repository: &str) -> Result<Vec<String>> {
        let rows = self.rows.read().unwrap();
        let mut refs: Vec<String> = rows
            .iter()
            .filter(|r| r.chunk.repository == repository)
            .map(|r| r.chunk.refname.clone())
            .collect();
        refs.sort();
        refs.dedup();
        Ok(refs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(path: &str, language: &str, summary: &str) -> Chunk {
        Chunk {
            id: format!("id-{path}"),
            repository: "repo".to_string(),
            refname: "main".to_string(),
            path: path.to_string(),
            language: language.to_string(),
            summary: summary.to_string(),
            content: String::new(),
            line_start: 1,
            line_end: 1,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_init_schema_rejects_dim_change() {
        let store = MemoryStore::new();
        store.init_schema(3).await.unwrap();
        store.init_schema(3).await.unwrap();
        assert!(store.init_schema(4).await.is_err());
    }

    #[tokio::test]
    async fn test_lists_are_distinct_and_sorted() {
        let store = MemoryStore::new();
        let mut b = chunk("b.go", "go", "b");
        b.repository = "zeta".to_string();
        let mut a = chunk("a.go", "go", "a");
        a.repository = "alpha".to_string();
        let mut a2 = chunk("a2.go", "go", "a2");
        a2.repository = "alpha".to_string();
        a2.refname = "dev".to_string();
        for c in [&b, &a, &a2] {
            store.upsert_chunk(c, None, "h").await.unwrap();
        }
        assert_eq!(store.list_repositories().await.unwrap(), vec!["alpha", "zeta"]);
        assert_eq!(store.list_refs("alpha").await.unwrap(), vec!["dev", "main"]);
    }

    #[test]
    fn test_lexical_overlap() {
        assert_eq!(lexical_overlap("wipe disk", "Wipes the scratch disk"), 1.0);
        assert_eq!(lexical_overlap("wipe disk", "unrelated text"), 0.0);
        let partial = lexical_overlap("wipe disk quota", "wipes a disk");
        assert!(partial > 0.0 && partial < 1.0);
        // Stopwords alone extract no terms.
        assert_eq!(lexical_overlap("the of and", "the of and"), 0.0);
    }
}
