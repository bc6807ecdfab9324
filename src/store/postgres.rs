//! PostgreSQL-backed chunk store.
//!
//! One relation, `chunks`, carries the chunk fields, the summary embedding
//! (`pgvector`), and a generated weighted tsvector over path (A, with
//! non-alphanumerics folded to spaces), summary (B), and content (C).
//! Mandatory objects: the unique index on the natural key, a GIN index on
//! the tsvector, and an ivfflat cosine index on the embedding.
//!
//! The hybrid ranking query computes every signal of the composite score in
//! SQL and max-normalizes the continuous signals with window functions, so
//! scores are exact over the filtered candidate set — the ANN index
//! accelerates retrieval but never decides a score.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{PgPool, Row};

use crate::models::{Chunk, SearchResult};
use crate::ranking;

use super::{ChunkMeta, ChunkStore, QueryOpts};

/// Chunk store backed by PostgreSQL with pgvector and pg_trgm.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Check database connectivity within a 3-second deadline.
    pub async fn ping(&self) -> Result<()> {
        tokio::time::timeout(std::time::Duration::from_secs(3), async {
            sqlx::query("SELECT 1").execute(&self.pool).await
        })
        .await
        .context("database ping timed out")??;
        Ok(())
    }

    /// Dimension of an existing `chunks.summary_vec` column, if the relation
    /// exists. pgvector stores the dimension as the attribute typmod.
    async fn existing_dim(&self) -> Result<Option<i32>> {
        let typmod: Option<i32> = sqlx::query_scalar(
            r#"
            SELECT a.atttypmod
            FROM pg_attribute a
            WHERE a.attrelid = to_regclass('chunks')
              AND a.attname = 'summary_vec'
              AND NOT a.attisdropped
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(typmod)
    }
}

#[async_trait]
impl ChunkStore for PgStore {
    async fn init_schema(&self, dim: usize) -> Result<()> {
        if dim == 0 {
            bail!("embedding dimension must be greater than zero");
        }
        if let Some(existing) = self.existing_dim().await? {
            if existing != dim as i32 {
                bail!(
                    "chunks.summary_vec already exists with dimension {existing}, \
                     refusing to re-initialize with dimension {dim}; migrate explicitly"
                );
            }
        }

        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE EXTENSION IF NOT EXISTS pg_trgm")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
              id            TEXT PRIMARY KEY,
              repository    TEXT NOT NULL,
              ref           TEXT NOT NULL DEFAULT '',
              path          TEXT NOT NULL,
              language      TEXT,
              summary       TEXT,
              content       TEXT,
              line_start    INT,
              line_end      INT,
              summary_vec   vector({dim}),
              content_hash  TEXT,
              summarized_at TIMESTAMP WITH TIME ZONE,
              created_at    TIMESTAMP WITH TIME ZONE DEFAULT now(),
              ts_fielded    tsvector GENERATED ALWAYS AS (
                setweight(
                  to_tsvector('english',
                    regexp_replace(coalesce(path,''), '[^A-Za-z0-9]+', ' ', 'g')
                  ),
                  'A'
                ) ||
                setweight(to_tsvector('english', coalesce(summary,'')), 'B') ||
                setweight(to_tsvector('english', coalesce(content,'')), 'C')
              ) STORED
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS chunks_repo_ref_path_span_uidx \
             ON chunks (repository, ref, path, line_start, line_end)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS chunks_repository_idx ON chunks (repository)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS chunks_hash_idx ON chunks (content_hash)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS chunks_ts_fielded_gin ON chunks USING GIN (ts_fielded)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS chunks_summary_vec_idx \
             ON chunks USING ivfflat (summary_vec vector_cosine_ops) WITH (lists = 100)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn upsert_chunk(
        &self,
        chunk: &Chunk,
        summary_vec: Option<&[f32]>,
        content_hash: &str,
    ) -> Result<()> {
        let vec = summary_vec.map(|v| Vector::from(v.to_vec()));

        sqlx::query(
            r#"
            INSERT INTO chunks (
                id, repository, ref, path, language, summary, content,
                line_start, line_end, summary_vec, content_hash, summarized_at, created_at
            ) VALUES (
                $1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,
                CASE WHEN $6 <> '' THEN now() ELSE NULL END,
                now()
            )
            ON CONFLICT (repository, ref, path, line_start, line_end) DO UPDATE SET
                language      = EXCLUDED.language,
                content       = EXCLUDED.content,
                content_hash  = EXCLUDED.content_hash,
                summary       = COALESCE(NULLIF(EXCLUDED.summary, ''), chunks.summary),
                summarized_at = COALESCE(EXCLUDED.summarized_at, chunks.summarized_at),
                summary_vec   = COALESCE(EXCLUDED.summary_vec, chunks.summary_vec),
                created_at    = chunks.created_at
            "#,
        )
        .bind(&chunk.id)
        .bind(&chunk.repository)
        .bind(&chunk.refname)
        .bind(&chunk.path)
        .bind(&chunk.language)
        .bind(&chunk.summary)
        .bind(&chunk.content)
        .bind(chunk.line_start)
        .bind(chunk.line_end)
        .bind(vec)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_chunk_meta(
        &self,
        repository: &str,
        path: &str,
        line_start: i32,
        line_end: i32,
    ) -> Result<Option<ChunkMeta>> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(content_hash, '') AS content_hash,
                   COALESCE(summary, '') AS summary,
                   summary_vec IS NOT NULL AS has_summary_vec
            FROM chunks
            WHERE repository = $1 AND path = $2 AND line_start = $3 AND line_end = $4
            LIMIT 1
            "#,
        )
        .bind(repository)
        .bind(path)
        .bind(line_start)
        .bind(line_end)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| ChunkMeta {
            content_hash: r.get("content_hash"),
            summary: r.get("summary"),
            has_summary_vec: r.get("has_summary_vec"),
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

        let vec = summary_vec.map(|v| Vector::from(v.to_vec()));
        let tri_term = ranking::longest_token(qtext);
        let asked_script = ranking::wants_script(qtext);

        // Optional filters extend the WHERE clause with numbered params.
        let mut where_clause = String::from("TRUE");
        let mut arg_index = 5;
        if opts.repository.is_some() {
            where_clause.push_str(&format!(" AND repository = ${arg_index}"));
            arg_index += 1;
        }
        if opts.refname.is_some() {
            where_clause.push_str(&format!(" AND ref = ${arg_index}"));
            arg_index += 1;
        }
        if opts.language.is_some() {
            where_clause.push_str(&format!(" AND language = ${arg_index}"));
            arg_index += 1;
        }
        if opts.path_contains.is_some() {
            where_clause.push_str(&format!(" AND path ILIKE '%' || ${arg_index} || '%'"));
        }

        let sql = format!(
            r#"
WITH parsed AS (
  SELECT lower(x) AS lx
  FROM ts_debug('english', $2) d, unnest(d.lexemes) AS x
  WHERE d.alias NOT IN ('StopWord','Space','Blank','Punct','Num')
),
terms AS (
  SELECT COALESCE(ARRAY_AGG(DISTINCT lx), ARRAY[]::text[]) AS all_terms
  FROM parsed
),
q AS (
  SELECT
    $1::vector AS sv,
    to_tsquery('english',
      (SELECT CASE WHEN cardinality(all_terms) > 0
                   THEN array_to_string(all_terms, ' | ')
                   ELSE NULL END
       FROM terms)
    ) AS tq_any,
    phraseto_tsquery('english',
      (SELECT CASE WHEN cardinality(all_terms) > 0
                   THEN array_to_string(all_terms, ' ')
                   ELSE NULL END
       FROM terms)
    ) AS tq_phrase,
    NULLIF($3,'') AS tri_term,
    $4::bool AS asked_script
),
cand AS (
  SELECT
    id, repository, ref, path, language, summary, content, line_start, line_end, created_at,

    LEAST(GREATEST((1.0 - cosine_distance(summary_vec, (SELECT sv FROM q))), 0), 1) AS sem_sim,

    LEAST(GREATEST(
      ts_rank_cd(
        setweight(to_tsvector('english', coalesce(summary,'')), 'B'),
        (COALESCE((SELECT tq_any FROM q), ''::tsquery)
         || COALESCE((SELECT tq_phrase FROM q), ''::tsquery))
      ), 0), 1) AS lex_sum,

    COALESCE(similarity(lower(path), lower((SELECT tri_term FROM q))), 0) AS tri,

    CASE
      WHEN (SELECT asked_script FROM q) THEN
        CASE
          WHEN language IN ('shell','bash','sh','python','py','go') THEN 1
          WHEN language IN ('yaml','terraform','tf','json')         THEN -1
          ELSE 0
        END
      ELSE 0
    END AS script_bias,

    CASE
      WHEN lower(path) ~ '(^|/)(sample|example|test|mock|fixture|tmp|temp|sandbox)s?(/|\.|$)' THEN 1
      ELSE 0
    END AS noise_penalty
  FROM chunks
  WHERE {where_clause}
),
ranked AS (
  SELECT *,
         MAX(sem_sim) OVER() AS max_sem,
         MAX(lex_sum) OVER() AS max_lex,
         MAX(tri)     OVER() AS max_tri
  FROM cand
)
SELECT
  id, repository, ref, path, language, summary, content, line_start, line_end, created_at,
  (
      0.80 * COALESCE(sem_sim / NULLIF(max_sem,0), 0) +
      0.15 * COALESCE(lex_sum / NULLIF(max_lex,0), 0) +
      0.05 * COALESCE(tri     / NULLIF(max_tri,0), 0) +
      0.10 * script_bias -
      0.07 * noise_penalty
  ) AS score
FROM ranked
ORDER BY score DESC
LIMIT {limit}
"#,
            where_clause = where_clause,
            limit = k.max(0),
        );

        let mut query = sqlx::query(&sql)
            .bind(vec)
            .bind(qtext)
            .bind(tri_term)
            .bind(asked_script);
        if let Some(repository) = &opts.repository {
            query = query.bind(repository);
        }
        if let Some(refname) = &opts.refname {
            query = query.bind(refname);
        }
        if let Some(language) = &opts.language {
            query = query.bind(language);
        }
        if let Some(path_contains) = &opts.path_contains {
            query = query.bind(path_contains);
        }

        let rows = query.fetch_all(&self.pool).await?;

        let results = rows
            .iter()
            .map(|row| {
                let created_at: Option<DateTime<Utc>> = row.get("created_at");
                SearchResult {
                    chunk: Chunk {
                        id: row.get("id"),
                        repository: row.get("repository"),
                        refname: row.get("ref"),
                        path: row.get("path"),
                        language: row.get::<Option<String>, _>("language").unwrap_or_default(),
                        summary: row.get::<Option<String>, _>("summary").unwrap_or_default(),
                        content: row.get::<Option<String>, _>("content").unwrap_or_default(),
                        line_start: row.get::<Option<i32>, _>("line_start").unwrap_or_default(),
                        line_end: row.get::<Option<i32>, _>("line_end").unwrap_or_default(),
                        created_at: created_at.unwrap_or_else(Utc::now),
                    },
                    score: row.get("score"),
                }
            })
            .collect();

        Ok(results)
    }

    async fn list_repositories(&self) -> Result<Vec<String>> {
        let repos: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT repository FROM chunks ORDER BY repository")
                .fetch_all(&self.pool)
                .await?;
        Ok(repos)
    }

    async fn list_refs(&self, repository: &str) -> Result<Vec<String>> {
        let refs: Vec<String> =
            sqlx::query_scalar("SELECT DISTINCT ref FROM chunks WHERE repository = $1 ORDER BY ref")
                .bind(repository)
                .fetch_all(&self.pool)
                .await?;
        Ok(refs)
    }
}
