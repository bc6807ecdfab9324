//! Ranking semantics over the in-memory store: merge rules, the empty-query
//! property, bias and penalty scenarios, graceful embedder degradation, and
//! the non-finite score clamp.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use repo_scout::ai::{ModelClient, ModelError};
use repo_scout::models::{Chunk, SearchResult};
use repo_scout::search::SearchService;
use repo_scout::store::memory::MemoryStore;
use repo_scout::store::{ChunkMeta, ChunkStore, QueryOpts};

fn chunk(path: &str, language: &str, summary: &str) -> Chunk {
    Chunk {
        id: format!("id-{path}"),
        repository: "repo".to_string(),
        refname: "main".to_string(),
        path: path.to_string(),
        language: language.to_string(),
        summary: summary.to_string(),
        content: format!("content of {path}"),
        line_start: 1,
        line_end: 3,
        created_at: Utc::now(),
    }
}

fn opts(query: &str) -> QueryOpts {
    QueryOpts {
        query_text: query.to_string(),
        ..QueryOpts::default()
    }
}

async fn store_with(rows: &[(Chunk, Option<Vec<f32>>)]) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store.init_schema(3).await.unwrap();
    for (c, vec) in rows {
        store
            .upsert_chunk(c, vec.as_deref(), &format!("hash-{}", c.path))
            .await
            .unwrap();
    }
    store
}

// ── merge rules ─────────────────────────────────────────────

#[tokio::test]
async fn test_merge_preserves_nonempty_summary() {
    let store = store_with(&[]).await;
    let mut c = chunk("src/a.go", "go", "A real summary.");
    store.upsert_chunk(&c, Some(&[0.1, 0.2, 0.3]), "h1").await.unwrap();

    // Second upsert with empty summary and no vector.
    c.summary = String::new();
    store.upsert_chunk(&c, None, "h2").await.unwrap();

    let meta = store.get_chunk_meta("repo", "src/a.go", 1, 3).await.unwrap().unwrap();
    assert_eq!(meta.summary, "A real summary.");
    assert!(meta.has_summary_vec);
    assert_eq!(meta.content_hash, "h2", "content_hash must still be overwritten");
}

#[tokio::test]
async fn test_merge_overwrites_content_fields() {
    let store = store_with(&[]).await;
    let mut c = chunk("src/a.go", "go", "first");
    store.upsert_chunk(&c, None, "h1").await.unwrap();

    c.language = "shell".to_string();
    c.content = "new content".to_string();
    c.summary = "second".to_string();
    store.upsert_chunk(&c, None, "h2").await.unwrap();

    let rows = store.search(None, 10, &opts("anything")).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].chunk.language, "shell");
    assert_eq!(rows[0].chunk.content, "new content");
    assert_eq!(rows[0].chunk.summary, "second");
}

#[tokio::test]
async fn test_distinct_refs_are_distinct_rows() {
    let store = store_with(&[]).await;
    let mut c = chunk("src/a.go", "go", "summary");
    store.upsert_chunk(&c, None, "h").await.unwrap();
    c.refname = "release".to_string();
    store.upsert_chunk(&c, None, "h").await.unwrap();

    let rows = store.search(None, 10, &opts("anything")).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(store.list_refs("repo").await.unwrap(), vec!["main", "release"]);
}

// ── query properties ────────────────────────────────────────

#[tokio::test]
async fn test_empty_query_returns_empty() {
    let store = store_with(&[(chunk("src/a.go", "go", "summary"), Some(vec![0.1, 0.2, 0.3]))]).await;
    let results = store.search(Some(&[0.1, 0.2, 0.3]), 10, &opts("")).await.unwrap();
    assert!(results.is_empty());
    let results = store.search(None, 10, &opts("   ")).await.unwrap();
    assert!(results.is_empty());
}

#[tokio::test]
async fn test_filters_restrict_candidates() {
    let mut other_repo = chunk("src/b.go", "go", "other repository");
    other_repo.repository = "elsewhere".to_string();
    let store = store_with(&[
        (chunk("src/a.go", "go", "alpha"), None),
        (chunk("src/c.py", "python", "gamma"), None),
        (other_repo, None),
    ])
    .await;

    let mut o = opts("anything");
    o.repository = Some("repo".to_string());
    assert_eq!(store.search(None, 10, &o).await.unwrap().len(), 2);

    o.language = Some("python".to_string());
    let results = store.search(None, 10, &o).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.path, "src/c.py");

    let mut o = opts("anything");
    o.path_contains = Some("B.GO".to_string());
    let results = store.search(None, 10, &o).await.unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].chunk.repository, "elsewhere");
}

#[tokio::test]
async fn test_k_limits_results() {
    let store = store_with(&[
        (chunk("a.go", "go", "one"), None),
        (chunk("b.go", "go", "two"), None),
        (chunk("c.go", "go", "three"), None),
    ])
    .await;
    assert_eq!(store.search(None, 2, &opts("anything")).await.unwrap().len(), 2);
    assert_eq!(store.search(None, 0, &opts("anything")).await.unwrap().len(), 0);
}

// ── scenario: script bias ───────────────────────────────────

#[tokio::test]
async fn test_script_query_prefers_shell_over_yaml() {
    let vec = vec![0.1, 0.2, 0.3];
    let summary = "Deletes every partition on the data disk.";
    let store = store_with(&[
        (chunk("scripts/wipe.sh", "shell", summary), Some(vec.clone())),
        (chunk("config/wipe.yaml", "yaml", summary), Some(vec.clone())),
    ])
    .await;

    let results = store
        .search(Some(&vec), 10, &opts("script that deletes disk"))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.path, "scripts/wipe.sh");
    // +1 vs −1 bias is worth 0.20; tri can differ by at most 0.05.
    assert!(
        results[0].score >= results[1].score + 0.10,
        "bias separation too small: {} vs {}",
        results[0].score,
        results[1].score
    );
}

// ── scenario: noise penalty ─────────────────────────────────

#[tokio::test]
async fn test_noise_path_scores_exactly_penalty_below() {
    let vec = vec![0.4, 0.5, 0.6];
    let summary = "Formats floating point numbers for display.";
    let store = store_with(&[
        (chunk("src/foo.go", "go", summary), Some(vec.clone())),
        (chunk("samples/foo.go", "go", summary), Some(vec.clone())),
    ])
    .await;

    // No script keyword, and the longest token shares no trigrams with
    // either path, so only the noise penalty separates the two rows.
    let results = store
        .search(Some(&vec), 10, &opts("quizzical wizardry"))
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.path, "src/foo.go");
    let delta = results[0].score - results[1].score;
    assert!(
        (delta - 0.07).abs() < 1e-9,
        "expected exactly the noise penalty, got {delta}"
    );
}

// ── scenario: embedder down ─────────────────────────────────

/// A model client whose every call fails upstream.
struct DownClient;

#[async_trait]
impl ModelClient for DownClient {
    async fn embed(&self, _: &str) -> Result<Vec<f32>, ModelError> {
        Err(ModelError::Upstream("connection refused".to_string()))
    }

    async fn summarize(&self, _: &str, _: &str, _: &str) -> Result<String, ModelError> {
        Err(ModelError::Upstream("connection refused".to_string()))
    }

    fn dim(&self) -> usize {
        3
    }
}

#[tokio::test]
async fn test_embedder_down_degrades_to_lexical_ranking() {
    let store = store_with(&[
        (
            chunk("ops/rotate.rb", "ruby", "Rotates signing keys for the release pipeline."),
            Some(vec![0.9, 0.1, 0.1]),
        ),
        (
            chunk("cfg/parse.go", "go", "Parses configuration files."),
            Some(vec![0.1, 0.9, 0.1]),
        ),
    ])
    .await;

    let service = SearchService::new(Arc::new(DownClient), store);
    let results = service
        .query("rotates signing keys", 10, QueryOpts::default())
        .await
        .expect("embed failure must not surface to the caller");

    assert_eq!(results.len(), 2);
    assert_eq!(results[0].chunk.path, "ops/rotate.rb");
    assert!(results.iter().all(|r| r.score.is_finite()));
}

#[tokio::test]
async fn test_service_trims_query_and_returns_empty_for_blank() {
    let store = store_with(&[(chunk("src/a.go", "go", "summary"), None)]).await;
    let service = SearchService::new(Arc::new(DownClient), store);
    let results = service.query("   \n ", 10, QueryOpts::default()).await.unwrap();
    assert!(results.is_empty());
}

// ── score hygiene ───────────────────────────────────────────

#[tokio::test]
async fn test_scores_stay_within_formula_bounds() {
    let store = store_with(&[
        (chunk("scripts/run.sh", "shell", "Runs the nightly batch."), Some(vec![0.2, 0.1, 0.9])),
        (chunk("deploy/main.tf", "terraform", "Provisions the batch cluster."), Some(vec![0.3, 0.2, 0.8])),
        (chunk("samples/batch.yaml", "yaml", "Sample batch definition."), Some(vec![0.1, 0.1, 0.1])),
        (chunk("src/batch.go", "go", "Schedules nightly batch jobs."), None),
    ])
    .await;

    let results = store
        .search(Some(&[0.2, 0.1, 0.9]), 10, &opts("script for the nightly batch"))
        .await
        .unwrap();
    assert_eq!(results.len(), 4);
    for r in &results {
        assert!(r.score.is_finite());
        assert!(r.score >= -0.17 - 1e-9, "score below floor: {}", r.score);
        assert!(r.score <= 1.10 + 1e-9, "score above ceiling: {}", r.score);
    }
    // Descending order.
    for pair in results.windows(2) {
        assert!(pair[0].score >= pair[1].score);
    }
}

/// A store whose ranking query reports a non-finite score.
struct NanStore;

#[async_trait]
impl ChunkStore for NanStore {
    async fn init_schema(&self, _dim: usize) -> anyhow::Result<()> {
        Ok(())
    }

    async fn upsert_chunk(
        &self,
        _chunk: &Chunk,
        _summary_vec: Option<&[f32]>,
        _content_hash: &str,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_chunk_meta(
        &self,
        _repository: &str,
        _path: &str,
        _line_start: i32,
        _line_end: i32,
    ) -> anyhow::Result<Option<ChunkMeta>> {
        Ok(None)
    }

    async fn search(
        &self,
        _summary_vec: Option<&[f32]>,
        _k: i64,
        _opts: &QueryOpts,
    ) -> anyhow::Result<Vec<SearchResult>> {
        Ok(vec![
            SearchResult {
                chunk: chunk("src/a.go", "go", "nan row"),
                score: f64::NAN,
            },
            SearchResult {
                chunk: chunk("src/b.go", "go", "inf row"),
                score: f64::INFINITY,
            },
        ])
    }

    async fn list_repositories(&self) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn list_refs(&self, _repository: &str) -> anyhow::Result<Vec<String>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn test_non_finite_scores_surface_as_zero() {
    let service = SearchService::new(Arc::new(DownClient), Arc::new(NanStore));
    let results = service.query("anything", 10, QueryOpts::default()).await.unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].score, 0.0);
    assert_eq!(results[1].score, 0.0);
}
