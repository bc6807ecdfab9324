//! Indexing pipeline: walk → filter → chunk → delta-gated model work → upsert.
//!
//! The pipeline converts a local filesystem tree plus `(repository, ref)`
//! labels into a consistent set of persisted chunks while doing the minimum
//! upstream model work. A content hash per chunk gates summarization and
//! embedding: unchanged chunks with a summary and a vector trigger no model
//! calls at all, which makes back-to-back runs over an unchanged tree free.
//!
//! # Concurrency
//!
//! One walker task produces work items into a bounded channel; a pool of
//! worker tasks drains it. The walker blocks when the channel is full
//! (backpressure against fast disks and slow model APIs) and closes the
//! channel when the walk completes. Cancellation interrupts the walker send
//! and is observed by workers at their next dequeue.
//!
//! # Failure policy
//!
//! Progress over completeness: a failed summarize falls back to a heuristic
//! summary, a failed embed drops the vector for this round, and a failed
//! upsert is logged — none of them aborts the run.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use sha2::{Digest, Sha256};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

use crate::ai::ModelClient;
use crate::models::Chunk;
use crate::store::ChunkStore;

/// Worker pool cap; bounded to avoid overwhelming the model API.
/// Revisit once an upstream rate limit is known.
const MAX_WORKERS: usize = 8;

/// Upper bound on chunk characters handed to a summarize call.
const SUMMARIZE_INPUT_CAP: usize = 400_000;

/// Upper bound on the heuristic summary length.
const HEURISTIC_SUMMARY_MAX: usize = 240;

/// Directory names whose contents are never indexed.
const SKIP_DIRS: &[&str] = &[
    "vendor",
    ".git",
    ".terraform",
    "node_modules",
    "target",
    "build",
    "dist",
    "out",
    "bin",
    "obj",
    ".venv",
    "venv",
    "__pycache__",
    ".pytest_cache",
    ".gradle",
    ".m2",
    ".idea",
    "coverage",
    ".cache",
];

/// Binary and noise extensions that are never indexed.
const SKIP_EXTENSIONS: &[&str] = &[
    ".png", ".jpg", ".jpeg", ".gif", ".pdf", ".webp", ".lock", ".zip", ".svg", ".exe", ".dll",
    ".xml", ".sum", ".mod", ".sql",
];

/// A piece of a file: the exact text of a 1-based inclusive line span.
#[derive(Debug, Clone)]
pub struct FileChunk {
    pub content: String,
    pub line_start: i32,
    pub line_end: i32,
}

/// Split a file into chunks. The current policy is one chunk spanning the
/// whole file; alternate chunkers must keep spans non-overlapping and
/// `content` exactly equal to the text of the named span.
pub fn naive_chunk(content: &str) -> Vec<FileChunk> {
    let lines = content.matches('\n').count() as i32 + 1;
    vec![FileChunk {
        content: content.to_string(),
        line_start: 1,
        line_end: lines,
    }]
}

/// Hex SHA-256 of `content`; drives delta detection.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Deterministic chunk identity: hex SHA-256 of `"{path}#{start}:{end}"`.
pub fn chunk_id(path: &str, line_start: i32, line_end: i32) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{path}#{line_start}:{line_end}").as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Fallback summary when no summarizer output is usable: the trimmed chunk
/// content, truncated to 240 characters.
pub fn summarize_heuristic(content: &str) -> String {
    crate::ai::truncate_on_boundary(content.trim(), HEURISTIC_SUMMARY_MAX).to_string()
}

/// Lowercase language tag from the file extension. Unknown extensions yield
/// the extension itself (sans dot); no extension yields `""`.
pub fn guess_language(path: &Path) -> String {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "sh" => "shell",
        "py" => "python",
        "go" => "go",
        "md" => "markdown",
        "tf" => "terraform",
        "js" => "javascript",
        "ts" => "typescript",
        "java" => "java",
        "rb" => "ruby",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        other => other,
    }
    .to_string()
}

/// True when the repo-relative path must not produce chunks: a parent
/// segment is on the directory denylist, or the extension is binary/noise.
pub fn should_skip(rel_path: &Path) -> bool {
    let mut components = rel_path.components().peekable();
    while let Some(component) = components.next() {
        let segment = component.as_os_str().to_string_lossy().to_lowercase();
        let is_last = components.peek().is_none();
        if !is_last && SKIP_DIRS.contains(&segment.as_str()) {
            return true;
        }
        if is_last {
            if let Some(dot) = segment.rfind('.') {
                if dot > 0 && SKIP_EXTENSIONS.contains(&&segment[dot..]) {
                    return true;
                }
            }
        }
    }
    false
}

/// The repo-relative path with forward slashes.
fn rel_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .filter(|c| matches!(c, std::path::Component::Normal(_)))
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

struct WorkItem {
    rel_path: String,
    content: String,
}

/// One-shot batch indexer over a local tree.
#[derive(Clone)]
pub struct Indexer {
    store: Arc<dyn ChunkStore>,
    client: Arc<dyn ModelClient>,
    root: PathBuf,
    repository: String,
    refname: String,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        client: Arc<dyn ModelClient>,
        root: impl Into<PathBuf>,
        repository: impl Into<String>,
        refname: impl Into<String>,
    ) -> Self {
        Self {
            store,
            client,
            root: root.into(),
            repository: repository.into(),
            refname: refname.into(),
        }
    }

    /// Run the batch: walk the tree, fan files out to the worker pool, wait
    /// for the pool to drain.
    ///
    /// Per-item failures are logged and skipped; the first fatal worker
    /// error (if any) is returned after the pool drains, otherwise the
    /// walker's own result is returned. Cancellation stops new dispatch
    /// immediately and returns an error.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(MAX_WORKERS);
        info!(workers, root = %self.root.display(), "starting concurrent indexing");

        let (work_tx, work_rx) = mpsc::channel::<WorkItem>(workers * 2);
        let work_rx = Arc::new(Mutex::new(work_rx));
        // Capacity 1: the first fatal error wins, later ones are logged only.
        let (err_tx, mut err_rx) = mpsc::channel::<anyhow::Error>(1);

        let mut handles = Vec::with_capacity(workers);
        for worker in 0..workers {
            let indexer = self.clone();
            let work_rx = Arc::clone(&work_rx);
            let err_tx = err_tx.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                debug!(worker, "worker started");
                loop {
                    let item = {
                        let mut rx = work_rx.lock().await;
                        tokio::select! {
                            // Cancellation wins over pending work.
                            biased;
                            _ = cancel.cancelled() => None,
                            item = rx.recv() => item,
                        }
                    };
                    let Some(item) = item else { break };
                    if let Err(err) = indexer.process_item(&item).await {
                        if err_tx.try_send(err).is_err() {
                            debug!(worker, "error slot already taken");
                        }
                    }
                }
                debug!(worker, "worker finished");
            }));
        }
        drop(err_tx);

        let walk_result = self.walk(work_tx, &cancel).await;

        for handle in handles {
            let _ = handle.await;
        }

        if let Ok(err) = err_rx.try_recv() {
            return Err(err);
        }
        walk_result
    }

    /// Single producer: walk the tree, filter, read, and enqueue files.
    async fn walk(&self, tx: mpsc::Sender<WorkItem>, cancel: &CancellationToken) -> Result<()> {
        for entry in WalkDir::new(&self.root).follow_links(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(error = %err, "walk entry failed");
                    continue;
                }
            };
            if entry.file_type().is_dir() {
                continue;
            }

            let rel = rel_path(&self.root, entry.path());
            if should_skip(Path::new(&rel)) {
                continue;
            }

            let bytes = match std::fs::read(entry.path()) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(path = %entry.path().display(), error = %err, "failed to read file");
                    continue;
                }
            };
            let item = WorkItem {
                rel_path: rel,
                content: String::from_utf8_lossy(&bytes).into_owned(),
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(anyhow!("indexing cancelled")),
                sent = tx.send(item) => {
                    if sent.is_err() {
                        // All workers exited; nothing left to feed.
                        break;
                    }
                }
            }
        }
        Ok(())
    }

    /// Process one file: chunk it and apply the delta policy per chunk.
    async fn process_item(&self, item: &WorkItem) -> Result<()> {
        let language = guess_language(Path::new(&item.rel_path));

        for chunk in naive_chunk(&item.content) {
            let hash = hash_content(&chunk.content);

            let meta = match self
                .store
                .get_chunk_meta(
                    &self.repository,
                    &item.rel_path,
                    chunk.line_start,
                    chunk.line_end,
                )
                .await
            {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(path = %item.rel_path, error = %err,
                        "meta lookup failed, treating chunk as new");
                    None
                }
            };

            let (found, stored_hash, stored_summary, has_vec) = match &meta {
                Some(m) => (true, m.content_hash.as_str(), m.summary.as_str(), m.has_summary_vec),
                None => (false, "", "", false),
            };

            let need_summary = !found || stored_hash != hash || stored_summary.is_empty();
            let need_embed = !found || stored_hash != hash || !has_vec;

            let summary = if need_summary {
                let input = crate::ai::truncate_on_boundary(&chunk.content, SUMMARIZE_INPUT_CAP);
                match self.client.summarize(&item.rel_path, &language, input).await {
                    Ok(text) if !text.trim().is_empty() => text,
                    Ok(_) => {
                        warn!(path = %item.rel_path, "summarizer returned empty text, using heuristic");
                        summarize_heuristic(&chunk.content)
                    }
                    Err(err) => {
                        warn!(path = %item.rel_path, error = %err,
                            "summarization failed, using heuristic");
                        summarize_heuristic(&chunk.content)
                    }
                }
            } else {
                stored_summary.to_string()
            };

            let summary_vec = if need_embed {
                match self.client.embed(&summary).await {
                    Ok(vec) => Some(vec),
                    Err(err) => {
                        warn!(path = %item.rel_path, error = %err,
                            "embedding failed, storing chunk without vector");
                        None
                    }
                }
            } else {
                None
            };

            let record = Chunk {
                id: chunk_id(&item.rel_path, chunk.line_start, chunk.line_end),
                repository: self.repository.clone(),
                refname: self.refname.clone(),
                path: item.rel_path.clone(),
                language: language.clone(),
                summary,
                content: chunk.content,
                line_start: chunk.line_start,
                line_end: chunk.line_end,
                created_at: chrono::Utc::now(),
            };

            info!(
                path = %item.rel_path,
                lines = record.line_end - record.line_start + 1,
                need_summary,
                need_embed,
                "indexing chunk"
            );

            if let Err(err) = self.store.upsert_chunk(&record, summary_vec.as_deref(), &hash).await {
                error!(path = %item.rel_path, error = %err, "upsert failed");
            }
        }
        Ok(())
    }
}
