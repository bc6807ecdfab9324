//! Query-time mediator between the model client and the chunk store.
//!
//! The service is thin by design: trim the query, embed it, delegate the
//! ranking to the store, and keep the contract that no non-finite score
//! ever leaves this layer (upstream JSON cannot represent them reliably).
//!
//! Embedding failure is not an error here — the store treats an absent
//! query vector as zero semantic similarity on every candidate, so results
//! degrade gracefully to lexical-only ranking.

use std::sync::Arc;

use anyhow::Result;
use tracing::warn;

use crate::ai::ModelClient;
use crate::models::SearchResult;
use crate::store::{ChunkStore, QueryOpts};

/// Per-request, stateless search front end.
pub struct SearchService {
    client: Arc<dyn ModelClient>,
    store: Arc<dyn ChunkStore>,
}

impl SearchService {
    pub fn new(client: Arc<dyn ModelClient>, store: Arc<dyn ChunkStore>) -> Self {
        Self { client, store }
    }

    /// Rank up to `k` chunks for the query text under the given filters.
    pub async fn query(&self, text: &str, k: i64, mut opts: QueryOpts) -> Result<Vec<SearchResult>> {
        let trimmed = text.trim();
        opts.query_text = trimmed.to_string();

        let summary_vec = match self.client.embed(trimmed).await {
            Ok(vec) => Some(vec),
            Err(err) => {
                warn!(error = %err, "query embedding failed, falling back to lexical-only ranking");
                None
            }
        };

        let mut results = self.store.search(summary_vec.as_deref(), k, &opts).await?;
        for result in &mut results {
            if !result.score.is_finite() {
                result.score = 0.0;
            }
        }
        Ok(results)
    }
}
