//! Deterministic in-process provider for tests and offline operation.

use async_trait::async_trait;

use super::{ModelClient, ModelError};

/// A provider that never performs I/O and never fails.
///
/// Embeddings are all-zero vectors of the configured dimension. Summaries
/// are lifted from the first comment-like line of the content, falling back
/// to a `"Code file: <path>"` marker.
pub struct StubClient {
    dim: usize,
}

impl StubClient {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl ModelClient for StubClient {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, ModelError> {
        Ok(vec![0.0; self.dim])
    }

    async fn summarize(
        &self,
        path: &str,
        _language: &str,
        content: &str,
    ) -> Result<String, ModelError> {
        // First comment-like line within the first five lines wins.
        for line in content.lines().take(5) {
            let line = line.trim();
            if (line.starts_with('#') || line.starts_with("//")) && line.len() > 10 {
                return Ok(line.to_string());
            }
        }
        Ok(format!("Code file: {path}"))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
