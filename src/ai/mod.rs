//! Model client abstraction and provider implementations.
//!
//! Defines the [`ModelClient`] trait — the two verbs the rest of the system
//! consumes, `embed` and `summarize`, plus the fixed embedding dimension —
//! and three interchangeable providers:
//!
//! - **[`openai::OpenAiClient`]** — OpenAI-style HTTPS JSON API.
//! - **[`vertex::VertexClient`]** — Vertex-style generative-language API.
//! - **[`stub::StubClient`]** — deterministic in-process provider for tests
//!   and offline operation; never fails.
//!
//! Exactly one provider is selected at construction via [`create_client`].
//!
//! # Errors
//!
//! Providers fail with a small typed taxonomy ([`ModelError`]): a missing
//! credential, an upstream transport/status failure, or a well-formed
//! response that carries no payload. Callers decide the disposition — the
//! indexer falls back to a heuristic summary and skips the vector, the
//! search service degrades to lexical-only ranking.

pub mod openai;
pub mod stub;
pub mod vertex;

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use thiserror::Error;

use crate::config::ProviderConfig;

/// System instruction sent with every summarize request.
pub(crate) const SUMMARY_SYSTEM_PROMPT: &str = "You are a concise code summarizer. Write at most \
    240 characters, 1-2 sentences, no code blocks, no backticks. Mention the file's purpose and \
    notable actions. Prefer verbs. If the text is configuration, say what it configures.";

/// Upper bound on characters forwarded to the summary model per request.
pub(crate) const MAX_SUMMARIZE_INPUT: usize = 8_000;

/// Failure modes of a model provider.
#[derive(Debug, Error)]
pub enum ModelError {
    /// No API key was configured for a remote provider.
    #[error("provider API key is not configured")]
    AuthMissing,
    /// Transport failure, non-2xx status, or malformed response body.
    #[error("provider request failed: {0}")]
    Upstream(String),
    /// Success status but the response carried no usable payload.
    #[error("provider response carried no {0}")]
    Empty(&'static str),
}

impl From<reqwest::Error> for ModelError {
    fn from(err: reqwest::Error) -> Self {
        ModelError::Upstream(err.to_string())
    }
}

/// Uniform capability set over embedding and summarization providers.
///
/// Implementations are safe for concurrent use; the indexer shares one
/// client across its worker pool.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Embed `text` into a dense vector of length [`dim`](ModelClient::dim).
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError>;

    /// Produce a short prose summary (≤ ~240 chars, no newlines) of `content`.
    async fn summarize(
        &self,
        path: &str,
        language: &str,
        content: &str,
    ) -> Result<String, ModelError>;

    /// The embedding dimension, fixed at construction.
    fn dim(&self) -> usize;
}

/// Construct the provider selected by `provider.kind`.
///
/// | Config value | Provider |
/// |--------------|----------|
/// | `"stub"` | [`stub::StubClient`] |
/// | `"openai"` | [`openai::OpenAiClient`] |
/// | `"vertex"` | [`vertex::VertexClient`] |
///
/// Unknown provider names fail at construction. Remote providers fill in
/// default model identifiers and dimensions when the config leaves them
/// unset; explicit config always wins.
pub fn create_client(cfg: &ProviderConfig) -> Result<Arc<dyn ModelClient>> {
    match cfg.kind.as_str() {
        "stub" => Ok(Arc::new(stub::StubClient::new(cfg.dim))),
        "openai" => Ok(Arc::new(openai::OpenAiClient::new(cfg)?)),
        "vertex" => Ok(Arc::new(vertex::VertexClient::new(cfg)?)),
        other => bail!("unknown model provider: '{other}' (expected stub, openai, or vertex)"),
    }
}

/// Truncate `s` to at most `max` bytes on a UTF-8 character boundary.
pub(crate) fn truncate_on_boundary(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_short() {
        assert_eq!(truncate_on_boundary("hello", 100), "hello");
    }

    #[test]
    fn test_truncate_exact() {
        let s = "a".repeat(10);
        assert_eq!(truncate_on_boundary(&s, 10).len(), 10);
    }

    #[test]
    fn test_truncate_respects_utf8_boundary() {
        let s = "é".repeat(10); // 2 bytes each
        let out = truncate_on_boundary(&s, 15);
        assert!(out.len() <= 15);
        assert_eq!(out.len() % 2, 0);
    }
}
