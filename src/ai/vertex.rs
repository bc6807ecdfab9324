//! Vertex-style provider: `:embedContent` and `:generateContent`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::ProviderConfig;

use super::{
    truncate_on_boundary, ModelClient, ModelError, MAX_SUMMARIZE_INPUT, SUMMARY_SYSTEM_PROMPT,
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-005";
const DEFAULT_SUMMARY_MODEL: &str = "gemini-2.0-flash";
const DEFAULT_DIM: usize = 768;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for a Vertex-style generative-language JSON API.
pub struct VertexClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    project_id: String,
    embed_model: String,
    summary_model: String,
    dim: usize,
}

impl VertexClient {
    /// Build a client from config, filling in default model identifiers and
    /// dimensions where the config is silent.
    pub fn new(cfg: &ProviderConfig) -> anyhow::Result<Self> {
        let embed_model = if cfg.embed_model.is_empty() {
            DEFAULT_EMBED_MODEL.to_string()
        } else {
            cfg.embed_model.clone()
        };
        let summary_model = if cfg.summary_model.is_empty() {
            DEFAULT_SUMMARY_MODEL.to_string()
        } else {
            cfg.summary_model.clone()
        };
        let dim = if cfg.dim > 0 { cfg.dim } else { DEFAULT_DIM };

        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if cfg.insecure_tls {
            builder = builder.danger_accept_invalid_certs(true);
        }

        Ok(Self {
            http: builder.build()?,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: cfg.api_key.clone(),
            project_id: cfg.project_id.clone(),
            embed_model,
            summary_model,
            dim,
        })
    }

    async fn post(
        &self,
        model: &str,
        verb: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, ModelError> {
        let url = format!("{}/models/{}:{}", self.base_url, model, verb);
        let mut req = self.http.post(url).header("x-goog-api-key", &self.api_key);
        // Route quota and billing to the configured project when one is set.
        if !self.project_id.is_empty() {
            req = req.header("x-goog-user-project", &self.project_id);
        }
        let resp = req.json(&body).send().await?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Upstream(format!("{verb} {status}: {body}")));
        }
        Ok(resp)
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Option<Embedding>,
}

#[derive(Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[async_trait]
impl ModelClient for VertexClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::AuthMissing);
        }

        let resp = self
            .post(
                &self.embed_model,
                "embedContent",
                json!({
                    "content": { "parts": [{ "text": text }] },
                    "taskType": "RETRIEVAL_DOCUMENT",
                }),
            )
            .await?;

        let out: EmbedResponse = resp.json().await?;
        match out.embedding {
            Some(e) if !e.values.is_empty() => Ok(e.values),
            _ => Err(ModelError::Empty("embedding")),
        }
    }

    async fn summarize(
        &self,
        path: &str,
        language: &str,
        content: &str,
    ) -> Result<String, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::AuthMissing);
        }

        let content = truncate_on_boundary(content, MAX_SUMMARIZE_INPUT);
        let user = format!("Path: {path}\nLanguage: {language}\n---\n{content}");

        let resp = self
            .post(
                &self.summary_model,
                "generateContent",
                json!({
                    "systemInstruction": { "parts": [{ "text": SUMMARY_SYSTEM_PROMPT }] },
                    "contents": [{ "role": "user", "parts": [{ "text": user }] }],
                    "generationConfig": { "temperature": 0.2, "maxOutputTokens": 120 },
                }),
            )
            .await?;

        let out: GenerateResponse = resp.json().await?;
        let text = out
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .and_then(|c| c.parts.into_iter().next())
            .map(|p| p.text)
            .ok_or(ModelError::Empty("summary"))?;
        Ok(text.trim().replace('\n', " "))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}
