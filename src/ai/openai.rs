//! OpenAI-style provider: `/v1/embeddings` and `/v1/chat/completions`.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::config::ProviderConfig;

use super::{
    truncate_on_boundary, ModelClient, ModelError, MAX_SUMMARIZE_INPUT, SUMMARY_SYSTEM_PROMPT,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const DEFAULT_SUMMARY_MODEL: &str = "gpt-4o-mini";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(20);

/// Client for an OpenAI-style HTTPS JSON API.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    project_id: String,
    embed_model: String,
    summary_model: String,
    dim: usize,
}

impl OpenAiClient {
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
        let dim = if cfg.dim > 0 {
            cfg.dim
        } else {
            default_dim(&embed_model)
        };

        let mut builder = reqwest::Client::builder().timeout(REQUEST_TIMEOUT);
        if cfg.insecure_tls {
            // Escape hatch for TLS-intercepting corporate proxies.
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

    fn request(&self, url: String) -> reqwest::RequestBuilder {
        let mut req = self
            .http
            .post(url)
            .header("Authorization", format!("Bearer {}", self.api_key));
        // Project-scoped keys need the project routed explicitly.
        if self.api_key.starts_with("sk-proj-") && !self.project_id.is_empty() {
            req = req.header("OpenAI-Project", &self.project_id);
        }
        req
    }
}

/// Default embedding dimension for the known model family.
fn default_dim(embed_model: &str) -> usize {
    match embed_model {
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        "text-embedding-ada-002" => 1536,
        _ => 1536,
    }
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: String,
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, ModelError> {
        if self.api_key.is_empty() {
            return Err(ModelError::AuthMissing);
        }

        let resp = self
            .request(format!("{}/v1/embeddings", self.base_url))
            .json(&json!({ "input": text, "model": self.embed_model }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Upstream(format!("embeddings {status}: {body}")));
        }

        let out: EmbedResponse = resp.json().await?;
        out.data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(ModelError::Empty("embedding"))
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

        // The model only needs a taste of the file.
        let content = truncate_on_boundary(content, MAX_SUMMARIZE_INPUT);
        let user = format!("Path: {path}\nLanguage: {language}\n---\n{content}");

        let resp = self
            .request(format!("{}/v1/chat/completions", self.base_url))
            .json(&json!({
                "model": self.summary_model,
                "messages": [
                    { "role": "system", "content": SUMMARY_SYSTEM_PROMPT },
                    { "role": "user", "content": user },
                ],
                "temperature": 0.2,
                "max_tokens": 120,
            }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::Upstream(format!(
                "chat completions {status}: {body}"
            )));
        }

        let out: ChatResponse = resp.json().await?;
        let choice = out.choices.into_iter().next().ok_or(ModelError::Empty("choices"))?;
        Ok(choice.message.content.trim().replace('\n', " "))
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderConfig;

    fn cfg(api_key: &str) -> ProviderConfig {
        ProviderConfig {
            kind: "openai".to_string(),
            api_key: api_key.to_string(),
            ..ProviderConfig::default()
        }
    }

    #[test]
    fn test_defaults_applied() {
        let client = OpenAiClient::new(&cfg("sk-test")).unwrap();
        assert_eq!(client.embed_model, "text-embedding-3-small");
        assert_eq!(client.summary_model, "gpt-4o-mini");
        assert_eq!(client.dim(), 1536);
    }

    #[test]
    fn test_explicit_config_wins() {
        let mut c = cfg("sk-test");
        c.embed_model = "text-embedding-3-large".to_string();
        c.dim = 256;
        let client = OpenAiClient::new(&c).unwrap();
        assert_eq!(client.embed_model, "text-embedding-3-large");
        assert_eq!(client.dim(), 256);
    }

    #[test]
    fn test_large_model_default_dim() {
        let mut c = cfg("sk-test");
        c.embed_model = "text-embedding-3-large".to_string();
        let client = OpenAiClient::new(&c).unwrap();
        assert_eq!(client.dim(), 3072);
    }

    #[tokio::test]
    async fn test_embed_without_key_is_auth_missing() {
        let client = OpenAiClient::new(&cfg("")).unwrap();
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, ModelError::AuthMissing));
    }

    #[tokio::test]
    async fn test_summarize_without_key_is_auth_missing() {
        let client = OpenAiClient::new(&cfg("")).unwrap();
        let err = client.summarize("a.go", "go", "package a").await.unwrap_err();
        assert!(matches!(err, ModelError::AuthMissing));
    }
}
