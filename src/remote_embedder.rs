//! Embedding provider for OpenAI-compatible `/embeddings` endpoints.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    embedding::EmbeddingProvider,
    error::{Error, Result},
};

pub const DEFAULT_EMBED_URL: &str = "https://api.together.xyz/v1";
pub const DEFAULT_EMBED_MODEL: &str = "BAAI/bge-large-en-v1.5";
pub const DEFAULT_EMBED_DIMENSION: usize = 1024;

/// Environment variable holding the bearer token.
pub const API_KEY_ENV_VAR: &str = "DOCWEAVE_API_KEY";

const TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct RemoteEmbedderConfig {
    /// Base URL; `/embeddings` is appended.
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub api_key: Option<String>,
}

impl Default for RemoteEmbedderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_EMBED_URL.to_string(),
            model: DEFAULT_EMBED_MODEL.to_string(),
            dimension: DEFAULT_EMBED_DIMENSION,
            api_key: std::env::var(API_KEY_ENV_VAR).ok().filter(|k| !k.is_empty()),
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Blocking HTTP embedding client.
pub struct RemoteEmbedder {
    agent: ureq::Agent,
    endpoint: String,
    config: RemoteEmbedderConfig,
}

impl RemoteEmbedder {
    pub fn new(config: RemoteEmbedderConfig) -> Result<Self> {
        if config.dimension == 0 {
            return Err(Error::Config("embedding dimension must be positive".into()));
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(TIMEOUT)
            .timeout_read(TIMEOUT)
            .timeout_write(TIMEOUT)
            .build();
        let endpoint = format!("{}/embeddings", config.base_url.trim_end_matches('/'));
        Ok(Self {
            agent,
            endpoint,
            config,
        })
    }
}

impl EmbeddingProvider for RemoteEmbedder {
    fn model_name(&self) -> &str {
        &self.config.model
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut request = self
            .agent
            .post(&self.endpoint)
            .set("content-type", "application/json");
        if let Some(key) = &self.config.api_key {
            request = request.set("authorization", &format!("Bearer {key}"));
        }

        let body = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };
        let response = match request.send_json(&body) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let text = response.into_string().unwrap_or_default();
                return Err(Error::EmbeddingProvider(format!(
                    "{} returned {code}: {text}",
                    self.endpoint
                )));
            }
            Err(e) => return Err(Error::EmbeddingProvider(e.to_string())),
        };

        let parsed: EmbeddingResponse = response
            .into_json()
            .map_err(|e| Error::EmbeddingProvider(format!("malformed response: {e}")))?;
        Ok(into_vectors(parsed))
    }
}

/// Vectors in request order.
fn into_vectors(mut response: EmbeddingResponse) -> Vec<Vec<f32>> {
    response.data.sort_by_key(|d| d.index);
    response.data.into_iter().map(|d| d.embedding).collect()
}
