//! Embeddings over the OpenAI `/embeddings` endpoint.

use async_trait::async_trait;
use noticeharvest_shared::{NoticeHarvestError, OpenAiConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// An embedding backend. Constructed once per process and reused.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed `inputs`, returning one vector per input in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Length of every returned vector.
    fn dimension(&self) -> usize;
}

/// OpenAI-compatible embeddings client.
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbedder {
    pub fn new(api_key: &str, config: &OpenAiConfig) -> Result<Self> {
        if config.embed_model.trim().is_empty() {
            return Err(NoticeHarvestError::config("missing embedding model name"));
        }
        Ok(Self {
            client: crate::build_openai_client(api_key, config)?,
            endpoint: crate::endpoint(config, "embeddings"),
            model: config.embed_model.clone(),
            dimension: config.embed_dimension,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    #[instrument(skip_all, fields(model = %self.model, inputs = inputs.len()))]
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| NoticeHarvestError::Embedding(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(NoticeHarvestError::Embedding(format!(
                "embeddings request failed ({status}): {body}"
            )));
        }

        let mut parsed: EmbeddingResponse = resp
            .json()
            .await
            .map_err(|e| NoticeHarvestError::Embedding(format!("invalid response: {e}")))?;
        parsed.data.sort_by_key(|entry| entry.index);

        if parsed.data.len() != inputs.len() {
            return Err(NoticeHarvestError::Embedding(format!(
                "returned {} embeddings for {} inputs",
                parsed.data.len(),
                inputs.len()
            )));
        }
        if let Some(bad) = parsed
            .data
            .iter()
            .find(|entry| entry.embedding.len() != self.dimension)
        {
            return Err(NoticeHarvestError::Embedding(format!(
                "expected dimension {}, got {}",
                self.dimension,
                bad.embedding.len()
            )));
        }

        Ok(parsed.data.into_iter().map(|entry| entry.embedding).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
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
    index: usize,
    embedding: Vec<f32>,
}
