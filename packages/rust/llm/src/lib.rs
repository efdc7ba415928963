//! Summarization and embedding clients.
//!
//! Both services sit behind traits ([`Summarizer`], [`Embedder`]) so the
//! pipeline can be exercised with in-memory fakes. The concrete clients speak
//! the OpenAI HTTP API.

mod embed;
mod summarize;

use std::time::Duration;

use noticeharvest_shared::{NoticeHarvestError, OpenAiConfig, Result};
use reqwest::Client;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};

pub use embed::{Embedder, OpenAiEmbedder};
pub use summarize::{OpenAiSummarizer, Summarizer, SummaryRequest};

/// Build an HTTP client with bearer auth for the OpenAI API.
pub(crate) fn build_openai_client(api_key: &str, config: &OpenAiConfig) -> Result<Client> {
    if api_key.trim().is_empty() {
        return Err(NoticeHarvestError::config("missing OpenAI API key"));
    }

    let mut headers = HeaderMap::new();
    let auth = format!("Bearer {}", api_key.trim());
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&auth)
            .map_err(|_| NoticeHarvestError::config("invalid OpenAI API key"))?,
    );
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .default_headers(headers)
        .build()
        .map_err(|e| NoticeHarvestError::config(format!("failed to build OpenAI HTTP client: {e}")))
}

pub(crate) fn endpoint(config: &OpenAiConfig, path: &str) -> String {
    format!("{}/{path}", config.base_url.trim_end_matches('/'))
}
