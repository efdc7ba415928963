//! Summarization over the OpenAI Responses API.
//!
//! One request per post, no retry: a failed or empty response fails the post.

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use noticeharvest_shared::{NoticeHarvestError, OpenAiConfig, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

/// What to summarize: an instruction plus optional visual evidence.
#[derive(Debug, Clone, Default)]
pub struct SummaryRequest {
    /// Instruction text, including any extracted page text.
    pub prompt: String,
    /// JPEG images attached after the prompt, in order.
    pub images: Vec<Vec<u8>>,
    /// A single PDF attachment.
    pub document: Option<Vec<u8>>,
}

impl SummaryRequest {
    pub fn with_images(prompt: impl Into<String>, images: Vec<Vec<u8>>) -> Self {
        Self {
            prompt: prompt.into(),
            images,
            document: None,
        }
    }

    pub fn with_document(prompt: impl Into<String>, pdf: Vec<u8>) -> Self {
        Self {
            prompt: prompt.into(),
            images: Vec::new(),
            document: Some(pdf),
        }
    }
}

/// A summarization backend.
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Return the trimmed summary text. Empty output is an error.
    async fn summarize(&self, request: &SummaryRequest) -> Result<String>;
}

// ---------------------------------------------------------------------------
// OpenAI client
// ---------------------------------------------------------------------------

/// Responses API client.
pub struct OpenAiSummarizer {
    client: Client,
    endpoint: String,
    model: String,
    temperature: f32,
}

impl OpenAiSummarizer {
    pub fn new(api_key: &str, config: &OpenAiConfig) -> Result<Self> {
        Ok(Self {
            client: crate::build_openai_client(api_key, config)?,
            endpoint: crate::endpoint(config, "responses"),
            model: config.summarize_model.clone(),
            temperature: config.temperature,
        })
    }

    /// Override the model (the document strategy uses a smaller one).
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl Summarizer for OpenAiSummarizer {
    #[instrument(skip_all, fields(model = %self.model, images = request.images.len()))]
    async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        let body = ResponsesRequest {
            model: &self.model,
            input: vec![InputMessage {
                role: "user",
                content: build_content(request),
            }],
            temperature: self.temperature,
        };

        let resp = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| NoticeHarvestError::Summarize(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(NoticeHarvestError::Summarize(format!(
                "summarize request failed ({status}): {text}"
            )));
        }

        let parsed: ResponsesResponse = resp
            .json()
            .await
            .map_err(|e| NoticeHarvestError::Summarize(format!("invalid response: {e}")))?;

        let summary = parsed.output_text();
        if summary.is_empty() {
            return Err(NoticeHarvestError::Summarize("empty summary".into()));
        }
        debug!(chars = summary.chars().count(), "summary received");
        Ok(summary)
    }
}

fn build_content(request: &SummaryRequest) -> Vec<ContentPart> {
    let mut content = vec![ContentPart::InputText {
        text: request.prompt.clone(),
    }];
    for image in &request.images {
        content.push(ContentPart::InputImage {
            image_url: format!("data:image/jpeg;base64,{}", STANDARD.encode(image)),
        });
    }
    if let Some(pdf) = &request.document {
        content.push(ContentPart::InputFile {
            filename: "notice.pdf".into(),
            file_data: format!("data:application/pdf;base64,{}", STANDARD.encode(pdf)),
        });
    }
    content
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct ResponsesRequest<'a> {
    model: &'a str,
    input: Vec<InputMessage>,
    temperature: f32,
}

#[derive(Serialize)]
struct InputMessage {
    role: &'static str,
    content: Vec<ContentPart>,
}

#[derive(Serialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    InputText { text: String },
    InputImage { image_url: String },
    InputFile { filename: String, file_data: String },
}

#[derive(Deserialize)]
struct ResponsesResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Deserialize)]
struct OutputContent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

impl ResponsesResponse {
    /// Concatenated text of every `output_text` part, trimmed.
    fn output_text(&self) -> String {
        self.output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|part| part.kind == "output_text")
            .filter_map(|part| part.text.as_deref())
            .collect::<String>()
            .trim()
            .to_string()
    }
}
