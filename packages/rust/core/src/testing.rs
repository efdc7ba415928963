//! In-memory collaborators for pipeline tests.

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use image::{ImageFormat, Rgb, RgbImage};
use uuid::Uuid;
use wiremock::MockServer;

use noticeharvest_crawler::PageRenderer;
use noticeharvest_llm::{Embedder, Summarizer, SummaryRequest};
use noticeharvest_shared::{AppConfig, NoticeHarvestError, Result};
use noticeharvest_storage::Storage;

use crate::context::PipelineContext;

pub struct FakeRenderer {
    fail: bool,
}

impl FakeRenderer {
    pub fn ok() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn screenshot(&self, _url: &str) -> Result<Vec<u8>> {
        if self.fail {
            return Err(NoticeHarvestError::Render("browser crashed".into()));
        }
        // Two default-height slices plus a remainder
        let img = RgbImage::from_pixel(64, 4000, Rgb([240, 240, 240]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png)
            .map_err(|e| NoticeHarvestError::Render(e.to_string()))?;
        Ok(buf.into_inner())
    }

    async fn document(&self, _url: &str) -> Result<Vec<u8>> {
        if self.fail {
            return Err(NoticeHarvestError::Render("print failed".into()));
        }
        Ok(b"%PDF-1.4 fake".to_vec())
    }
}

/// Records every request; clones share the record.
#[derive(Clone)]
pub struct FakeSummarizer {
    reply: Option<String>,
    requests: Arc<Mutex<Vec<SummaryRequest>>>,
}

impl FakeSummarizer {
    pub fn ok(reply: &str) -> Self {
        Self {
            reply: Some(reply.to_string()),
            requests: Arc::default(),
        }
    }

    pub fn failing() -> Self {
        Self {
            reply: None,
            requests: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> Option<SummaryRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Summarizer for FakeSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        self.requests.lock().unwrap().push(request.clone());
        self.reply
            .clone()
            .ok_or_else(|| NoticeHarvestError::Summarize("service unavailable".into()))
    }
}

pub struct FakeEmbedder {
    fail: bool,
}

impl FakeEmbedder {
    pub fn ok() -> Self {
        Self { fail: false }
    }

    pub fn failing() -> Self {
        Self { fail: true }
    }
}

#[async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if self.fail {
            return Err(NoticeHarvestError::Embedding("rate limited".into()));
        }
        Ok(inputs.iter().map(|_| vec![1.0, 0.0]).collect())
    }

    fn dimension(&self) -> usize {
        2
    }
}

/// Detail page in the default template.
pub fn detail_page(seq: u64, title: &str, date: &str) -> String {
    format!(
        r#"<html><body>
<form><input type="hidden" name="seq" value="{seq}"></form>
<div class="vw-tibx">
  <h4>{title}</h4>
  <div class="zl-bx"><div class="da">
    <span>admin</span><span>Student Affairs</span><span>{date}</span>
  </div></div>
</div>
<div class="vw-cnt"><p>Tours leave from the main gate at 14:00.</p></div>
<footer>Copyright 2024 University. All rights reserved.</footer>
</body></html>"#
    )
}

/// Default config pointed at `server`, no pauses.
pub fn test_config(server: &MockServer) -> AppConfig {
    let mut config = AppConfig::default();
    config.site.base_url = server.uri();
    config.crawl.request_sleep_ms = 0;
    config.crawl.page_sleep_ms = 0;
    config
}

pub async fn test_context_with(
    config: AppConfig,
    renderer: FakeRenderer,
    summarizer: FakeSummarizer,
    embedder: FakeEmbedder,
) -> PipelineContext {
    let db = std::env::temp_dir().join(format!("nh_core_{}.db", Uuid::now_v7()));
    let storage = Storage::open(&db).await.expect("open test db");
    PipelineContext::new(
        config,
        storage,
        Box::new(renderer),
        Box::new(summarizer),
        Box::new(embedder),
    )
    .expect("build context")
}

pub async fn test_context(
    server: &MockServer,
    renderer: FakeRenderer,
    summarizer: FakeSummarizer,
    embedder: FakeEmbedder,
) -> PipelineContext {
    test_context_with(test_config(server), renderer, summarizer, embedder).await
}
