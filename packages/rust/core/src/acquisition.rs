//! Content acquisition strategies.
//!
//! Both strategies turn an already-fetched detail page into a summary. Each
//! step is all-or-nothing: the first failure ends acquisition for the post
//! and is reported with the [`FailureStage`] it happened in.

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use tracing::{debug, instrument};

use noticeharvest_crawler::render::save_debug_screenshot;
use noticeharvest_crawler::{MainTextExtractor, slice_screenshot};
use noticeharvest_llm::SummaryRequest;
use noticeharvest_shared::{FailureStage, NoticeHarvestError, StrategyKind};

use crate::context::PipelineContext;

/// A post ready for acquisition.
#[derive(Debug, Clone, Copy)]
pub struct AcquisitionTarget<'a> {
    pub category: &'a str,
    /// Seq the page was crawled under.
    pub seq: u64,
    pub post_number: u64,
    /// Canonical detail URL, rendered by the headless browser.
    pub url: &'a str,
    /// Detail page HTML already fetched over plain HTTP.
    pub html: &'a str,
}

/// Acquisition failure tagged with the step that failed.
#[derive(Debug)]
pub struct StageError {
    pub stage: FailureStage,
    pub error: NoticeHarvestError,
}

impl StageError {
    fn new(stage: FailureStage, error: NoticeHarvestError) -> Self {
        Self { stage, error }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage.as_str(), self.error)
    }
}

/// One way of producing a summary for a post.
#[async_trait]
pub trait AcquisitionStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    /// Produce the summary text for `target`.
    async fn acquire(
        &self,
        ctx: &PipelineContext,
        target: &AcquisitionTarget<'_>,
    ) -> std::result::Result<String, StageError>;
}

/// Strategy for a configured [`StrategyKind`].
pub fn strategy_for(kind: StrategyKind) -> Box<dyn AcquisitionStrategy> {
    match kind {
        StrategyKind::TextScreenshot => Box::new(TextScreenshotStrategy),
        StrategyKind::Document => Box::new(DocumentStrategy),
    }
}

// ---------------------------------------------------------------------------
// Strategy A: extracted text + sliced screenshot
// ---------------------------------------------------------------------------

/// Extracted main text as primary evidence, screenshot slices as supplement.
pub struct TextScreenshotStrategy;

#[async_trait]
impl AcquisitionStrategy for TextScreenshotStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::TextScreenshot
    }

    #[instrument(skip_all, fields(category = target.category, seq = target.seq, post_number = target.post_number))]
    async fn acquire(
        &self,
        ctx: &PipelineContext,
        target: &AcquisitionTarget<'_>,
    ) -> std::result::Result<String, StageError> {
        let text = MainTextExtractor::new(ctx.config.crawl.max_content_chars).extract(target.html);
        debug!(chars = text.chars().count(), "main text extracted");

        let png = ctx
            .renderer
            .screenshot(target.url)
            .await
            .map_err(|e| StageError::new(FailureStage::Render, e))?;

        if let Some(dir) = ctx.config.render.debug_dir.as_deref() {
            let file_name = debug_screenshot_name(target.category, target.seq);
            save_debug_screenshot(Path::new(dir), &file_name, &png).await;
        }

        let slices = slice_screenshot(&png, ctx.config.render.slice_height)
            .map_err(|e| StageError::new(FailureStage::Render, e))?;
        if slices.is_empty() {
            return Err(StageError::new(
                FailureStage::Render,
                NoticeHarvestError::Render("screenshot produced no slices".into()),
            ));
        }
        debug!(slices = slices.len(), "screenshot sliced");

        let request = SummaryRequest::with_images(merge_prompt(&text), slices);
        ctx.summarizer
            .summarize(&request)
            .await
            .map_err(|e| StageError::new(FailureStage::Summarize, e))
    }
}

// ---------------------------------------------------------------------------
// Strategy B: rendered document
// ---------------------------------------------------------------------------

/// The page printed to PDF and summarized directly.
pub struct DocumentStrategy;

#[async_trait]
impl AcquisitionStrategy for DocumentStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Document
    }

    #[instrument(skip_all, fields(category = target.category, seq = target.seq, post_number = target.post_number))]
    async fn acquire(
        &self,
        ctx: &PipelineContext,
        target: &AcquisitionTarget<'_>,
    ) -> std::result::Result<String, StageError> {
        let pdf = ctx
            .renderer
            .document(target.url)
            .await
            .map_err(|e| StageError::new(FailureStage::Render, e))?;
        if pdf.is_empty() {
            return Err(StageError::new(
                FailureStage::Render,
                NoticeHarvestError::Render("rendered document is empty".into()),
            ));
        }
        debug!(bytes = pdf.len(), "document rendered");

        let request = SummaryRequest::with_document(document_prompt(), pdf);
        ctx.summarizer
            .summarize(&request)
            .await
            .map_err(|e| StageError::new(FailureStage::Summarize, e))
    }
}

// ---------------------------------------------------------------------------
// Prompts
// ---------------------------------------------------------------------------

/// Rules both strategies share: no guessing, tokens copied as written.
const PRESERVATION_RULES: &str = "\
- 원문에 적혀 있지 않은 내용은 추측하거나 만들어내지 마세요.
- 수치와 날짜, 시간은 원문 표기 그대로 유지하세요.
- 기관과 부서, 장소, 전화번호, 이메일은 원문 표기 그대로 쓰세요.";

const MERGE_INSTRUCTIONS: &str = "\
다음은 대학 공지사항 상세 페이지에서 추출한 본문 텍스트입니다. 이 텍스트를 1차 근거로 사용하고, \
함께 첨부된 페이지 전체 캡처 이미지는 텍스트에 없는 표, 포스터, 스캔 문서 등의 내용을 보충하는 용도로만 사용하세요.";

const MERGE_RULES: &str = "\
- 사이드 메뉴, 푸터, 학교 주소, 카피라이트, 관련 게시물 목록 등 본문과 무관한 내용은 제외하세요.
- 여러 문단의 자연스러운 문장으로, 본문의 정보를 빠짐없이 상세하게 요약하세요.";

const DOCUMENT_INSTRUCTIONS: &str = "\
첨부된 PDF는 대학 공지사항 웹페이지를 인쇄한 문서입니다. 문서에 명시된 사실만 사용해 \
공지의 핵심을 한 문단으로 간결하게 요약하세요.";

const DOCUMENT_RULES: &str = "\
- 제목, 주최 기관 또는 부서, 기간, 장소, 신청 대상, 문의처가 있으면 포함하세요.
- 메뉴, 푸터, 주소, 카피라이트 등 본문 외 내용은 제외하세요.";

/// Debug screenshots are keyed by the crawled seq.
fn debug_screenshot_name(category: &str, seq: u64) -> String {
    format!("{category}_{seq}_FULL.png")
}

/// Instruction for strategy A with the extracted text embedded between markers.
fn merge_prompt(text: &str) -> String {
    format!(
        "{MERGE_INSTRUCTIONS}\n\n[작성 규칙]\n{PRESERVATION_RULES}\n{MERGE_RULES}\n\n\
         [본문 텍스트 시작]\n{text}\n[본문 텍스트 끝]"
    )
}

/// Instruction for strategy B; the document itself is attached.
fn document_prompt() -> String {
    format!("{DOCUMENT_INSTRUCTIONS}\n\n[작성 규칙]\n{PRESERVATION_RULES}\n{DOCUMENT_RULES}")
}
