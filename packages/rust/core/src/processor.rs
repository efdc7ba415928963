//! Per-post processing: fetch, parse, detect change, acquire, embed, persist.

use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::{debug, error, info, instrument, warn};

use noticeharvest_crawler::{DetailFetcher, parse_notice_fields};
use noticeharvest_shared::{
    CategoryConfig, FailureStage, Notice, PostOutcome, StoreKind,
};

use crate::acquisition::{AcquisitionStrategy, AcquisitionTarget};
use crate::context::PipelineContext;
use crate::detector::ChangeDetector;
use crate::driver::PostProcessor;

/// Processes posts of one category with one acquisition strategy.
pub struct NoticeProcessor<'a> {
    ctx: &'a PipelineContext,
    category: &'a CategoryConfig,
    strategy: &'a dyn AcquisitionStrategy,
    today: NaiveDate,
}

impl<'a> NoticeProcessor<'a> {
    pub fn new(
        ctx: &'a PipelineContext,
        category: &'a CategoryConfig,
        strategy: &'a dyn AcquisitionStrategy,
    ) -> Self {
        Self {
            ctx,
            category,
            strategy,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Date substituted when a page carries none.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Run one seq through the whole chain. No error escapes.
    #[instrument(skip_all, fields(category = %self.category.name, seq = seq, adapter = self.ctx.adapter.name()))]
    pub async fn process_one(&self, seq: u64) -> PostOutcome {
        let ctx = self.ctx;
        let category = self.category.name.as_str();
        let list_id = self.category.list_id.as_str();

        let html = match DetailFetcher::new(&ctx.client, &ctx.config.site)
            .fetch(list_id, seq)
            .await
        {
            Ok(html) => html,
            Err(e) => {
                warn!(seq, error = %e, "detail fetch failed, skipping");
                return PostOutcome::SkippedError(FailureStage::Fetch);
            }
        };

        let Some(parsed) = parse_notice_fields(ctx.adapter.as_ref(), &html, seq, self.today) else {
            info!(seq, "no post at this seq");
            return PostOutcome::NotFound;
        };
        if parsed.post_number != seq {
            debug!(seq, post_number = parsed.post_number, "post number differs from seq");
        }
        if parsed.date_defaulted {
            debug!(seq, today = %self.today, "no posted date on page, using today");
        }

        let status = match ChangeDetector::new(&ctx.storage)
            .decide(category, parsed.post_number, parsed.posted_date)
            .await
        {
            Ok(status) => status,
            Err(e) => {
                error!(seq, post_number = parsed.post_number, error = %e, "stored date lookup failed");
                return PostOutcome::SkippedError(FailureStage::Persist);
            }
        };
        if !status.needs_acquisition() {
            info!(seq, post_number = parsed.post_number, "unchanged, skipping");
            return PostOutcome::Stored(StoreKind::Unchanged);
        }

        let link = ctx.config.site.detail_link(list_id, seq);
        let target = AcquisitionTarget {
            category,
            seq,
            post_number: parsed.post_number,
            url: &link,
            html: &html,
        };
        let summary = match self.strategy.acquire(ctx, &target).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(seq, post_number = parsed.post_number, error = %e, "acquisition failed, skipping");
                return PostOutcome::SkippedError(e.stage);
            }
        };

        let embedding = match ctx.embedder.embed(std::slice::from_ref(&summary)).await {
            Ok(mut vectors) => vectors.pop(),
            Err(e) => {
                warn!(seq, error = %e, "embedding failed, storing without vector");
                None
            }
        };

        let notice = Notice {
            category: category.to_string(),
            post_number: parsed.post_number,
            title: parsed.title,
            department: parsed.department,
            posted_date: parsed.posted_date,
            link,
            summary: Some(summary),
            embedding,
        };
        if let Err(e) = ctx.storage.upsert_notice(&notice).await {
            error!(seq, post_number = notice.post_number, error = ?e, "upsert failed");
            return PostOutcome::SkippedError(FailureStage::Persist);
        }

        let kind = StoreKind::from(status);
        info!(
            seq,
            post_number = notice.post_number,
            title = %notice.title,
            posted_date = %notice.posted_date,
            kind = ?kind,
            "stored"
        );
        PostOutcome::Stored(kind)
    }
}

#[async_trait]
impl PostProcessor for NoticeProcessor<'_> {
    async fn process(&self, seq: u64) -> PostOutcome {
        self.process_one(seq).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acquisition::strategy_for;
    use crate::testing::{FakeEmbedder, FakeRenderer, FakeSummarizer, detail_page, test_context};
    use noticeharvest_shared::StrategyKind;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn serve_detail(server: &MockServer, seq: u64, body: String) {
        Mock::given(method("GET"))
            .and(path("/korNotice/view.do"))
            .and(query_param("seq", seq.to_string()))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn general() -> CategoryConfig {
        CategoryConfig::new("GENERAL", "FA1")
    }

    #[tokio::test]
    async fn rerun_without_change_is_idempotent() {
        let server = MockServer::start().await;
        serve_detail(&server, 1506, detail_page(1506, "Scholarship notice", "2024-05-01")).await;
        let summarizer = FakeSummarizer::ok("Applications close 2024-05-31.");
        let ctx = test_context(&server, FakeRenderer::ok(), summarizer.clone(), FakeEmbedder::ok()).await;
        let category = general();
        let strategy = strategy_for(StrategyKind::TextScreenshot);
        let processor = NoticeProcessor::new(&ctx, &category, strategy.as_ref());

        assert_eq!(
            processor.process_one(1506).await,
            PostOutcome::Stored(StoreKind::Inserted)
        );
        let first = ctx.storage.get_notice("GENERAL", 1506).await.unwrap().unwrap();

        assert_eq!(
            processor.process_one(1506).await,
            PostOutcome::Stored(StoreKind::Unchanged)
        );
        assert_eq!(ctx.storage.count_notices(None).await.unwrap(), 1);
        assert_eq!(summarizer.calls(), 1);
        let second = ctx.storage.get_notice("GENERAL", 1506).await.unwrap().unwrap();
        assert_eq!(first, second);
        assert_eq!(first.link, format!("{}/korNotice/view.do?list_id=FA1&seq=1506", server.uri()));
    }

    #[tokio::test]
    async fn date_change_overwrites_every_field() {
        let server = MockServer::start().await;
        // New page has no department spans
        let page = r#"<html><body>
            <input type="hidden" name="seq" value="1506">
            <div class="vw-tibx"><h4>Revised notice</h4>
            <div class="zl-bx"><div class="da"><span>2024-06-10</span></div></div></div>
            </body></html>"#;
        serve_detail(&server, 1506, page.to_string()).await;
        let ctx = test_context(
            &server,
            FakeRenderer::ok(),
            FakeSummarizer::ok("Revised summary."),
            FakeEmbedder::failing(),
        )
        .await;
        ctx.storage
            .upsert_notice(&Notice {
                category: "GENERAL".into(),
                post_number: 1506,
                title: "Original notice".into(),
                department: Some("Student Affairs".into()),
                posted_date: NaiveDate::from_ymd_opt(2024, 5, 1).unwrap(),
                link: "old-link".into(),
                summary: Some("Old summary.".into()),
                embedding: Some(vec![0.5, 0.5]),
            })
            .await
            .unwrap();

        let category = general();
        let strategy = strategy_for(StrategyKind::TextScreenshot);
        let processor = NoticeProcessor::new(&ctx, &category, strategy.as_ref())
            .with_today(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        // The lone span is not enough for a date, so today (different) is used
        assert_eq!(
            processor.process_one(1506).await,
            PostOutcome::Stored(StoreKind::Updated)
        );

        let row = ctx.storage.get_notice("GENERAL", 1506).await.unwrap().unwrap();
        assert_eq!(row.title, "Revised notice");
        assert_eq!(row.department, None);
        assert_eq!(row.summary.as_deref(), Some("Revised summary."));
        assert_eq!(row.embedding, None);
        assert_eq!(row.posted_date, NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        assert_ne!(row.link, "old-link");
    }

    #[tokio::test]
    async fn embedding_failure_still_stores_row() {
        let server = MockServer::start().await;
        serve_detail(&server, 1507, detail_page(1507, "Library hours", "2024-05-02")).await;
        let ctx = test_context(
            &server,
            FakeRenderer::ok(),
            FakeSummarizer::ok("Library opens 09:00."),
            FakeEmbedder::failing(),
        )
        .await;
        let category = general();
        let strategy = strategy_for(StrategyKind::TextScreenshot);
        let processor = NoticeProcessor::new(&ctx, &category, strategy.as_ref());

        assert!(processor.process_one(1507).await.is_stored());
        let row = ctx.storage.get_notice("GENERAL", 1507).await.unwrap().unwrap();
        assert_eq!(row.embedding, None);
        assert_eq!(row.summary.as_deref(), Some("Library opens 09:00."));
    }

    #[tokio::test]
    async fn embedding_is_stored_when_available() {
        let server = MockServer::start().await;
        serve_detail(&server, 1507, detail_page(1507, "Library hours", "2024-05-02")).await;
        let ctx = test_context(&server, FakeRenderer::ok(), FakeSummarizer::ok("s"), FakeEmbedder::ok()).await;
        let category = general();
        let strategy = strategy_for(StrategyKind::TextScreenshot);
        NoticeProcessor::new(&ctx, &category, strategy.as_ref())
            .process_one(1507)
            .await;
        let row = ctx.storage.get_notice("GENERAL", 1507).await.unwrap().unwrap();
        assert_eq!(row.embedding, Some(vec![1.0, 0.0]));
    }

    #[tokio::test]
    async fn render_failure_skips_without_row() {
        let server = MockServer::start().await;
        serve_detail(&server, 1508, detail_page(1508, "Exam schedule", "2024-05-03")).await;
        let summarizer = FakeSummarizer::ok("unused");
        let ctx = test_context(&server, FakeRenderer::failing(), summarizer.clone(), FakeEmbedder::ok()).await;
        let category = general();
        let strategy = strategy_for(StrategyKind::TextScreenshot);
        let processor = NoticeProcessor::new(&ctx, &category, strategy.as_ref());

        assert_eq!(
            processor.process_one(1508).await,
            PostOutcome::SkippedError(FailureStage::Render)
        );
        assert!(ctx.storage.get_notice("GENERAL", 1508).await.unwrap().is_none());
        assert_eq!(summarizer.calls(), 0);
    }

    #[tokio::test]
    async fn missing_title_is_not_found() {
        let server = MockServer::start().await;
        serve_detail(&server, 9999, "<html><body><div class=\"vw-tibx\"></div></body></html>".into()).await;
        let ctx = test_context(&server, FakeRenderer::ok(), FakeSummarizer::ok("x"), FakeEmbedder::ok()).await;
        let category = general();
        let strategy = strategy_for(StrategyKind::TextScreenshot);
        let processor = NoticeProcessor::new(&ctx, &category, strategy.as_ref());

        assert_eq!(processor.process_one(9999).await, PostOutcome::NotFound);
    }

    #[tokio::test]
    async fn http_error_is_fetch_skip() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        let ctx = test_context(&server, FakeRenderer::ok(), FakeSummarizer::ok("x"), FakeEmbedder::ok()).await;
        let category = general();
        let strategy = strategy_for(StrategyKind::TextScreenshot);
        let processor = NoticeProcessor::new(&ctx, &category, strategy.as_ref());

        assert_eq!(
            processor.process_one(1).await,
            PostOutcome::SkippedError(FailureStage::Fetch)
        );
    }

    #[tokio::test]
    async fn summarize_failure_is_skip() {
        let server = MockServer::start().await;
        serve_detail(&server, 1509, detail_page(1509, "Job fair", "2024-05-04")).await;
        let ctx = test_context(&server, FakeRenderer::ok(), FakeSummarizer::failing(), FakeEmbedder::ok()).await;
        let category = general();
        let strategy = strategy_for(StrategyKind::TextScreenshot);
        let processor = NoticeProcessor::new(&ctx, &category, strategy.as_ref());

        assert_eq!(
            processor.process_one(1509).await,
            PostOutcome::SkippedError(FailureStage::Summarize)
        );
        assert_eq!(ctx.storage.count_notices(None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn text_strategy_sends_text_and_slices() {
        let server = MockServer::start().await;
        serve_detail(&server, 1510, detail_page(1510, "Campus tour", "2024-05-05")).await;
        let summarizer = FakeSummarizer::ok("Tour at 14:00.");
        let ctx = test_context(&server, FakeRenderer::ok(), summarizer.clone(), FakeEmbedder::ok()).await;
        let category = general();
        let strategy = strategy_for(StrategyKind::TextScreenshot);
        NoticeProcessor::new(&ctx, &category, strategy.as_ref())
            .process_one(1510)
            .await;

        let request = summarizer.last_request().expect("summarize called");
        assert!(request.prompt.contains("Tours leave from the main gate"));
        // FakeRenderer's PNG is taller than one slice
        assert!(request.images.len() > 1);
        assert!(request.document.is_none());
    }

    #[tokio::test]
    async fn document_strategy_sends_pdf() {
        let server = MockServer::start().await;
        serve_detail(&server, 1511, detail_page(1511, "Festival", "2024-05-06")).await;
        let summarizer = FakeSummarizer::ok("Festival on 2024-05-20.");
        let ctx = test_context(&server, FakeRenderer::ok(), summarizer.clone(), FakeEmbedder::ok()).await;
        let category = general();
        let strategy = strategy_for(StrategyKind::Document);
        let outcome = NoticeProcessor::new(&ctx, &category, strategy.as_ref())
            .process_one(1511)
            .await;

        assert_eq!(outcome, PostOutcome::Stored(StoreKind::Inserted));
        let request = summarizer.last_request().unwrap();
        assert!(request.images.is_empty());
        assert_eq!(request.document.as_deref(), Some(&b"%PDF-1.4 fake"[..]));
    }
}
