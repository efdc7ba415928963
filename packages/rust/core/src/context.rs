//! Process-wide collaborators, built once and passed by reference.

use reqwest::Client;
use tracing::info;

use noticeharvest_crawler::{ChromiumRenderer, NoticePageAdapter, PageRenderer, UosNoticeAdapter};
use noticeharvest_llm::{Embedder, OpenAiEmbedder, OpenAiSummarizer, Summarizer};
use noticeharvest_shared::{AppConfig, Result, StrategyKind, resolve_api_key};
use noticeharvest_storage::Storage;

/// Everything a crawl needs: configuration, HTTP client, storage handle,
/// renderer, summarizer, embedder and page parser.
///
/// The embedder and summarizer are created once here and reused for every
/// post of the run.
pub struct PipelineContext {
    pub config: AppConfig,
    pub client: Client,
    pub storage: Storage,
    pub renderer: Box<dyn PageRenderer>,
    pub summarizer: Box<dyn Summarizer>,
    pub embedder: Box<dyn Embedder>,
    pub adapter: Box<dyn NoticePageAdapter>,
}

impl PipelineContext {
    /// Assemble a context from already-built collaborators.
    ///
    /// Uses the built-in notice-board page parser; see [`Self::with_adapter`].
    pub fn new(
        config: AppConfig,
        storage: Storage,
        renderer: Box<dyn PageRenderer>,
        summarizer: Box<dyn Summarizer>,
        embedder: Box<dyn Embedder>,
    ) -> Result<Self> {
        let client = noticeharvest_crawler::build_client(&config.site)?;
        Ok(Self {
            config,
            client,
            storage,
            renderer,
            summarizer,
            embedder,
            adapter: Box::new(UosNoticeAdapter),
        })
    }

    /// Swap the page parser.
    pub fn with_adapter(mut self, adapter: Box<dyn NoticePageAdapter>) -> Self {
        self.adapter = adapter;
        self
    }

    /// Build the production context: resolve the API key, open the
    /// database, and construct the Chromium renderer and OpenAI clients.
    ///
    /// Fails before any crawling when the key or database is unavailable.
    pub async fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;
        let api_key = resolve_api_key(&config.openai.api_key_env, "OpenAI")?;

        let db_path = config.database.resolved_path()?;
        let storage = Storage::open(&db_path).await?;
        info!(path = %db_path.display(), "database opened");

        let summarizer = OpenAiSummarizer::new(&api_key, &config.openai)?;
        let summarizer = match config.crawl.strategy {
            StrategyKind::TextScreenshot => summarizer,
            StrategyKind::Document => summarizer.with_model(config.openai.document_model.clone()),
        };
        let embedder = OpenAiEmbedder::new(&api_key, &config.openai)?;
        let renderer = ChromiumRenderer::new(config.render.clone());

        Self::new(
            config,
            storage,
            Box::new(renderer),
            Box::new(summarizer),
            Box::new(embedder),
        )
    }
}
