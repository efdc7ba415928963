//! Index job: wire storage, embedder and vector index into the indexer.

use tracing::{info, instrument};

use noticeharvest_indexer::{IndexOptions, IndexProgress, IndexReport, PineconeIndex, run_index};
use noticeharvest_llm::{Embedder, OpenAiEmbedder};
use noticeharvest_shared::{AppConfig, Result, resolve_api_key};
use noticeharvest_storage::Storage;

use crate::pipeline::ProgressReporter;

/// Build the production collaborators from `config` and run one index pass.
///
/// Both API keys are resolved before the database or any service is touched.
#[instrument(skip_all, fields(mode = options.mode.as_str()))]
pub async fn run_index_job(
    config: &AppConfig,
    options: &IndexOptions,
    progress: &dyn ProgressReporter,
) -> Result<IndexReport> {
    config.validate()?;
    options.validate()?;
    let openai_key = resolve_api_key(&config.openai.api_key_env, "OpenAI")?;
    let pinecone_key = resolve_api_key(&config.pinecone.api_key_env, "Pinecone")?;

    progress.phase("Opening database");
    let db_path = config.database.resolved_path()?;
    let storage = Storage::open_readonly(&db_path).await?;

    let embedder = OpenAiEmbedder::new(&openai_key, &config.openai)?;
    progress.phase("Connecting to vector index");
    let index = PineconeIndex::connect(&pinecone_key, &config.pinecone, embedder.dimension()).await?;
    info!(host = index.host(), namespace = ?config.pinecone.namespace(), "vector index ready");

    let adapter = PipelineIndexProgress { inner: progress };
    run_index(
        &storage,
        &embedder,
        &index,
        &config.index,
        config.pinecone.namespace(),
        options,
        &adapter,
    )
    .await
}

/// Adapts [`ProgressReporter`] to the indexer's progress trait.
struct PipelineIndexProgress<'a> {
    inner: &'a dyn ProgressReporter,
}

impl IndexProgress for PipelineIndexProgress<'_> {
    fn phase(&self, name: &str) {
        self.inner.phase(name);
    }

    fn batch_done(&self, current: usize, total: usize, vectors: usize) {
        self.inner.index_batch(current, total, vectors);
    }
}
