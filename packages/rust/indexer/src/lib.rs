//! Indexing stage: chunk stored summaries and upsert them into a vector index.
//!
//! Runs independently of the crawl and reads only persisted notices. Chunk
//! ids are derived from `(category, post_number, chunk_index)`, so repeated
//! runs overwrite instead of duplicating.

mod chunk;
mod pinecone;

use std::time::Duration;

use chrono::NaiveDate;
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use noticeharvest_llm::Embedder;
use noticeharvest_shared::{DATE_FORMAT, IndexConfig, Notice, NoticeHarvestError, Result};
use noticeharvest_storage::Storage;

pub use chunk::{TextSplitter, chunk_id};
pub use pinecone::{PineconeIndex, VectorIndex, VectorRecord};

/// Appended to summaries cut at `max_doc_len`.
pub const DOC_TRUNCATION_MARKER: &str = "\n\n[... 이하 생략 ...]";

/// How an index run treats existing vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Clear the namespace before the first batch, then write everything.
    #[default]
    Rebuild,
    /// Write on top of existing vectors.
    Append,
}

impl IndexMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexMode::Rebuild => "rebuild",
            IndexMode::Append => "append",
        }
    }
}

impl std::str::FromStr for IndexMode {
    type Err = NoticeHarvestError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rebuild" => Ok(IndexMode::Rebuild),
            "append" => Ok(IndexMode::Append),
            other => Err(NoticeHarvestError::validation(format!(
                "unknown index mode '{other}' (expected rebuild or append)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct IndexOptions {
    pub mode: IndexMode,
    /// Only notices posted on or after this date. Append mode only.
    pub since: Option<NaiveDate>,
}

impl IndexOptions {
    /// A rebuild clears the whole namespace, so it must rewrite every notice.
    pub fn validate(&self) -> Result<()> {
        if let (IndexMode::Rebuild, Some(since)) = (self.mode, self.since) {
            return Err(NoticeHarvestError::validation(format!(
                "--since {since} cannot be combined with rebuild mode; use append"
            )));
        }
        Ok(())
    }
}

/// Summary of one index run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub notices: usize,
    pub chunks: usize,
    pub batches: usize,
    /// Whether the namespace was cleared successfully.
    pub cleared: bool,
}

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for index runs.
pub trait IndexProgress: Send + Sync {
    fn phase(&self, name: &str);
    fn batch_done(&self, current: usize, total: usize, vectors: usize);
}

/// No-op progress reporter for index runs.
pub struct SilentIndexProgress;

impl IndexProgress for SilentIndexProgress {
    fn phase(&self, _name: &str) {}
    fn batch_done(&self, _current: usize, _total: usize, _vectors: usize) {}
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// A chunk awaiting its embedding.
struct PendingChunk {
    id: String,
    text: String,
    metadata: Map<String, Value>,
}

/// Chunk every indexable notice and upsert the vectors batch by batch.
///
/// In [`IndexMode::Rebuild`] the namespace is cleared exactly once, right
/// before the first batch. A failed clear is logged and the run continues.
/// Embedding or upsert failures abort the run.
#[instrument(skip_all, fields(mode = options.mode.as_str(), since = ?options.since))]
pub async fn run_index(
    storage: &Storage,
    embedder: &dyn Embedder,
    index: &dyn VectorIndex,
    config: &IndexConfig,
    namespace: Option<&str>,
    options: &IndexOptions,
    progress: &dyn IndexProgress,
) -> Result<IndexReport> {
    options.validate()?;

    progress.phase("Loading notices");
    let notices = storage.list_indexable(options.since).await?;

    progress.phase("Chunking summaries");
    let splitter = TextSplitter::new(config.chunk_size, config.chunk_overlap);
    let chunks: Vec<PendingChunk> = notices
        .iter()
        .flat_map(|notice| chunk_notice(&splitter, notice, config.max_doc_len))
        .collect();

    let mut report = IndexReport {
        notices: notices.len(),
        chunks: chunks.len(),
        ..Default::default()
    };
    if chunks.is_empty() {
        info!("nothing to index");
        return Ok(report);
    }

    let batch_size = config.batch_size.max(1);
    let total_batches = chunks.len().div_ceil(batch_size);
    info!(
        notices = report.notices,
        chunks = report.chunks,
        batches = total_batches,
        "indexing"
    );

    progress.phase("Upserting vectors");
    for (i, batch) in chunks.chunks(batch_size).enumerate() {
        if i == 0 && options.mode == IndexMode::Rebuild {
            match index.delete_all(namespace).await {
                Ok(()) => report.cleared = true,
                Err(e) => warn!(error = %e, "failed to clear namespace, continuing"),
            }
        }

        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(NoticeHarvestError::Embedding(format!(
                "returned {} embeddings for {} chunks",
                vectors.len(),
                batch.len()
            )));
        }

        let records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .map(|(chunk, values)| VectorRecord {
                id: chunk.id.clone(),
                values,
                metadata: chunk.metadata.clone(),
            })
            .collect();
        index.upsert(&records, namespace).await?;

        report.batches += 1;
        progress.batch_done(i + 1, total_batches, records.len());
        info!(batch = i + 1, total = total_batches, vectors = records.len(), "batch upserted");

        if i + 1 < total_batches && config.batch_sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(config.batch_sleep_ms)).await;
        }
    }

    info!(
        notices = report.notices,
        chunks = report.chunks,
        batches = report.batches,
        cleared = report.cleared,
        "index run complete"
    );
    Ok(report)
}

fn chunk_notice(splitter: &TextSplitter, notice: &Notice, max_doc_len: usize) -> Vec<PendingChunk> {
    let Some(summary) = notice.summary.as_deref() else {
        return Vec::new();
    };
    let document = truncate_document(summary, max_doc_len);

    splitter
        .split(&document)
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| PendingChunk {
            id: chunk_id(&notice.category, notice.post_number, chunk_index),
            metadata: chunk_metadata(notice, chunk_index, &text),
            text,
        })
        .collect()
}

fn chunk_metadata(notice: &Notice, chunk_index: usize, text: &str) -> Map<String, Value> {
    let mut metadata = Map::new();
    metadata.insert("text".into(), Value::from(text));
    metadata.insert("title".into(), Value::from(notice.title.as_str()));
    metadata.insert("link".into(), Value::from(notice.link.as_str()));
    metadata.insert(
        "department".into(),
        Value::from(notice.department.as_deref().unwrap_or("")),
    );
    metadata.insert(
        "posted_date".into(),
        Value::from(notice.posted_date.format(DATE_FORMAT).to_string()),
    );
    metadata.insert("category".into(), Value::from(notice.category.as_str()));
    metadata.insert("post_number".into(), Value::from(notice.post_number));
    metadata.insert("chunk_index".into(), Value::from(chunk_index));
    metadata
}

fn truncate_document(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str(DOC_TRUNCATION_MARKER);
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        DeleteAll,
        Upsert(Vec<String>),
    }

    #[derive(Default)]
    struct RecordingIndex {
        calls: Mutex<Vec<Call>>,
        fail_delete: bool,
        metadata: Mutex<Vec<Map<String, Value>>>,
    }

    impl RecordingIndex {
        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl VectorIndex for RecordingIndex {
        async fn delete_all(&self, _namespace: Option<&str>) -> Result<()> {
            self.calls.lock().unwrap().push(Call::DeleteAll);
            if self.fail_delete {
                return Err(NoticeHarvestError::VectorIndex("boom".into()));
            }
            Ok(())
        }

        async fn upsert(&self, records: &[VectorRecord], _namespace: Option<&str>) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(Call::Upsert(records.iter().map(|r| r.id.clone()).collect()));
            self.metadata
                .lock()
                .unwrap()
                .extend(records.iter().map(|r| r.metadata.clone()));
            Ok(())
        }
    }

    struct LengthEmbedder {
        fail: bool,
    }

    #[async_trait]
    impl Embedder for LengthEmbedder {
        async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
            if self.fail {
                return Err(NoticeHarvestError::Embedding("quota".into()));
            }
            Ok(inputs
                .iter()
                .map(|s| vec![s.chars().count() as f32, 1.0])
                .collect())
        }

        fn dimension(&self) -> usize {
            2
        }
    }

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("nh_index_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn notice(category: &str, post_number: u64, posted: &str, summary: Option<&str>) -> Notice {
        Notice {
            category: category.into(),
            post_number,
            title: format!("Notice {post_number}"),
            department: None,
            posted_date: NaiveDate::parse_from_str(posted, DATE_FORMAT).unwrap(),
            link: format!("https://example.com/view.do?list_id=FA1&seq={post_number}"),
            summary: summary.map(String::from),
            embedding: None,
        }
    }

    fn small_config(batch_size: usize) -> IndexConfig {
        IndexConfig {
            chunk_size: 40,
            chunk_overlap: 10,
            max_doc_len: 12_000,
            batch_size,
            batch_sleep_ms: 0,
        }
    }

    fn long_summary() -> String {
        (0..40).map(|i| format!("item{i:02}")).collect::<Vec<_>>().join(" ")
    }

    async fn seeded_storage() -> Storage {
        let storage = test_storage().await;
        let summary = long_summary();
        for (cat, pn, date) in [
            ("GENERAL", 1506, "2024-05-01"),
            ("GENERAL", 1507, "2024-05-10"),
            ("ACADEMIC", 880, "2024-04-20"),
        ] {
            storage
                .upsert_notice(&notice(cat, pn, date, Some(&summary)))
                .await
                .unwrap();
        }
        // Not indexable: no summary
        storage
            .upsert_notice(&notice("GENERAL", 1508, "2024-05-11", None))
            .await
            .unwrap();
        storage
    }

    #[tokio::test]
    async fn rebuild_clears_exactly_once_before_first_batch() {
        let storage = seeded_storage().await;
        let index = RecordingIndex::default();
        let report = run_index(
            &storage,
            &LengthEmbedder { fail: false },
            &index,
            &small_config(3),
            None,
            &IndexOptions::default(),
            &SilentIndexProgress,
        )
        .await
        .expect("index run");

        let calls = index.calls();
        assert!(report.batches > 1, "need several batches for this test");
        assert_eq!(calls[0], Call::DeleteAll);
        assert_eq!(
            calls.iter().filter(|c| **c == Call::DeleteAll).count(),
            1
        );
        assert_eq!(calls.len(), report.batches + 1);
        assert!(report.cleared);
        assert_eq!(report.notices, 3);
    }

    #[tokio::test]
    async fn rebuild_with_since_is_rejected_before_clearing() {
        let storage = seeded_storage().await;
        let index = RecordingIndex::default();
        let options = IndexOptions {
            mode: IndexMode::Rebuild,
            since: NaiveDate::from_ymd_opt(2024, 5, 5),
        };
        let err = run_index(
            &storage,
            &LengthEmbedder { fail: false },
            &index,
            &small_config(200),
            None,
            &options,
            &SilentIndexProgress,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, NoticeHarvestError::Validation { .. }));
        assert!(index.calls().is_empty(), "namespace must be left untouched");
    }

    #[tokio::test]
    async fn append_never_clears() {
        let storage = seeded_storage().await;
        let index = RecordingIndex::default();
        let options = IndexOptions {
            mode: IndexMode::Append,
            since: None,
        };
        let report = run_index(
            &storage,
            &LengthEmbedder { fail: false },
            &index,
            &small_config(200),
            Some("notices"),
            &options,
            &SilentIndexProgress,
        )
        .await
        .unwrap();

        assert!(!index.calls().contains(&Call::DeleteAll));
        assert!(!report.cleared);
        assert_eq!(report.batches, 1);
    }

    #[tokio::test]
    async fn since_filters_notices() {
        let storage = seeded_storage().await;
        let index = RecordingIndex::default();
        let options = IndexOptions {
            mode: IndexMode::Append,
            since: NaiveDate::from_ymd_opt(2024, 5, 5),
        };
        let report = run_index(
            &storage,
            &LengthEmbedder { fail: false },
            &index,
            &small_config(200),
            None,
            &options,
            &SilentIndexProgress,
        )
        .await
        .unwrap();

        assert_eq!(report.notices, 1);
        let Call::Upsert(ids) = &index.calls()[0] else {
            panic!("expected upsert");
        };
        assert!(ids.iter().all(|id| id.starts_with("GENERAL_1507_")));
    }

    #[tokio::test]
    async fn ids_are_deterministic_across_runs() {
        let storage = seeded_storage().await;
        let first = RecordingIndex::default();
        let second = RecordingIndex::default();
        for index in [&first, &second] {
            run_index(
                &storage,
                &LengthEmbedder { fail: false },
                index,
                &small_config(4),
                None,
                &IndexOptions::default(),
                &SilentIndexProgress,
            )
            .await
            .unwrap();
        }
        assert_eq!(first.calls(), second.calls());

        let Call::Upsert(ids) = &first.calls()[1] else {
            panic!("expected upsert after clear");
        };
        // Ordered by (category, post_number), chunk index restarts per notice
        assert_eq!(ids[0], "ACADEMIC_880_0");
        assert_eq!(ids[1], "ACADEMIC_880_1");
    }

    #[tokio::test]
    async fn metadata_carries_notice_fields() {
        let storage = seeded_storage().await;
        let index = RecordingIndex::default();
        run_index(
            &storage,
            &LengthEmbedder { fail: false },
            &index,
            &small_config(200),
            None,
            &IndexOptions::default(),
            &SilentIndexProgress,
        )
        .await
        .unwrap();

        let metadata = index.metadata.lock().unwrap();
        let first = &metadata[0];
        assert_eq!(first["category"], "ACADEMIC");
        assert_eq!(first["post_number"], 880);
        assert_eq!(first["chunk_index"], 0);
        assert_eq!(first["department"], "");
        assert_eq!(first["posted_date"], "2024-04-20");
        assert!(first["text"].as_str().unwrap().starts_with("item00"));
    }

    #[tokio::test]
    async fn failed_clear_is_not_fatal() {
        let storage = seeded_storage().await;
        let index = RecordingIndex {
            fail_delete: true,
            ..Default::default()
        };
        let report = run_index(
            &storage,
            &LengthEmbedder { fail: false },
            &index,
            &small_config(200),
            None,
            &IndexOptions::default(),
            &SilentIndexProgress,
        )
        .await
        .expect("run continues");
        assert!(!report.cleared);
        assert_eq!(report.batches, 1);
    }

    #[tokio::test]
    async fn embedding_failure_aborts_run() {
        let storage = seeded_storage().await;
        let index = RecordingIndex::default();
        let result = run_index(
            &storage,
            &LengthEmbedder { fail: true },
            &index,
            &small_config(200),
            None,
            &IndexOptions::default(),
            &SilentIndexProgress,
        )
        .await;
        assert!(matches!(result, Err(NoticeHarvestError::Embedding(_))));
        assert!(!index.calls().iter().any(|c| matches!(c, Call::Upsert(_))));
    }

    #[tokio::test]
    async fn empty_store_does_not_clear() {
        let storage = test_storage().await;
        let index = RecordingIndex::default();
        let report = run_index(
            &storage,
            &LengthEmbedder { fail: false },
            &index,
            &small_config(200),
            None,
            &IndexOptions::default(),
            &SilentIndexProgress,
        )
        .await
        .unwrap();
        assert_eq!(report, IndexReport::default());
        assert!(index.calls().is_empty());
    }

    #[test]
    fn long_documents_are_truncated_with_marker() {
        let text = "가".repeat(30);
        let truncated = truncate_document(&text, 10);
        assert!(truncated.starts_with(&"가".repeat(10)));
        assert!(truncated.ends_with(DOC_TRUNCATION_MARKER));
        assert_eq!(truncate_document("short", 10), "short");
    }

    #[test]
    fn index_mode_parses() {
        assert_eq!("rebuild".parse::<IndexMode>().unwrap(), IndexMode::Rebuild);
        assert_eq!("append".parse::<IndexMode>().unwrap(), IndexMode::Append);
        assert!("merge".parse::<IndexMode>().is_err());
    }
}
