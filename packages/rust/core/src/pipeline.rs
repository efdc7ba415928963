//! Crawl pipeline: categories → discovery or sequential scan → per-post processing.

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, instrument, warn};

use noticeharvest_discovery::{DiscoveryOptions, ListingScanner};
use noticeharvest_shared::{CategoryConfig, NoticeHarvestError, PostOutcome, Result};

use crate::acquisition::strategy_for;
use crate::context::PipelineContext;
use crate::driver::{self, CrawlStats};
use crate::processor::NoticeProcessor;

/// How posts are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrawlMode {
    /// Most recent `recent_window` listing entries, oldest first.
    Recent,
    /// Increment from a start seq until the miss streak ends the scan.
    /// `None` uses each category's configured `start_seq`.
    Scan { start_seq: Option<u64> },
}

impl CrawlMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlMode::Recent => "recent",
            CrawlMode::Scan { .. } => "scan",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CrawlOptions {
    pub mode: CrawlMode,
    /// Category names to crawl; empty means all configured.
    pub categories: Vec<String>,
}

/// How a category run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Completed,
    /// `list_id` missing or a placeholder; nothing was requested.
    Unconfigured,
    /// Scan mode without any start seq.
    NoStartSeq,
}

/// Result of crawling one category.
#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub category: String,
    pub mode: &'static str,
    pub status: CategoryStatus,
    pub stats: CrawlStats,
    pub elapsed_ms: u64,
}

/// Result of a whole crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlReport {
    pub categories: Vec<CategoryReport>,
    pub elapsed: Duration,
}

impl CrawlReport {
    /// Posts written or refreshed across all categories.
    pub fn stored(&self) -> usize {
        self.categories
            .iter()
            .map(|c| c.stats.inserted + c.stats.updated)
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Progress trait
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called after each post. `total` is unknown in scan mode.
    fn post_processed(
        &self,
        category: &str,
        seq: u64,
        outcome: &PostOutcome,
        current: usize,
        total: Option<usize>,
    );
    /// Called when a category finishes (or is skipped).
    fn category_done(&self, report: &CategoryReport);
    /// Called after each index batch.
    fn index_batch(&self, current: usize, total: usize, vectors: usize);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn post_processed(
        &self,
        _category: &str,
        _seq: u64,
        _outcome: &PostOutcome,
        _current: usize,
        _total: Option<usize>,
    ) {
    }
    fn category_done(&self, _report: &CategoryReport) {}
    fn index_batch(&self, _current: usize, _total: usize, _vectors: usize) {}
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Crawl the selected categories one after another.
///
/// Unconfigured categories are skipped with a warning. Unknown names in
/// `options.categories` are rejected before any request is made.
#[instrument(skip_all, fields(mode = options.mode.as_str(), strategy = ctx.config.crawl.strategy.as_str()))]
pub async fn run_crawl(
    ctx: &PipelineContext,
    options: &CrawlOptions,
    progress: &dyn ProgressReporter,
) -> Result<CrawlReport> {
    let start = Instant::now();
    let categories = select_categories(ctx, &options.categories)?;
    let strategy = strategy_for(ctx.config.crawl.strategy);
    let mut report = CrawlReport::default();

    for category in categories {
        let category_start = Instant::now();
        progress.phase(&format!("Crawling {}", category.name));

        let (status, stats) = if !category.is_configured() {
            warn!(category = %category.name, list_id = %category.list_id, "list_id not configured, skipping category");
            (CategoryStatus::Unconfigured, CrawlStats::default())
        } else {
            let processor = NoticeProcessor::new(ctx, category, strategy.as_ref());
            match options.mode {
                CrawlMode::Recent => (
                    CategoryStatus::Completed,
                    crawl_recent(ctx, category, &processor, progress).await,
                ),
                CrawlMode::Scan { start_seq } => match start_seq.or(category.start_seq) {
                    Some(start_seq) => (
                        CategoryStatus::Completed,
                        crawl_scan(ctx, category, &processor, start_seq, progress).await,
                    ),
                    None => {
                        warn!(category = %category.name, "no start seq for sequential scan, skipping category");
                        (CategoryStatus::NoStartSeq, CrawlStats::default())
                    }
                },
            }
        };

        let category_report = CategoryReport {
            category: category.name.clone(),
            mode: options.mode.as_str(),
            status,
            stats,
            elapsed_ms: category_start.elapsed().as_millis() as u64,
        };
        info!(
            category = %category_report.category,
            status = ?category_report.status,
            candidates = category_report.stats.candidates,
            inserted = category_report.stats.inserted,
            updated = category_report.stats.updated,
            unchanged = category_report.stats.unchanged,
            not_found = category_report.stats.not_found,
            skipped = category_report.stats.skipped_total(),
            "category finished"
        );
        progress.category_done(&category_report);
        report.categories.push(category_report);
    }

    report.elapsed = start.elapsed();
    Ok(report)
}

fn select_categories<'a>(
    ctx: &'a PipelineContext,
    names: &[String],
) -> Result<Vec<&'a CategoryConfig>> {
    if names.is_empty() {
        return Ok(ctx.config.categories.iter().collect());
    }
    names
        .iter()
        .map(|name| {
            ctx.config.category(name).ok_or_else(|| {
                NoticeHarvestError::validation(format!("unknown category '{name}'"))
            })
        })
        .collect()
}

async fn crawl_recent(
    ctx: &PipelineContext,
    category: &CategoryConfig,
    processor: &NoticeProcessor<'_>,
    progress: &dyn ProgressReporter,
) -> CrawlStats {
    let run_id = start_run(ctx, category, CrawlMode::Recent).await;
    let crawl = &ctx.config.crawl;
    let discovery = DiscoveryOptions {
        limit: crawl.recent_window,
        max_pages: crawl.max_pages,
        page_sleep: Duration::from_millis(crawl.page_sleep_ms),
    };
    let discovered = ListingScanner::new(&ctx.client, &ctx.config.site)
        .collect_recent_seqs(&category.list_id, &category.extra_params, &discovery)
        .await;
    info!(
        category = %category.name,
        candidates = discovered.seqs.len(),
        pages = discovered.pages_fetched,
        stop = ?discovered.stop,
        "candidates discovered"
    );

    // Listing order is newest first; process oldest first
    let mut seqs = discovered.seqs;
    seqs.reverse();

    let stats = driver::run_recent(
        processor,
        &category.name,
        &seqs,
        Duration::from_millis(crawl.request_sleep_ms),
        progress,
    )
    .await;
    finish_run(ctx, run_id, &stats).await;
    stats
}

async fn crawl_scan(
    ctx: &PipelineContext,
    category: &CategoryConfig,
    processor: &NoticeProcessor<'_>,
    start_seq: u64,
    progress: &dyn ProgressReporter,
) -> CrawlStats {
    let run_id = start_run(ctx, category, CrawlMode::Scan { start_seq: Some(start_seq) }).await;
    info!(category = %category.name, start_seq, missing_break = ctx.config.crawl.missing_break, "sequential scan");

    let stats = driver::run_sequential_scan(
        processor,
        &category.name,
        start_seq,
        ctx.config.crawl.missing_break,
        Duration::from_millis(ctx.config.crawl.request_sleep_ms),
        progress,
    )
    .await;
    finish_run(ctx, run_id, &stats).await;
    stats
}

/// Record the run start; history is best-effort and never blocks a crawl.
async fn start_run(ctx: &PipelineContext, category: &CategoryConfig, mode: CrawlMode) -> Option<String> {
    match ctx.storage.insert_crawl_run(&category.name, mode.as_str()).await {
        Ok(id) => Some(id),
        Err(e) => {
            warn!(category = %category.name, error = %e, "failed to record crawl run");
            None
        }
    }
}

async fn finish_run(ctx: &PipelineContext, run_id: Option<String>, stats: &CrawlStats) {
    let Some(run_id) = run_id else {
        return;
    };
    let stats_json = match serde_json::to_string(stats) {
        Ok(json) => json,
        Err(e) => {
            warn!(error = %e, "failed to serialize crawl stats");
            return;
        }
    };
    if let Err(e) = ctx.storage.finish_crawl_run(&run_id, &stats_json).await {
        warn!(run_id, error = %e, "failed to finish crawl run");
    }
}
