//! Crawl driver: bounded recent-list mode and unbounded sequential scan.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use noticeharvest_shared::{PostOutcome, StoreKind};

use crate::pipeline::ProgressReporter;

/// Processes one sequence id end to end. Never fails: every error is
/// folded into the returned [`PostOutcome`].
#[async_trait]
pub trait PostProcessor: Send + Sync {
    async fn process(&self, seq: u64) -> PostOutcome;
}

// ---------------------------------------------------------------------------
// Miss streak state machine
// ---------------------------------------------------------------------------

/// Scan termination state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Scanning,
    /// `k` consecutive NOT_FOUND outcomes, `0 < k < threshold`.
    MissStreak(u32),
    Terminated,
}

/// Counts consecutive NOT_FOUND outcomes.
///
/// STORED resets the count, SKIPPED_ERROR leaves it alone, and reaching the
/// threshold is terminal.
#[derive(Debug, Clone)]
pub struct MissStreak {
    state: ScanState,
    threshold: u32,
}

impl MissStreak {
    /// `threshold` is clamped to at least 1.
    pub fn new(threshold: u32) -> Self {
        Self {
            state: ScanState::Scanning,
            threshold: threshold.max(1),
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    pub fn is_terminated(&self) -> bool {
        self.state == ScanState::Terminated
    }

    /// Feed one outcome and return the new state.
    pub fn observe(&mut self, outcome: &PostOutcome) -> ScanState {
        self.state = match (self.state, outcome) {
            (ScanState::Terminated, _) => ScanState::Terminated,
            (_, PostOutcome::Stored(_)) => ScanState::Scanning,
            (state, PostOutcome::SkippedError(_)) => state,
            (ScanState::Scanning, PostOutcome::NotFound) => self.after_miss(1),
            (ScanState::MissStreak(k), PostOutcome::NotFound) => self.after_miss(k + 1),
        };
        self.state
    }

    fn after_miss(&self, k: u32) -> ScanState {
        if k >= self.threshold {
            ScanState::Terminated
        } else {
            ScanState::MissStreak(k)
        }
    }
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

/// Outcome counts for one category run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CrawlStats {
    /// Seqs offered to the processor (recent mode: discovered candidates).
    pub candidates: usize,
    pub processed: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub not_found: usize,
    /// Skipped posts by failing stage.
    pub skipped: BTreeMap<String, usize>,
    /// Last seq handed to the processor.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seq: Option<u64>,
}

impl CrawlStats {
    pub fn record(&mut self, seq: u64, outcome: &PostOutcome) {
        self.processed += 1;
        self.last_seq = Some(seq);
        match outcome {
            PostOutcome::Stored(StoreKind::Inserted) => self.inserted += 1,
            PostOutcome::Stored(StoreKind::Updated) => self.updated += 1,
            PostOutcome::Stored(StoreKind::Unchanged) => self.unchanged += 1,
            PostOutcome::NotFound => self.not_found += 1,
            PostOutcome::SkippedError(stage) => {
                *self.skipped.entry(stage.as_str().to_string()).or_default() += 1;
            }
        }
    }

    pub fn skipped_total(&self) -> usize {
        self.skipped.values().sum()
    }
}

// ---------------------------------------------------------------------------
// Drivers
// ---------------------------------------------------------------------------

/// Process `seqs` in the given order with `pause` between posts.
///
/// Only list exhaustion ends the run.
pub async fn run_recent(
    processor: &dyn PostProcessor,
    category: &str,
    seqs: &[u64],
    pause: Duration,
    progress: &dyn ProgressReporter,
) -> CrawlStats {
    let mut stats = CrawlStats {
        candidates: seqs.len(),
        ..Default::default()
    };

    for (i, &seq) in seqs.iter().enumerate() {
        let outcome = processor.process(seq).await;
        stats.record(seq, &outcome);
        progress.post_processed(category, seq, &outcome, i + 1, Some(seqs.len()));

        if i + 1 < seqs.len() && !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    stats
}

/// Process `start_seq, start_seq + 1, ...` until `missing_break`
/// consecutive NOT_FOUND outcomes.
pub async fn run_sequential_scan(
    processor: &dyn PostProcessor,
    category: &str,
    start_seq: u64,
    missing_break: u32,
    pause: Duration,
    progress: &dyn ProgressReporter,
) -> CrawlStats {
    let mut stats = CrawlStats::default();
    let mut streak = MissStreak::new(missing_break);
    let mut next = Some(start_seq);

    while let Some(seq) = next {
        let outcome = processor.process(seq).await;
        stats.candidates += 1;
        stats.record(seq, &outcome);
        progress.post_processed(category, seq, &outcome, stats.processed, None);

        let state = streak.observe(&outcome);
        debug!(seq, ?state, "scan state");
        if streak.is_terminated() {
            info!(
                category,
                last_seq = seq,
                missing_break,
                "consecutive missing posts reached threshold, stopping scan"
            );
            break;
        }

        next = seq.checked_add(1);
        if !pause.is_zero() {
            tokio::time::sleep(pause).await;
        }
    }
    stats
}
