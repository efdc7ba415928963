//! Core pipeline orchestration for NoticeHarvest.
//!
//! Ties discovery, change detection, content acquisition and persistence
//! into the crawl workflow, and wires the indexer into the index job.

pub mod acquisition;
pub mod context;
pub mod detector;
pub mod driver;
pub mod indexing;
pub mod pipeline;
pub mod processor;

#[cfg(test)]
mod testing;

pub use context::PipelineContext;
pub use driver::{CrawlStats, MissStreak, ScanState};
pub use indexing::run_index_job;
pub use pipeline::{
    CategoryReport, CategoryStatus, CrawlMode, CrawlOptions, CrawlReport, ProgressReporter,
    SilentProgress, run_crawl,
};
