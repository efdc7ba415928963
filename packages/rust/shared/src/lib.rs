//! Shared types, error model, and configuration for NoticeHarvest.
//!
//! This crate is the foundation depended on by all other NoticeHarvest crates.
//! It provides:
//! - The unified error type, [`NoticeHarvestError`]
//! - Domain types ([`Notice`], [`ChangeStatus`], [`PostOutcome`])
//! - Configuration ([`AppConfig`] and its sections, config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, CategoryConfig, CrawlSettings, DatabaseConfig, IndexConfig, OpenAiConfig,
    PineconeConfig, RenderConfig, SiteConfig, StrategyKind, config_dir, config_file_path,
    init_config, load_config, load_config_from, resolve_api_key,
};
pub use error::{NoticeHarvestError, Result};
pub use types::{
    ChangeStatus, DATE_FORMAT, FailureStage, Notice, PostOutcome, StoreKind,
};
