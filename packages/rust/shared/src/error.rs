//! Error types for NoticeHarvest.
//!
//! Library crates use [`NoticeHarvestError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all NoticeHarvest operations.
#[derive(Debug, thiserror::Error)]
pub enum NoticeHarvestError {
    /// Configuration loading or validation error (missing credentials, bad TOML).
    #[error("config error: {message}")]
    Config { message: String },

    /// Network/HTTP error talking to the notice-board site.
    #[error("network error: {0}")]
    Network(String),

    /// HTML parsing or content extraction error.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Headless browser rendering error (screenshot or document).
    #[error("render error: {0}")]
    Render(String),

    /// Summarization service error.
    #[error("summarize error: {0}")]
    Summarize(String),

    /// Embedding service error.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Vector index service error.
    #[error("vector index error: {0}")]
    VectorIndex(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (bad date, invalid option, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, NoticeHarvestError>;

impl NoticeHarvestError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error from any displayable message.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
