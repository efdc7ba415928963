//! Core domain types for NoticeHarvest.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Date format used for `posted_date` in storage and vector metadata.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

// ---------------------------------------------------------------------------
// Notice
// ---------------------------------------------------------------------------

/// A notice-board post, keyed by `(category, post_number)`.
///
/// Every upsert writes all fields; nothing is merged with a previously
/// stored row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    /// Category name (e.g. `COLLEGE_ENGINEERING`).
    pub category: String,
    /// Canonical post number recovered from the detail page.
    pub post_number: u64,
    /// Post title.
    pub title: String,
    /// Issuing department, if the page shows one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    /// Posting date; the sole change-detection signal.
    pub posted_date: NaiveDate,
    /// Canonical detail URL derived from `list_id` + seq.
    pub link: String,
    /// Natural-language summary (absent when summarization failed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    /// Summary embedding (absent when the embedding call failed).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

// ---------------------------------------------------------------------------
// Change detection
// ---------------------------------------------------------------------------

/// Result of comparing a freshly observed post against stored state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeStatus {
    /// No stored row for this key.
    New,
    /// A row exists but its `posted_date` differs.
    Updated { previous: NaiveDate },
    /// A row exists with the same `posted_date`.
    Unchanged,
}

impl ChangeStatus {
    /// Whether the post must go through full acquisition.
    pub fn needs_acquisition(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

// ---------------------------------------------------------------------------
// Per-post outcomes
// ---------------------------------------------------------------------------

/// How a `Stored` outcome came about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    /// First successful acquisition of this key.
    Inserted,
    /// Overwrote a row whose `posted_date` changed.
    Updated,
    /// Already up to date; nothing written.
    Unchanged,
}

/// Which acquisition step failed for a `SkippedError` outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    /// Detail page could not be fetched (network error or non-200).
    Fetch,
    /// Headless rendering failed or produced nothing.
    Render,
    /// Summarization failed or returned empty text.
    Summarize,
    /// The relational upsert failed.
    Persist,
}

impl FailureStage {
    /// Stable lowercase label for logs and stats.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Render => "render",
            Self::Summarize => "summarize",
            Self::Persist => "persist",
        }
    }
}

/// Outcome of processing one sequence id.
///
/// The crawl driver only counts [`PostOutcome::NotFound`] toward its miss
/// streak; [`PostOutcome::SkippedError`] never affects termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostOutcome {
    Stored(StoreKind),
    NotFound,
    SkippedError(FailureStage),
}

impl PostOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self, Self::Stored(_))
    }
}

impl From<ChangeStatus> for StoreKind {
    fn from(status: ChangeStatus) -> Self {
        match status {
            ChangeStatus::New => Self::Inserted,
            ChangeStatus::Updated { .. } => Self::Updated,
            ChangeStatus::Unchanged => Self::Unchanged,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn change_status_maps_to_store_kind() {
        let prev = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(StoreKind::from(ChangeStatus::New), StoreKind::Inserted);
        assert_eq!(
            StoreKind::from(ChangeStatus::Updated { previous: prev }),
            StoreKind::Updated
        );
        assert_eq!(
            StoreKind::from(ChangeStatus::Unchanged),
            StoreKind::Unchanged
        );
        assert!(!ChangeStatus::Unchanged.needs_acquisition());
        assert!(ChangeStatus::New.needs_acquisition());
    }

    #[test]
    fn notice_serialization_skips_missing_fields() {
        let notice = Notice {
            category: "GENERAL".into(),
            post_number: 1506,
            title: "Scholarship notice".into(),
            department: None,
            posted_date: NaiveDate::from_ymd_opt(2024, 5, 2).unwrap(),
            link: "https://example.com/view.do?list_id=FA1&seq=1506".into(),
            summary: None,
            embedding: None,
        };
        let json = serde_json::to_string(&notice).expect("serialize");
        assert!(!json.contains("summary"));
        assert!(json.contains("\"posted_date\":\"2024-05-02\""));
        let parsed: Notice = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, notice);
    }

    #[test]
    fn failure_stage_labels() {
        assert_eq!(FailureStage::Persist.as_str(), "persist");
        assert_eq!(
            serde_json::to_string(&FailureStage::Render).unwrap(),
            "\"render\""
        );
    }
}
