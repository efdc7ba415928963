//! Change detection against the stored `posted_date`.

use chrono::NaiveDate;
use tracing::debug;

use noticeharvest_shared::{ChangeStatus, Result};
use noticeharvest_storage::Storage;

/// Decides NEW / UPDATED / UNCHANGED for a freshly parsed post.
pub struct ChangeDetector<'a> {
    storage: &'a Storage,
}

impl<'a> ChangeDetector<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Compare `observed` with the stored date for `(category, post_number)`.
    pub async fn decide(
        &self,
        category: &str,
        post_number: u64,
        observed: NaiveDate,
    ) -> Result<ChangeStatus> {
        let stored = self.storage.get_posted_date(category, post_number).await?;
        let status = classify(stored, observed);
        debug!(category, post_number, ?stored, %observed, ?status, "change check");
        Ok(status)
    }
}

/// Pure decision rule: date divergence is the only update trigger.
pub fn classify(stored: Option<NaiveDate>, observed: NaiveDate) -> ChangeStatus {
    match stored {
        None => ChangeStatus::New,
        Some(previous) if previous == observed => ChangeStatus::Unchanged,
        Some(previous) => ChangeStatus::Updated { previous },
    }
}
