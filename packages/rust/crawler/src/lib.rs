//! Detail-page acquisition for the notice board.
//!
//! This crate provides:
//! - [`build_client`] / [`DetailFetcher`]: plain-HTTP access to the site
//! - [`adapters`]: page parsers with one method per extracted field
//! - [`content`]: main-text extraction with boilerplate removal
//! - [`render`]: headless-browser screenshots, documents and image slicing

pub mod adapters;
pub mod content;
pub mod render;

use std::time::Duration;

use noticeharvest_shared::{NoticeHarvestError, Result, SiteConfig};
use reqwest::Client;
use tracing::debug;

pub use adapters::{NoticePageAdapter, ParsedNotice, UosNoticeAdapter, parse_notice_fields};
pub use content::{MainTextExtractor, TRUNCATION_MARKER};
pub use render::{ChromiumRenderer, PageRenderer, slice_screenshot};

/// Maximum number of redirects followed for site requests.
const MAX_REDIRECTS: usize = 5;

/// Build the shared HTTP client for listing and detail requests.
pub fn build_client(site: &SiteConfig) -> Result<Client> {
    Client::builder()
        .user_agent(site.user_agent.as_str())
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .connect_timeout(Duration::from_secs(site.connect_timeout_secs))
        .timeout(Duration::from_secs(
            site.connect_timeout_secs + site.read_timeout_secs,
        ))
        .build()
        .map_err(|e| NoticeHarvestError::Network(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// Detail fetch
// ---------------------------------------------------------------------------

/// Fetches detail pages over plain HTTP.
pub struct DetailFetcher<'a> {
    client: &'a Client,
    site: &'a SiteConfig,
}

impl<'a> DetailFetcher<'a> {
    pub fn new(client: &'a Client, site: &'a SiteConfig) -> Self {
        Self { client, site }
    }

    /// GET the detail page for `(list_id, seq)`.
    ///
    /// Any network error or non-200 status is a [`NoticeHarvestError::Network`].
    pub async fn fetch(&self, list_id: &str, seq: u64) -> Result<String> {
        let url = self.site.view_url();
        let seq_str = seq.to_string();
        let query = detail_query(list_id, &seq_str);

        let response = self
            .client
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| NoticeHarvestError::Network(format!("seq {seq}: {e}")))?;

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(NoticeHarvestError::Network(format!(
                "seq {seq}: HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| NoticeHarvestError::Network(format!("seq {seq}: failed to read body: {e}")))?;
        debug!(seq, bytes = body.len(), "detail page fetched");
        Ok(body)
    }
}

/// Query parameters the detail endpoint expects.
fn detail_query<'q>(list_id: &'q str, seq: &'q str) -> [(&'static str, &'q str); 12] {
    [
        ("list_id", list_id),
        ("seq", seq),
        ("sort", "1"),
        ("pageIndex", "1"),
        ("searchCnd", ""),
        ("searchWrd", ""),
        ("cate_id", ""),
        ("viewAuth", "Y"),
        ("writeAuth", "Y"),
        ("board_list_num", "10"),
        ("lpageCount", "12"),
        ("menuid", ""),
    ]
}
