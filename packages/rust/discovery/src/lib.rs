//! Listing discovery: turns a category's paginated notice list into an
//! ordered, de-duplicated list of candidate seq ids.
//!
//! Page 1 is filtered for pinned entries; later pages are scanned with a
//! whole-document regex. Scanning stops when a page adds no new ids, when
//! the limit is reached, on a non-200 response, or when the page budget runs
//! out.

mod parser;

use std::collections::BTreeMap;
use std::time::Duration;

use noticeharvest_shared::SiteConfig;
use reqwest::Client;
use tracing::{debug, info, instrument, warn};

pub use parser::{OrderedSeqSet, extract_seqs_from_list_html, extract_seqs_skip_pinned};

// ---------------------------------------------------------------------------
// Options and results
// ---------------------------------------------------------------------------

/// Pagination settings for one discovery call.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Stop once this many unique seqs are collected.
    pub limit: usize,
    /// Maximum listing pages to request.
    pub max_pages: u32,
    /// Pause between listing pages.
    pub page_sleep: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            limit: 100,
            max_pages: 10,
            page_sleep: Duration::from_millis(200),
        }
    }
}

/// Why pagination ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The requested number of seqs was collected.
    LimitReached,
    /// A page contributed no new seqs (includes empty pages).
    NoNewIds,
    /// `max_pages` pages were scanned.
    PageBudget,
    /// The listing returned a non-200 status.
    HttpStatus(u16),
    /// The listing request failed before a response arrived.
    RequestFailed,
}

/// Outcome of a discovery call. Never an error: a failed page ends the scan
/// and whatever was collected so far is returned.
#[derive(Debug, Clone)]
pub struct Discovered {
    /// Seqs, most recent first, de-duplicated across pages.
    pub seqs: Vec<u64>,
    /// Listing pages actually requested.
    pub pages_fetched: u32,
    pub stop: StopReason,
}

// ---------------------------------------------------------------------------
// Scanner
// ---------------------------------------------------------------------------

/// Walks listing pages for the configured site.
pub struct ListingScanner<'a> {
    client: &'a Client,
    site: &'a SiteConfig,
}

impl<'a> ListingScanner<'a> {
    pub fn new(client: &'a Client, site: &'a SiteConfig) -> Self {
        Self { client, site }
    }

    /// Collect up to `opts.limit` recent seqs for `list_id`.
    #[instrument(skip_all, fields(list_id = %list_id, limit = opts.limit))]
    pub async fn collect_recent_seqs(
        &self,
        list_id: &str,
        extra_params: &BTreeMap<String, String>,
        opts: &DiscoveryOptions,
    ) -> Discovered {
        let list_url = self.site.list_url();
        let referer = format!("{}/", self.site.base_url.trim_end_matches('/'));
        let mut collected = OrderedSeqSet::new();
        let mut pages_fetched = 0;

        if opts.limit == 0 {
            return Discovered {
                seqs: Vec::new(),
                pages_fetched,
                stop: StopReason::LimitReached,
            };
        }

        for page in 1..=opts.max_pages {
            let page_index = page.to_string();
            let mut query: Vec<(&str, &str)> = vec![
                ("list_id", list_id),
                ("pageIndex", page_index.as_str()),
                ("searchCnd", ""),
                ("searchWrd", ""),
            ];
            query.extend(extra_params.iter().map(|(k, v)| (k.as_str(), v.as_str())));

            pages_fetched += 1;
            let response = match self
                .client
                .get(&list_url)
                .query(&query)
                .header(reqwest::header::REFERER, referer.as_str())
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(page, error = %e, "listing request failed, stopping");
                    return finish(collected, pages_fetched, StopReason::RequestFailed);
                }
            };

            let status = response.status();
            if status != reqwest::StatusCode::OK {
                warn!(page, status = status.as_u16(), "listing returned non-200, stopping");
                return finish(collected, pages_fetched, StopReason::HttpStatus(status.as_u16()));
            }

            let body = match response.text().await {
                Ok(body) => body,
                Err(e) => {
                    warn!(page, error = %e, "failed to read listing body, stopping");
                    return finish(collected, pages_fetched, StopReason::RequestFailed);
                }
            };

            let page_seqs = if page == 1 {
                extract_seqs_skip_pinned(&body)
            } else {
                extract_seqs_from_list_html(&body)
            };

            let mut new_count = 0usize;
            for seq in page_seqs {
                if collected.insert(seq) {
                    new_count += 1;
                    if collected.len() >= opts.limit {
                        return finish(collected, pages_fetched, StopReason::LimitReached);
                    }
                }
            }
            debug!(page, new_count, total = collected.len(), "listing page scanned");

            if new_count == 0 {
                return finish(collected, pages_fetched, StopReason::NoNewIds);
            }

            if page < opts.max_pages && !opts.page_sleep.is_zero() {
                tokio::time::sleep(opts.page_sleep).await;
            }
        }

        finish(collected, pages_fetched, StopReason::PageBudget)
    }
}

fn finish(collected: OrderedSeqSet, pages_fetched: u32, stop: StopReason) -> Discovered {
    info!(
        collected = collected.len(),
        pages_fetched,
        stop = ?stop,
        "listing discovery finished"
    );
    Discovered {
        seqs: collected.into_vec(),
        pages_fetched,
        stop,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn site_for(server: &MockServer) -> SiteConfig {
        SiteConfig {
            base_url: server.uri(),
            ..SiteConfig::default()
        }
    }

    fn opts(limit: usize, max_pages: u32) -> DiscoveryOptions {
        DiscoveryOptions {
            limit,
            max_pages,
            page_sleep: Duration::ZERO,
        }
    }

    const PAGE_ONE: &str = r##"
<ul>
  <li><p class="num"><span class="cl">공지</span></p><a href="view.do?list_id=FA1&seq=9000">pinned</a></li>
  <li><p class="num">3</p><a href="view.do?list_id=FA1&seq=1506">a</a></li>
  <li><p class="num">2</p><a href="#" onclick="goDetail('x','1505')">b</a></li>
</ul>"##;

    const PAGE_TWO: &str = r#"
<ul>
  <li><a href="/korNotice/view.do?list_id=FA1&seq=1504">c</a></li>
  <li><a href="/korNotice/view.do?list_id=FA1&seq=1503">d</a></li>
</ul>"#;

    async fn mount_page(server: &MockServer, page: &str, body: &str) {
        Mock::given(method("GET"))
            .and(path("/korNotice/list.do"))
            .and(query_param("pageIndex", page))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn paginates_until_no_new_ids() {
        let server = MockServer::start().await;
        mount_page(&server, "1", PAGE_ONE).await;
        mount_page(&server, "2", PAGE_TWO).await;
        // Page 3 repeats page 2: no new ids, scanning must stop there
        mount_page(&server, "3", PAGE_TWO).await;
        Mock::given(method("GET"))
            .and(path("/korNotice/list.do"))
            .and(query_param("pageIndex", "4"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_TWO))
            .expect(0)
            .mount(&server)
            .await;

        let client = Client::new();
        let site = site_for(&server);
        let found = ListingScanner::new(&client, &site)
            .collect_recent_seqs("FA1", &BTreeMap::new(), &opts(100, 10))
            .await;

        assert_eq!(found.seqs, vec![1506, 1505, 1504, 1503]);
        assert_eq!(found.pages_fetched, 3);
        assert_eq!(found.stop, StopReason::NoNewIds);
    }

    #[tokio::test]
    async fn stops_at_limit() {
        let server = MockServer::start().await;
        mount_page(&server, "1", PAGE_ONE).await;
        mount_page(&server, "2", PAGE_TWO).await;

        let client = Client::new();
        let site = site_for(&server);
        let found = ListingScanner::new(&client, &site)
            .collect_recent_seqs("FA1", &BTreeMap::new(), &opts(3, 10))
            .await;

        assert_eq!(found.seqs, vec![1506, 1505, 1504]);
        assert_eq!(found.stop, StopReason::LimitReached);
    }

    #[tokio::test]
    async fn non_200_aborts_with_partial_result() {
        let server = MockServer::start().await;
        mount_page(&server, "1", PAGE_ONE).await;
        Mock::given(method("GET"))
            .and(path("/korNotice/list.do"))
            .and(query_param("pageIndex", "2"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let client = Client::new();
        let site = site_for(&server);
        let found = ListingScanner::new(&client, &site)
            .collect_recent_seqs("FA1", &BTreeMap::new(), &opts(100, 10))
            .await;

        assert_eq!(found.seqs, vec![1506, 1505]);
        assert_eq!(found.stop, StopReason::HttpStatus(500));
    }

    #[tokio::test]
    async fn empty_first_page_stops_immediately() {
        let server = MockServer::start().await;
        mount_page(&server, "1", "<html><body><ul></ul></body></html>").await;

        let client = Client::new();
        let site = site_for(&server);
        let found = ListingScanner::new(&client, &site)
            .collect_recent_seqs("FA1", &BTreeMap::new(), &opts(100, 10))
            .await;

        assert!(found.seqs.is_empty());
        assert_eq!(found.pages_fetched, 1);
        assert_eq!(found.stop, StopReason::NoNewIds);
    }

    #[tokio::test]
    async fn page_budget_is_respected() {
        let server = MockServer::start().await;
        mount_page(&server, "1", PAGE_ONE).await;
        mount_page(&server, "2", PAGE_TWO).await;

        let client = Client::new();
        let site = site_for(&server);
        let found = ListingScanner::new(&client, &site)
            .collect_recent_seqs("FA1", &BTreeMap::new(), &opts(100, 2))
            .await;

        assert_eq!(found.seqs.len(), 4);
        assert_eq!(found.stop, StopReason::PageBudget);
    }

    #[tokio::test]
    async fn extra_params_are_sent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/korNotice/list.do"))
            .and(query_param("list_id", "20013DA1"))
            .and(query_param("cate_id2", "000010383"))
            .respond_with(ResponseTemplate::new(200).set_body_string(PAGE_ONE))
            .expect(1..)
            .mount(&server)
            .await;

        let mut extra = BTreeMap::new();
        extra.insert("cate_id2".to_string(), "000010383".to_string());

        let client = Client::new();
        let site = site_for(&server);
        let found = ListingScanner::new(&client, &site)
            .collect_recent_seqs("20013DA1", &extra, &opts(2, 1))
            .await;

        assert_eq!(found.seqs, vec![1506, 1505]);
    }
}
