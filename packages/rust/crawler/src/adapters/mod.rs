//! Page parser trait and the built-in notice-board adapter.
//!
//! Adapters isolate the site-specific selector logic: one method per field,
//! so a template change only touches the adapter.

mod uos;

use std::sync::LazyLock;

use chrono::NaiveDate;
use noticeharvest_shared::DATE_FORMAT;
use regex::Regex;
use scraper::Html;

pub use uos::UosNoticeAdapter;

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// Fields parsed from a detail page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedNotice {
    pub title: String,
    pub department: Option<String>,
    pub posted_date: NaiveDate,
    /// Canonical post number; falls back to the seq used for the request.
    pub post_number: u64,
    /// `true` when no date was found and today's date was substituted.
    pub date_defaulted: bool,
}

/// Site-specific detail page parser.
pub trait NoticePageAdapter: Send + Sync {
    /// Post title. `None` (or blank) means the post does not exist.
    fn title(&self, doc: &Html) -> Option<String>;

    /// Issuing department.
    fn department(&self, doc: &Html) -> Option<String>;

    /// Raw text of the field that carries the posting date.
    fn posted_date_text(&self, doc: &Html) -> Option<String>;

    /// Canonical post number from the page itself.
    fn post_number(&self, doc: &Html) -> Option<u64>;

    /// Human-readable adapter name for tracing.
    fn name(&self) -> &str;
}

/// First `YYYY-MM-DD` substring.
static DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{4}-\d{2}-\d{2}").expect("date regex"));

/// Parse a detail page into [`ParsedNotice`].
///
/// Returns `None` when the page carries no title: the post does not exist at
/// this seq. A missing or invalid date becomes `today`.
pub fn parse_notice_fields(
    adapter: &dyn NoticePageAdapter,
    html: &str,
    seq: u64,
    today: NaiveDate,
) -> Option<ParsedNotice> {
    let doc = Html::parse_document(html);

    let title = adapter.title(&doc)?.trim().to_string();
    if title.is_empty() {
        return None;
    }

    let department = adapter
        .department(&doc)
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty());

    let parsed_date = adapter
        .posted_date_text(&doc)
        .as_deref()
        .and_then(parse_first_date);
    let date_defaulted = parsed_date.is_none();

    Some(ParsedNotice {
        title,
        department,
        posted_date: parsed_date.unwrap_or(today),
        post_number: adapter.post_number(&doc).unwrap_or(seq),
        date_defaulted,
    })
}

/// Parse the first `YYYY-MM-DD` substring of `text`.
pub fn parse_first_date(text: &str) -> Option<NaiveDate> {
    let m = DATE_RE.find(text)?;
    NaiveDate::parse_from_str(m.as_str(), DATE_FORMAT).ok()
}
