//! Adapter for the university notice-board detail template.
//!
//! Markup:
//! - title: `div.vw-tibx h4`
//! - meta spans: `div.vw-tibx div.zl-bx div.da span` (writer, department, date)
//! - post number: `<input name="seq" value="...">`

use std::sync::LazyLock;

use scraper::{Html, Selector};

use super::NoticePageAdapter;

static TITLE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("div.vw-tibx h4").expect("title selector"));
static META_SPAN_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse("div.vw-tibx div.zl-bx div.da span").expect("meta span selector")
});
static SEQ_INPUT_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("input[name=seq]").expect("seq input selector"));

/// Parser for the default site template.
pub struct UosNoticeAdapter;

impl UosNoticeAdapter {
    /// Text of the `index`-th meta span, only when all three spans exist.
    fn meta_span(doc: &Html, index: usize) -> Option<String> {
        let spans: Vec<String> = doc
            .select(&META_SPAN_SEL)
            .map(|s| s.text().collect::<String>().trim().to_string())
            .collect();
        if spans.len() < 3 {
            return None;
        }
        spans.into_iter().nth(index)
    }
}

impl NoticePageAdapter for UosNoticeAdapter {
    fn title(&self, doc: &Html) -> Option<String> {
        doc.select(&TITLE_SEL)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
    }

    fn department(&self, doc: &Html) -> Option<String> {
        Self::meta_span(doc, 1)
    }

    fn posted_date_text(&self, doc: &Html) -> Option<String> {
        Self::meta_span(doc, 2)
    }

    fn post_number(&self, doc: &Html) -> Option<u64> {
        doc.select(&SEQ_INPUT_SEL)
            .next()
            .and_then(|el| el.value().attr("value"))
            .and_then(|v| v.trim().parse::<u64>().ok())
    }

    fn name(&self) -> &str {
        "uos"
    }
}
