//! Listing-page seq extraction.
//!
//! Page 1 is parsed item by item so pinned entries can be dropped:
//! - Pinned: `<p class="num"><span class="cl">공지</span></p>`
//! - Regular: `<p class="num">1506</p>`
//!
//! Later pages never repeat pinned items, so a whole-document regex scan is
//! enough there.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

// ---------------------------------------------------------------------------
// Ordered de-duplication
// ---------------------------------------------------------------------------

/// Insertion-ordered set of seq ids.
#[derive(Debug, Default, Clone)]
pub struct OrderedSeqSet {
    order: Vec<u64>,
    seen: HashSet<u64>,
}

impl OrderedSeqSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `seq`, returning `true` if it was not already present.
    pub fn insert(&mut self, seq: u64) -> bool {
        if self.seen.insert(seq) {
            self.order.push(seq);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.order
    }

    pub fn into_vec(self) -> Vec<u64> {
        self.order
    }
}

impl FromIterator<u64> for OrderedSeqSet {
    fn from_iter<I: IntoIterator<Item = u64>>(iter: I) -> Self {
        let mut set = Self::new();
        for seq in iter {
            set.insert(seq);
        }
        set
    }
}

// ---------------------------------------------------------------------------
// Patterns (compiled once)
// ---------------------------------------------------------------------------

/// `?seq=1506`, `&seq=1506` or `&amp;seq=1506` inside an href.
static HREF_SEQ_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:\?|&|&amp;)seq=(\d+)").expect("href seq regex"));

/// `goDetail('x','1507')`: quoted final argument.
static CALL_QUOTED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\(\s*['"][^'"]*['"]\s*,\s*'(\d+)'\s*\)"#).expect("quoted call regex")
});

/// `goDetail('x',1507)`: bare numeric final argument.
static CALL_BARE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\(\s*['"][^'"]*['"]\s*,\s*(\d+)\s*\)"#).expect("bare call regex")
});

/// `view.do?...seq=1506` anywhere in the document.
static VIEW_SEQ_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"view\.do[^"'>]*(?:\?|&|&amp;)seq=(\d+)"#).expect("view seq regex")
});

static LI_SEL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").expect("li selector"));
static NUM_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("p.num").expect("num selector"));
static PINNED_BADGE_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("span.cl").expect("badge selector"));
static ANCHOR_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("a[href]").expect("anchor selector"));

/// Text token marking a pinned entry.
const PINNED_TOKEN: &str = "공지";

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Extract seqs from a first listing page, skipping pinned items.
///
/// For each `li`, the first anchor whose href carries `seq=` wins; otherwise
/// the item's markup is searched for a call-style pattern.
pub fn extract_seqs_skip_pinned(html: &str) -> Vec<u64> {
    let document = Html::parse_document(html);
    let mut seqs = OrderedSeqSet::new();

    for li in document.select(&LI_SEL) {
        if is_pinned(&li) {
            continue;
        }

        let from_href = li
            .select(&ANCHOR_SEL)
            .filter_map(|a| a.value().attr("href"))
            .find_map(|href| HREF_SEQ_RE.captures(href));
        if let Some(caps) = from_href {
            // A matching href with an unparseable number is dropped, not retried
            if let Some(seq) = parse_seq(&caps[1]) {
                seqs.insert(seq);
            }
            continue;
        }

        let markup = li.html();
        let from_call = CALL_QUOTED_RE
            .captures(&markup)
            .or_else(|| CALL_BARE_RE.captures(&markup));
        if let Some(seq) = from_call.and_then(|caps| parse_seq(&caps[1])) {
            seqs.insert(seq);
        }
    }

    seqs.into_vec()
}

/// Extract seqs from a later listing page with a whole-document scan.
pub fn extract_seqs_from_list_html(html: &str) -> Vec<u64> {
    let anchors = VIEW_SEQ_RE.captures_iter(html);
    let quoted = CALL_QUOTED_RE.captures_iter(html);
    let bare = CALL_BARE_RE.captures_iter(html);

    anchors
        .chain(quoted)
        .chain(bare)
        .filter_map(|caps| parse_seq(&caps[1]))
        .collect::<OrderedSeqSet>()
        .into_vec()
}

fn is_pinned(li: &ElementRef<'_>) -> bool {
    match li.select(&NUM_SEL).next() {
        Some(num) => {
            num.select(&PINNED_BADGE_SEL).next().is_some()
                || num.text().collect::<String>().contains(PINNED_TOKEN)
        }
        None => false,
    }
}

fn parse_seq(token: &str) -> Option<u64> {
    token.parse::<u64>().ok()
}
