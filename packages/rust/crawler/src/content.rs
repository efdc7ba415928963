//! Main-text extraction from detail pages.
//!
//! Picks the first candidate container with visible text (falling back to
//! `body`), drops non-content substructures, joins the remaining text nodes
//! line by line and strips footer/navigation boilerplate.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};

/// Appended when extracted text exceeds the character cap.
pub const TRUNCATION_MARKER: &str = "\n\n[... 본문 일부 생략 ...]";

/// Content containers, tried in order.
const CANDIDATE_SELECTORS: &[&str] = &[
    "div.vw-cnt",
    "div.vw-con",
    "div.vw-bd",
    "div.board-view",
    "article",
    "div#content",
    "div#contents",
    "main",
];

static CANDIDATES: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    CANDIDATE_SELECTORS
        .iter()
        .map(|s| Selector::parse(s).expect("candidate selector"))
        .collect()
});

/// Substructures removed before text extraction.
static NON_CONTENT_SEL: LazyLock<Selector> = LazyLock::new(|| {
    Selector::parse(
        ".related, .relate, .attach, .file, .files, .prev, .next, footer, #footer, \
         .sns, .share, .copyright, .copy, .address, .addr, script, style",
    )
    .expect("non-content selector")
});

static BODY_SEL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("body").expect("body selector"));

/// Boilerplate phrases, case-insensitive with `.` matching newlines.
static BOILERPLATE: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // campus address line ending in a phone number
        r"(?is)서울시립대학교\s*.+?\d{2,3}-\d{3,4}-\d{4}",
        r"(?is)Copyright.+?All rights reserved\.?",
        // previous / next post labels and everything after them
        r"(?is)이전글.*",
        r"(?is)다음글.*",
        // related posts
        r"(?is)관련\s?게시물.*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("boilerplate regex"))
    .collect()
});

static BLANK_RUN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n{3,}").expect("blank run regex"));

/// Extracts the post body as plain text.
#[derive(Debug, Clone)]
pub struct MainTextExtractor {
    max_chars: usize,
}

impl MainTextExtractor {
    pub fn new(max_chars: usize) -> Self {
        Self { max_chars }
    }

    /// Extract, clean and truncate the main text of `html`.
    pub fn extract(&self, html: &str) -> String {
        let doc = Html::parse_document(html);
        let raw = match main_container(&doc) {
            Some(main) => visible_lines(main),
            None => doc
                .root_element()
                .text()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        };
        truncate_chars(&clean_boilerplate(&raw), self.max_chars)
    }
}

fn main_container(doc: &Html) -> Option<ElementRef<'_>> {
    CANDIDATES
        .iter()
        .filter_map(|sel| doc.select(sel).next())
        .find(|el| el.text().any(|t| !t.trim().is_empty()))
        .or_else(|| doc.select(&BODY_SEL).next())
}

/// Stripped, non-empty text nodes of `main`, skipping removed substructures.
fn visible_lines(main: ElementRef<'_>) -> String {
    let removed: HashSet<_> = main.select(&NON_CONTENT_SEL).map(|el| el.id()).collect();

    let mut lines = Vec::new();
    for node in main.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        if node.ancestors().any(|a| removed.contains(&a.id())) {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            lines.push(trimmed);
        }
    }
    lines.join("\n")
}

/// Strip boilerplate phrases and collapse blank-line runs.
pub fn clean_boilerplate(text: &str) -> String {
    let mut out = text.to_string();
    for re in BOILERPLATE.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    BLANK_RUN_RE.replace_all(&out, "\n\n").trim().to_string()
}

/// Cut `text` to `max_chars` characters, appending [`TRUNCATION_MARKER`].
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => format!("{}{TRUNCATION_MARKER}", &text[..byte_idx]),
        None => text.to_string(),
    }
}
