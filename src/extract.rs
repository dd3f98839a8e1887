//! Title, body and publication-date extraction from article markup.
//!
//! Page layouts differ per outlet and change often, so every field is
//! resolved through an ordered list of [`Strategy`] values: pure functions
//! from a parsed document to an optional string. For the title, the first
//! strategy that yields a non-empty value wins. For the body, the first
//! strategy that matches anything wins, even if what it matched is empty.
//! Nothing here returns an error; a field no
//! strategy can fill falls back to an empty string (title, body) or the
//! caller-supplied date.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use chrono_tz::Asia::Seoul;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, trace};

use crate::models::{ExtractedContent, ExtractionTier};

/// One named step of a fallback chain.
#[derive(Clone, Copy)]
pub struct Strategy {
    pub name: &'static str,
    pub run: fn(&Html) -> Option<String>,
}

impl std::fmt::Debug for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name)
    }
}

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

static OG_TITLE: Lazy<Selector> = Lazy::new(|| sel(r#"meta[property="og:title"]"#));
static META_TITLE: Lazy<Selector> = Lazy::new(|| sel(r#"meta[name="title"]"#));
static HEADINGS: Lazy<Vec<Selector>> = Lazy::new(|| {
    ["h1", "header h1", "article h1", "div.caas-title-wrapper h1"]
        .into_iter()
        .map(sel)
        .collect()
});
static DOC_TITLE: Lazy<Selector> = Lazy::new(|| sel("title"));

static BODY_CONTAINERS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "article p, main p, div[data-test-locator='mega'] p",
        "div.caas-body p",
        "div#article-body p",
        "div[itemprop='articleBody'] p",
        "div[itemprop='articleBody'] div p",
        "section[data-test-locator='mega'] p",
    ]
    .into_iter()
    .map(sel)
    .collect()
});
static META_DESCRIPTION: Lazy<Selector> = Lazy::new(|| sel(r#"meta[name="description"]"#));
static OG_DESCRIPTION: Lazy<Selector> = Lazy::new(|| sel(r#"meta[property="og:description"]"#));

static TIME_DATETIME: Lazy<Selector> = Lazy::new(|| sel("time[datetime]"));
static DATE_METAS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        r#"meta[property="article:published_time"]"#,
        r#"meta[name="article:published_time"]"#,
        r#"meta[name="publish-date"]"#,
        r#"meta[itemprop="datePublished"]"#,
    ]
    .into_iter()
    .map(sel)
    .collect()
});

/// Title chain: social preview, title meta, headings, `<title>`.
pub static TITLE_STRATEGIES: &[Strategy] = &[
    Strategy { name: "og:title", run: |doc| meta_content(doc, &OG_TITLE) },
    Strategy { name: "meta:title", run: |doc| meta_content(doc, &META_TITLE) },
    Strategy { name: "heading", run: first_heading },
    Strategy { name: "document-title", run: |doc| first_text(doc, &DOC_TITLE) },
];

/// Body chain: structural containers, then description metadata.
pub static BODY_STRATEGIES: &[Strategy] = &[
    Strategy { name: "container", run: container_paragraphs },
    Strategy { name: "meta:description", run: |doc| meta_content(doc, &META_DESCRIPTION) },
    Strategy { name: "og:description", run: |doc| meta_content(doc, &OG_DESCRIPTION) },
];

/// Run a chain and return the winning strategy name with its value.
pub fn first_match(doc: &Html, chain: &[Strategy]) -> Option<(&'static str, String)> {
    chain.iter().find_map(|s| {
        let value = (s.run)(doc)?;
        (!value.is_empty()).then_some((s.name, value))
    })
}

/// Run a chain and stop at the first strategy that matched anything.
///
/// Unlike [`first_match`], an empty value still settles the chain.
pub fn first_decided(doc: &Html, chain: &[Strategy]) -> Option<(&'static str, String)> {
    chain.iter().find_map(|s| (s.run)(doc).map(|value| (s.name, value)))
}

/// Whitespace-collapsed text of an element.
fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn meta_content(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .filter_map(|m| m.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn first_text(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector).next().map(element_text)
}

fn first_heading(doc: &Html) -> Option<String> {
    HEADINGS
        .iter()
        .filter_map(|s| first_text(doc, s))
        .find(|t| !t.is_empty())
}

/// The first container selector with any match decides the body, even when
/// its paragraphs are all empty.
fn container_paragraphs(doc: &Html) -> Option<String> {
    for selector in BODY_CONTAINERS.iter() {
        let mut matched = false;
        let mut parts = Vec::new();
        for p in doc.select(selector) {
            matched = true;
            let text = element_text(p);
            if !text.is_empty() {
                parts.push(text);
            }
        }
        if matched {
            return Some(parts.join(" "));
        }
    }
    None
}

/// Parse a published-time value. Values without an offset are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(dt) = DateTime::parse_from_str(raw, fmt) {
            return Some(dt.with_timezone(&Utc));
        }
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Calendar date of an instant in the canonical timezone.
pub fn to_canonical_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&Seoul).date_naive()
}

/// Today in the canonical timezone.
pub fn today_canonical() -> NaiveDate {
    to_canonical_date(Utc::now())
}

/// Structured publication date, if any candidate parses.
pub fn extract_date(doc: &Html) -> Option<NaiveDate> {
    let time_attr = doc
        .select(&TIME_DATETIME)
        .next()
        .and_then(|t| t.value().attr("datetime"))
        .map(str::to_string);
    let metas = DATE_METAS.iter().filter_map(|s| {
        doc.select(s)
            .next()
            .and_then(|m| m.value().attr("content"))
            .map(str::to_string)
    });

    time_attr.into_iter().chain(metas).find_map(|raw| {
        let parsed = parse_timestamp(&raw);
        if parsed.is_none() {
            trace!(%raw, "Unparseable timestamp candidate");
        }
        parsed.map(to_canonical_date)
    })
}

pub fn extract_title(doc: &Html) -> String {
    first_match(doc, TITLE_STRATEGIES)
        .map(|(_, v)| v)
        .unwrap_or_default()
}

pub fn extract_body(doc: &Html) -> String {
    first_decided(doc, BODY_STRATEGIES)
        .map(|(_, v)| v)
        .unwrap_or_default()
}

/// Extract title, body and canonical date from markup.
///
/// `fallback_date` is used when the page carries no parseable timestamp.
pub fn extract(markup: &str, fallback_date: NaiveDate) -> ExtractedContent {
    let doc = Html::parse_document(markup);
    let title = extract_title(&doc);
    let body = extract_body(&doc);
    let date = extract_date(&doc);

    debug!(
        title_chars = title.chars().count(),
        body_chars = body.chars().count(),
        date_found = date.is_some(),
        "Extracted content"
    );

    ExtractedContent {
        title,
        body,
        published_date: date.unwrap_or(fallback_date),
        date_found: date.is_some(),
        tier: ExtractionTier::Static,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fallback() -> NaiveDate {
        NaiveDate::from_ymd_opt(2030, 1, 1).unwrap()
    }

    #[test]
    fn test_og_title_wins_over_headings() {
        let html = r#"<html><head><meta property="og:title" content=" Tesla Q1 Beat ">
            <title>Doc title</title></head><body><h1>Heading</h1></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(first_match(&doc, TITLE_STRATEGIES), Some(("og:title", "Tesla Q1 Beat".to_string())));
    }

    #[test]
    fn test_title_falls_through_empty_meta() {
        let html = r#"<html><head><meta property="og:title" content="  "><title>Doc title</title></head>
            <body><article><h1>  Article   heading </h1></article></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(extract_title(&doc), "Article heading");
    }

    #[test]
    fn test_document_title_is_last_resort() {
        let doc = Html::parse_document("<html><head><title> Only title </title></head><body></body></html>");
        assert_eq!(extract_title(&doc), "Only title");
    }

    #[test]
    fn test_body_joins_container_paragraphs() {
        let html = r#"<html><body><article><p>First part.</p><p>  </p><p>Second
            part.</p></article><div class="caas-body"><p>ignored</p></div></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(
            first_decided(&doc, BODY_STRATEGIES),
            Some(("container", "First part. Second part.".to_string()))
        );
    }

    #[test]
    fn test_matched_empty_container_stops_body_chain() {
        let html = r#"<html><head><meta name="description" content="Summary only">
            <meta property="og:description" content="OG summary"></head>
            <body><article><p>   </p></article></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(first_decided(&doc, BODY_STRATEGIES), Some(("container", String::new())));
        assert_eq!(extract_body(&doc), "");
        assert_eq!(extract(html, fallback()).body, "");
    }

    #[test]
    fn test_body_uses_later_container() {
        let html = r#"<html><body><div itemprop="articleBody"><p>Body text.</p></div></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(extract_body(&doc), "Body text.");
    }

    #[test]
    fn test_body_falls_back_to_description() {
        let html = r#"<html><head><meta name="description" content="Summary only"></head><body><div>x</div></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(extract_body(&doc), "Summary only");

        let og = r#"<html><head><meta property="og:description" content="OG summary"></head></html>"#;
        assert_eq!(extract_body(&Html::parse_document(og)), "OG summary");
    }

    #[test]
    fn test_time_element_converted_to_seoul() {
        let html = r#"<html><body><time datetime="2024-05-01T23:30:00Z">May 1</time></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(extract_date(&doc), NaiveDate::from_ymd_opt(2024, 5, 2));
    }

    #[test]
    fn test_meta_date_used_when_time_unparseable() {
        let html = r#"<html><head><meta property="article:published_time" content="2024-03-10T01:00:00+00:00"></head>
            <body><time datetime="yesterday">y</time></body></html>"#;
        let doc = Html::parse_document(html);
        assert_eq!(extract_date(&doc), NaiveDate::from_ymd_opt(2024, 3, 10));
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp("2024-05-01T23:30:00Z").is_some());
        assert!(parse_timestamp("2024-05-01T23:30:00.123+09:00").is_some());
        assert!(parse_timestamp("2024-05-01T23:30:00+0000").is_some());
        assert_eq!(
            parse_timestamp("2024-05-01T16:00:00").map(to_canonical_date),
            NaiveDate::from_ymd_opt(2024, 5, 2)
        );
        assert_eq!(
            parse_timestamp("2024-05-01").map(to_canonical_date),
            NaiveDate::from_ymd_opt(2024, 5, 1)
        );
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("last tuesday").is_none());
    }

    #[test]
    fn test_extract_tesla_page() {
        let html = r#"<html><head><meta property="og:title" content="Tesla Q1 Beat"></head>
            <body><article><time datetime="2024-05-01T23:30:00Z"></time>
            <p>Tesla reported record profit and growth.</p></article></body></html>"#;
        let content = extract(html, fallback());
        assert_eq!(content.title, "Tesla Q1 Beat");
        assert_eq!(content.body, "Tesla reported record profit and growth.");
        assert_eq!(content.published_date, NaiveDate::from_ymd_opt(2024, 5, 2).unwrap());
        assert!(content.date_found);
        assert_eq!(content.tier, ExtractionTier::Static);
    }

    #[test]
    fn test_extract_unrecognized_markup_defaults() {
        let content = extract("<div><span>nothing useful</span></div>", fallback());
        assert_eq!(content.title, "");
        assert_eq!(content.body, "");
        assert_eq!(content.published_date, fallback());
        assert!(!content.date_found);
    }

    #[test]
    fn test_extract_garbage_never_panics() {
        let content = extract("<<<>>> </p></article><meta content=", fallback());
        assert_eq!(content.published_date, fallback());
    }
}
