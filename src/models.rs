//! Data models shared by the acquisition pipeline and the store.
//!
//! - [`RawFetchResult`]: one HTTP response, never persisted
//! - [`ExtractedContent`]: title/body/date pulled out of markup
//! - [`ArticleRecord`]: the persisted article unit plus its pipeline status
//! - [`PriceRecord`]: one daily bar, keyed on `(ticker, date)`
//! - [`KnownUrlSet`]: URLs already stored for a ticker

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use url::Url;

use crate::error::PipelineError;

/// Normalize a candidate URL to its identity form.
///
/// Identity is scheme, host (with port) and path. Query strings and
/// fragments are dropped. Strings that do not parse are returned trimmed.
///
/// ```ignore
/// assert_eq!(
///     normalize_url("https://finance.yahoo.com/news/a.html?x=1#top"),
///     "https://finance.yahoo.com/news/a.html"
/// );
/// ```
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    match Url::parse(trimmed) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => trimmed.to_string(),
    }
}

/// One HTTP response as seen by the extractor.
#[derive(Debug, Clone)]
pub struct RawFetchResult {
    /// Final URL after redirects.
    pub url: String,
    pub status: u16,
    pub body: Vec<u8>,
    pub content_type: Option<String>,
    pub retrieved_at: DateTime<Utc>,
}

impl RawFetchResult {
    /// Decode the body as text, replacing invalid UTF-8.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Where the final body text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionTier {
    Static,
    Rendered,
}

/// Title, body and publication date extracted from one page.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedContent {
    pub title: String,
    pub body: String,
    /// Calendar date in Asia/Seoul. Never absent.
    pub published_date: NaiveDate,
    /// Whether `published_date` came from the page rather than the fallback.
    pub date_found: bool,
    pub tier: ExtractionTier,
}

/// Polarity label derived from a compound score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifier output. `score` is always within `[-1.0, 1.0]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sentiment {
    pub label: SentimentLabel,
    pub score: f64,
}

impl Sentiment {
    pub const NEUTRAL: Sentiment = Sentiment {
        label: SentimentLabel::Neutral,
        score: 0.0,
    };
}

/// Outcome of acquiring one candidate URL.
#[derive(Debug)]
pub enum ItemStatus {
    /// Content acquired; the tier records which pass produced the body.
    Done(ExtractionTier),
    /// URL already stored; not fetched.
    Skipped,
    /// Acquisition failed; the record must never reach storage.
    Failed(PipelineError),
}

/// The persisted article unit, plus the status of the attempt that built it.
///
/// Constructed once per candidate URL by the orchestrator. Only records with
/// [`ItemStatus::Done`] are persistable.
#[derive(Debug)]
pub struct ArticleRecord {
    pub ticker: String,
    /// Unique key in storage.
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_date: NaiveDate,
    pub sentiment: Sentiment,
    pub status: ItemStatus,
}

impl ArticleRecord {
    /// Placeholder for an item that produced no content.
    pub fn empty(ticker: &str, url: &str, date: NaiveDate, status: ItemStatus) -> Self {
        Self {
            ticker: ticker.to_string(),
            url: url.to_string(),
            title: String::new(),
            content: String::new(),
            published_date: date,
            sentiment: Sentiment::NEUTRAL,
            status,
        }
    }

    pub fn is_persistable(&self) -> bool {
        matches!(self.status, ItemStatus::Done(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, ItemStatus::Failed(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self.status, ItemStatus::Skipped)
    }

    pub fn error(&self) -> Option<&PipelineError> {
        match &self.status {
            ItemStatus::Failed(e) => Some(e),
            _ => None,
        }
    }
}

/// Daily price direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Flat,
}

impl Direction {
    pub fn from_change(change: f64) -> Self {
        if change > 0.0 {
            Direction::Up
        } else if change < 0.0 {
            Direction::Down
        } else {
            Direction::Flat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Flat => "flat",
        }
    }
}

/// One daily bar. Unique on `(ticker, date)`; re-writes replace every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRecord {
    pub ticker: String,
    pub date: NaiveDate,
    pub open: f64,
    pub close: f64,
    pub volume: i64,
    pub change: f64,
    pub change_pct: f64,
    pub direction: Direction,
}

impl PriceRecord {
    /// Build a record from open/close, deriving change, percentage and direction.
    pub fn from_bar(ticker: &str, date: NaiveDate, open: f64, close: f64, volume: i64) -> Self {
        let open = round4(open);
        let close = round4(close);
        let change = round4(close - open);
        let change_pct = if open != 0.0 {
            round4(change / open * 100.0)
        } else {
            0.0
        };
        Self {
            ticker: ticker.to_string(),
            date,
            open,
            close,
            volume,
            change,
            change_pct,
            direction: Direction::from_change(change),
        }
    }
}

pub(crate) fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// URLs already stored for a ticker, in normalized form.
///
/// Fetched once at the start of a run and never mutated afterwards.
#[derive(Debug, Clone, Default)]
pub struct KnownUrlSet {
    urls: HashSet<String>,
}

impl KnownUrlSet {
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            urls: urls.into_iter().map(|u| normalize_url(u.as_ref())).collect(),
        }
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(&normalize_url(url))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}
