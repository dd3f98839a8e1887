//! Deduplication and the storage boundary.
//!
//! Two filters keep duplicates out:
//!
//! 1. **Pre-fetch** ([`filter_known`]): candidate URLs already in storage are
//!    dropped before any fetch. This only saves work; the known set may be
//!    stale.
//! 2. **Write time** ([`Store::insert_articles`]): the store enforces URL
//!    uniqueness itself. A conflicting article insert is skipped, never an
//!    error and never an update.
//!
//! Prices are the opposite: a conflicting `(ticker, date)` row is fully
//! replaced, because a day's bar can be corrected between runs.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use itertools::Itertools;

use crate::error::StoreError;
use crate::models::{ArticleRecord, KnownUrlSet, PriceRecord, normalize_url};

/// Maximum stored title length, in characters.
pub const MAX_TITLE_CHARS: usize = 1024;

/// Persistence contract consumed by the pipeline.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create tables if they do not exist.
    async fn init(&self) -> Result<(), StoreError>;

    /// URLs already stored for `ticker`.
    async fn known_urls(&self, ticker: &str) -> Result<KnownUrlSet, StoreError>;

    /// Insert or fully replace prices keyed on `(ticker, date)`. Returns rows written.
    async fn upsert_prices(&self, prices: &[PriceRecord]) -> Result<u64, StoreError>;

    /// Insert persistable articles, skipping URL conflicts. Returns rows inserted.
    async fn insert_articles(&self, articles: &[ArticleRecord]) -> Result<u64, StoreError>;
}

/// Drop candidates that are already stored or repeated, keeping first-seen order.
pub fn filter_known<I, S>(candidates: I, known: &KnownUrlSet) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    candidates
        .into_iter()
        .map(|c| normalize_url(c.as_ref()))
        .filter(|u| !u.is_empty() && !known.contains(u))
        .unique()
        .collect()
}

/// Row ready for the article table.
#[derive(Debug, Clone, PartialEq)]
pub struct ArticleRow<'a> {
    pub ticker: &'a str,
    pub url: String,
    pub title: String,
    pub content: &'a str,
    pub published_date: chrono::NaiveDate,
    pub sentiment_label: &'static str,
    pub sentiment_score: f64,
}

/// Persistable records only, URL-normalized, deduplicated within the batch.
///
/// Failed and skipped items never reach storage.
pub fn write_set(articles: &[ArticleRecord]) -> Vec<ArticleRow<'_>> {
    articles
        .iter()
        .filter(|a| a.is_persistable() && !a.url.trim().is_empty())
        .map(|a| ArticleRow {
            ticker: &a.ticker,
            url: normalize_url(&a.url),
            title: a.title.chars().take(MAX_TITLE_CHARS).collect(),
            content: &a.content,
            published_date: a.published_date,
            sentiment_label: a.sentiment.label.as_str(),
            sentiment_score: a.sentiment.score,
        })
        .unique_by(|row| row.url.clone())
        .collect()
}
