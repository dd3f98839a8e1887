//! In-memory store used by tests and `--dry-run`.
//!
//! Implements the same conflict rules as the database: insert-skip on article
//! URL, full replace on price `(ticker, date)`.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::info;

use super::{Store, write_set};
use crate::error::StoreError;
use crate::models::{ArticleRecord, KnownUrlSet, PriceRecord, Sentiment, SentimentLabel};

/// A stored article row.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredArticle {
    pub ticker: String,
    pub url: String,
    pub title: String,
    pub content: String,
    pub published_date: NaiveDate,
    pub sentiment: Sentiment,
}

#[derive(Debug, Default)]
struct Tables {
    articles: HashMap<String, StoredArticle>,
    prices: BTreeMap<(String, NaiveDate), PriceRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }

    pub fn article_count(&self) -> usize {
        self.lock().map(|t| t.articles.len()).unwrap_or(0)
    }

    pub fn article(&self, url: &str) -> Option<StoredArticle> {
        self.lock().ok()?.articles.get(url).cloned()
    }

    pub fn price_count(&self) -> usize {
        self.lock().map(|t| t.prices.len()).unwrap_or(0)
    }

    pub fn price(&self, ticker: &str, date: NaiveDate) -> Option<PriceRecord> {
        self.lock().ok()?.prices.get(&(ticker.to_string(), date)).cloned()
    }
}

fn parse_label(label: &str) -> SentimentLabel {
    match label {
        "positive" => SentimentLabel::Positive,
        "negative" => SentimentLabel::Negative,
        _ => SentimentLabel::Neutral,
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn init(&self) -> Result<(), StoreError> {
        self.lock().map(|_| ())
    }

    async fn known_urls(&self, ticker: &str) -> Result<KnownUrlSet, StoreError> {
        let tables = self.lock()?;
        Ok(KnownUrlSet::new(
            tables
                .articles
                .values()
                .filter(|a| a.ticker == ticker)
                .map(|a| a.url.as_str()),
        ))
    }

    async fn upsert_prices(&self, prices: &[PriceRecord]) -> Result<u64, StoreError> {
        let mut tables = self.lock()?;
        for p in prices {
            tables.prices.insert((p.ticker.clone(), p.date), p.clone());
        }
        info!(rows = prices.len(), "Price upsert complete");
        Ok(prices.len() as u64)
    }

    async fn insert_articles(&self, articles: &[ArticleRecord]) -> Result<u64, StoreError> {
        let rows = write_set(articles);
        let mut tables = self.lock()?;
        let mut inserted = 0u64;
        for row in rows.iter() {
            if tables.articles.contains_key(&row.url) {
                continue;
            }
            tables.articles.insert(
                row.url.clone(),
                StoredArticle {
                    ticker: row.ticker.to_string(),
                    url: row.url.clone(),
                    title: row.title.clone(),
                    content: row.content.to_string(),
                    published_date: row.published_date,
                    sentiment: Sentiment {
                        label: parse_label(row.sentiment_label),
                        score: row.sentiment_score,
                    },
                },
            );
            inserted += 1;
        }
        info!(inserted, candidates = rows.len(), "Article insert complete");
        Ok(inserted)
    }
}
