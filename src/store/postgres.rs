//! PostgreSQL store.
//!
//! Tables:
//!
//! ```text
//! stock_prices  (ticker, date) UNIQUE  -- ON CONFLICT DO UPDATE
//! news_articles url UNIQUE             -- ON CONFLICT DO NOTHING
//! ```

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{info, instrument};

use super::{Store, write_set};
use crate::error::StoreError;
use crate::models::{ArticleRecord, KnownUrlSet, PriceRecord};

const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS stock_prices (
        id               SERIAL PRIMARY KEY,
        ticker           VARCHAR(20)  NOT NULL,
        date             DATE         NOT NULL,
        open             DOUBLE PRECISION NOT NULL,
        close            DOUBLE PRECISION NOT NULL,
        volume           BIGINT       NOT NULL,
        price_change     DOUBLE PRECISION NOT NULL,
        price_change_pct DOUBLE PRECISION NOT NULL,
        direction        VARCHAR(10)  NOT NULL,
        created_at       TIMESTAMP    DEFAULT now(),
        CONSTRAINT uq_stock_price_ticker_date UNIQUE (ticker, date)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS news_articles (
        id               SERIAL PRIMARY KEY,
        ticker           VARCHAR(20)   NOT NULL,
        date             DATE          NOT NULL,
        url              VARCHAR(2048) NOT NULL UNIQUE,
        title            VARCHAR(1024),
        content          TEXT,
        sentiment_label  VARCHAR(20),
        sentiment_score  DOUBLE PRECISION,
        created_at       TIMESTAMP     DEFAULT now()
    )"#,
];

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect with a small pool. Failure here is run-fatal.
    #[instrument(level = "info", skip_all)]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(10))
            .connect(database_url)
            .await?;
        info!("Connected to database");
        Ok(Self { pool })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn init(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        info!("Database tables ready");
        Ok(())
    }

    async fn known_urls(&self, ticker: &str) -> Result<KnownUrlSet, StoreError> {
        let urls: Vec<String> = sqlx::query_scalar("SELECT url FROM news_articles WHERE ticker = $1")
            .bind(ticker)
            .fetch_all(&self.pool)
            .await?;
        Ok(KnownUrlSet::new(urls))
    }

    #[instrument(level = "info", skip_all, fields(rows = prices.len()))]
    async fn upsert_prices(&self, prices: &[PriceRecord]) -> Result<u64, StoreError> {
        if prices.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut written = 0u64;
        for p in prices {
            let result = sqlx::query(
                r#"INSERT INTO stock_prices
                       (ticker, date, open, close, volume, price_change, price_change_pct, direction)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                   ON CONFLICT (ticker, date) DO UPDATE SET
                       open             = EXCLUDED.open,
                       close            = EXCLUDED.close,
                       volume           = EXCLUDED.volume,
                       price_change     = EXCLUDED.price_change,
                       price_change_pct = EXCLUDED.price_change_pct,
                       direction        = EXCLUDED.direction"#,
            )
            .bind(&p.ticker)
            .bind(p.date)
            .bind(p.open)
            .bind(p.close)
            .bind(p.volume)
            .bind(p.change)
            .bind(p.change_pct)
            .bind(p.direction.as_str())
            .execute(&mut *tx)
            .await?;
            written += result.rows_affected();
        }
        tx.commit().await?;
        info!(written, "Price upsert complete");
        Ok(written)
    }

    #[instrument(level = "info", skip_all, fields(candidates = articles.len()))]
    async fn insert_articles(&self, articles: &[ArticleRecord]) -> Result<u64, StoreError> {
        let rows = write_set(articles);
        if rows.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;
        for row in &rows {
            let result = sqlx::query(
                r#"INSERT INTO news_articles
                       (ticker, date, url, title, content, sentiment_label, sentiment_score)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)
                   ON CONFLICT (url) DO NOTHING"#,
            )
            .bind(row.ticker)
            .bind(row.published_date)
            .bind(&row.url)
            .bind(&row.title)
            .bind(row.content)
            .bind(row.sentiment_label)
            .bind(row.sentiment_score)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;
        info!(inserted, total = rows.len(), "Article insert complete");
        Ok(inserted)
    }
}
