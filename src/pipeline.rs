//! Run driver: one pass over every configured ticker.
//!
//! Per ticker, in order:
//!
//! 1. fetch daily prices and upsert them
//! 2. load the known URL set from the store
//! 3. discover candidate links and drop known ones
//! 4. acquire, extract and classify each candidate
//! 5. insert the persistable records
//!
//! Price and discovery failures are logged and the ticker carries on. A store
//! failure aborts the run, and so does a first ticker whose price and news
//! sources are both unreachable, since nothing has been attempted yet.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::acquire::Acquirer;
use crate::error::{RunError, TransportError};
use crate::prices::fetch_prices;
use crate::render::{RenderPolicy, Renderer};
use crate::scrapers::yahoo::Discovery;
use crate::sentiment::Classifier;
use crate::settings::Settings;
use crate::store::{Store, filter_known};
use crate::transport::Transport;

/// A candidate that could not be acquired.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemFailure {
    pub url: String,
    pub error: String,
}

/// Counts for one ticker.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickerReport {
    pub ticker: String,
    pub discovered: usize,
    pub processed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub inserted: u64,
    pub prices_upserted: u64,
    pub failures: Vec<ItemFailure>,
}

impl TickerReport {
    fn new(ticker: &str) -> Self {
        Self {
            ticker: ticker.to_string(),
            ..Self::default()
        }
    }
}

/// Summary of a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub cancelled: bool,
    pub tickers: Vec<TickerReport>,
}

impl RunReport {
    pub fn total_inserted(&self) -> u64 {
        self.tickers.iter().map(|t| t.inserted).sum()
    }

    pub fn total_failed(&self) -> usize {
        self.tickers.iter().map(|t| t.failed).sum()
    }
}

/// Everything one run needs, borrowed from `main`.
pub struct Pipeline<'a> {
    pub transport: &'a Transport,
    pub renderer: &'a dyn Renderer,
    pub classifier: &'a Classifier,
    pub store: &'a dyn Store,
    pub settings: &'a Settings,
}

impl Pipeline<'_> {
    /// Process every ticker sequentially.
    #[instrument(level = "info", skip_all, fields(tickers = self.settings.tickers.len()))]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport, RunError> {
        let started_at = Utc::now();
        self.store.init().await?;

        let mut tickers = Vec::with_capacity(self.settings.tickers.len());
        for ticker in &self.settings.tickers {
            if cancel.is_cancelled() {
                warn!(%ticker, "Run cancelled; remaining tickers not processed");
                break;
            }
            let (report, outage) = self.run_ticker(ticker, cancel).await?;
            if let Some(e) = outage {
                if tickers.is_empty() {
                    error!(%ticker, error = %e, "Sources unreachable before any item was attempted");
                    return Err(RunError::Transport(e));
                }
            }
            tickers.push(report);
        }

        let report = RunReport {
            started_at,
            finished_at: Utc::now(),
            cancelled: cancel.is_cancelled(),
            tickers,
        };
        info!(
            inserted = report.total_inserted(),
            failed = report.total_failed(),
            cancelled = report.cancelled,
            "Run complete"
        );
        Ok(report)
    }

    /// Process one ticker. The second value is set when neither the price
    /// nor the news source could be reached.
    #[instrument(level = "info", skip(self, cancel))]
    async fn run_ticker(
        &self,
        ticker: &str,
        cancel: &CancellationToken,
    ) -> Result<(TickerReport, Option<TransportError>), RunError> {
        let t0 = Instant::now();
        let mut report = TickerReport::new(ticker);
        let mut prices_unreachable = false;

        match fetch_prices(self.transport, &self.settings.prices, ticker).await {
            Ok(prices) if prices.is_empty() => warn!("No price data; skipping price upsert"),
            Ok(prices) => report.prices_upserted = self.store.upsert_prices(&prices).await?,
            Err(e) => {
                warn!(error = %e, "Price fetch failed; continuing with news");
                prices_unreachable = e.is_unreachable();
            }
        }

        let known = self.store.known_urls(ticker).await?;
        info!(known = known.len(), "Loaded stored URLs");

        let discovery = Discovery::new(
            self.transport,
            self.renderer,
            self.settings.discovery.clone(),
            self.settings.render.enabled,
        );
        let discovered = match discovery.index_articles(ticker, &known).await {
            Ok(links) => links,
            Err(e) if prices_unreachable && e.is_unreachable() => {
                warn!(error = %e, "Link discovery failed; sources unreachable");
                return Ok((report, Some(e)));
            }
            Err(e) => {
                warn!(error = %e, "Link discovery failed");
                Vec::new()
            }
        };
        let candidates = filter_known(discovered, &known);
        report.discovered = candidates.len();
        if candidates.is_empty() {
            warn!("No new links; nothing to acquire");
            return Ok((report, None));
        }

        let acquirer = Acquirer::new(
            self.transport,
            self.renderer,
            self.classifier,
            RenderPolicy::from_settings(&self.settings.render),
            self.settings.acquire.clone(),
        );
        let records = acquirer.acquire(ticker, &candidates, &known, cancel).await;

        for record in &records {
            if record.is_persistable() {
                report.processed += 1;
            } else if record.is_skipped() {
                report.skipped += 1;
            } else if let Some(err) = record.error() {
                report.failed += 1;
                report.failures.push(ItemFailure {
                    url: record.url.clone(),
                    error: err.to_string(),
                });
            }
        }

        report.inserted = self.store.insert_articles(&records).await?;
        info!(
            discovered = report.discovered,
            processed = report.processed,
            failed = report.failed,
            inserted = report.inserted,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Ticker complete"
        );
        Ok((report, None))
    }
}
