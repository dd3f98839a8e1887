//! # stockmind
//!
//! A batch collector that ingests daily stock prices and related news
//! articles for a small set of tickers, tags each article with a sentiment
//! label, and persists both to PostgreSQL.
//!
//! ## Usage
//!
//! ```sh
//! DATABASE_URL=postgres://localhost/stocks stockmind --tickers TSLA,005930.KS
//! ```
//!
//! ## Architecture
//!
//! Each run walks the tickers in order:
//! 1. **Prices**: fetch the recent daily bars and upsert them
//! 2. **Discovery**: index the ticker's news page, dropping already stored URLs
//! 3. **Acquisition**: fetch, extract (rendering thin pages) and classify
//! 4. **Persistence**: insert new articles, skipping URL conflicts
//!
//! Individual article failures never stop the run. A store failure does, and
//! so does a first ticker whose price and news sources are both unreachable.

use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod acquire;
mod cli;
mod error;
mod extract;
mod models;
mod outputs;
mod pipeline;
mod prices;
mod render;
mod scrapers;
mod sentiment;
mod settings;
mod store;
mod transport;
mod utils;

use cli::Cli;
use error::RunError;
use outputs::json;
use pipeline::Pipeline;
use render::chromium::ChromiumRenderer;
use render::{NoopRenderer, Renderer};
use sentiment::Classifier;
use settings::Settings;
use store::Store;
use store::memory::MemoryStore;
use store::postgres::PgStore;
use transport::Transport;
use utils::ensure_writable_dir;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!(version = env!("CARGO_PKG_VERSION"), "stockmind starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let mut settings = match &args.config {
        Some(path) => Settings::load(path).await?,
        None => Settings::with_default_tickers(),
    };
    args.apply(&mut settings);
    settings.validate()?;
    info!(tickers = ?settings.tickers, render = settings.render.enabled, "Settings ready");

    // Early check: report dir must be writable before any work is done
    if let Some(dir) = &args.report_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "Report directory is not writable");
            return Err(e);
        }
    }

    let transport = Transport::new(&settings.transport).map_err(RunError::from)?;
    let classifier = Classifier::default();
    let renderer: Box<dyn Renderer> = if settings.render.enabled {
        Box::new(ChromiumRenderer::new(settings.render.clone()))
    } else {
        Box::new(NoopRenderer)
    };
    let store: Box<dyn Store> = if args.dry_run {
        info!("Dry run; results kept in memory");
        Box::new(MemoryStore::new())
    } else {
        let url = args
            .database_url
            .as_deref()
            .ok_or_else(|| RunError::Settings("DATABASE_URL is required unless --dry-run is set".into()))?;
        Box::new(PgStore::connect(url).await.map_err(RunError::from)?)
    };

    let cancel = CancellationToken::new();
    if let Some(secs) = args.run_timeout_secs {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(secs)).await;
            warn!(timeout_secs = secs, "Run timeout reached; cancelling");
            token.cancel();
        });
    }
    {
        let token = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received; cancelling");
                token.cancel();
            }
        });
    }

    let pipeline = Pipeline {
        transport: &transport,
        renderer: renderer.as_ref(),
        classifier: &classifier,
        store: store.as_ref(),
        settings: &settings,
    };
    let report = match pipeline.run(&cancel).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Run aborted");
            return Err(e.into());
        }
    };

    for t in &report.tickers {
        info!(
            ticker = %t.ticker,
            discovered = t.discovered,
            processed = t.processed,
            failed = t.failed,
            skipped = t.skipped,
            inserted = t.inserted,
            prices = t.prices_upserted,
            "Ticker summary"
        );
    }

    if let Some(dir) = &args.report_dir {
        json::write_report(&report, dir).await?;
    }

    let elapsed = start_time.elapsed();
    info!(
        elapsed_secs = elapsed.as_secs_f64(),
        inserted = report.total_inserted(),
        cancelled = report.cancelled,
        "stockmind finished"
    );

    Ok(())
}
