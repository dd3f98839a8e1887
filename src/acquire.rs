//! Acquisition orchestrator: candidate URLs in, one [`ArticleRecord`] per URL out.
//!
//! Each item walks the same path:
//!
//! ```text
//! PENDING ─▶ FETCHED ─▶ EXTRACTED ─┬─────────────────────▶ DONE
//!    │                             └─▶ RENDER_FALLBACK ──▶ DONE
//!    └──(transport error / cancel)──────────────────────▶ FAILED
//! ```
//!
//! Items are isolated: a failure becomes a `Failed` record and the batch
//! keeps going. The pool is bounded and order-preserving, so the output
//! lines up index for index with the input.

use futures::stream::{self, StreamExt};
use rand::{Rng, rng};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::error::PipelineError;
use crate::extract::{extract, today_canonical};
use crate::models::{ArticleRecord, ExtractedContent, ItemStatus, KnownUrlSet, Sentiment};
use crate::render::{RenderPolicy, Renderer, promote};
use crate::sentiment::Classifier;
use crate::settings::AcquireSettings;
use crate::transport::Transport;
use crate::utils::{truncate_chars, truncate_for_log};

/// Runs the per-item state machine over a batch of candidate URLs.
///
/// Borrows the run-wide collaborators; nothing here is mutated during a batch.
pub struct Acquirer<'a> {
    transport: &'a Transport,
    renderer: &'a dyn Renderer,
    classifier: &'a Classifier,
    policy: RenderPolicy,
    settings: AcquireSettings,
}

impl<'a> Acquirer<'a> {
    pub fn new(
        transport: &'a Transport,
        renderer: &'a dyn Renderer,
        classifier: &'a Classifier,
        policy: RenderPolicy,
        settings: AcquireSettings,
    ) -> Self {
        Self {
            transport,
            renderer,
            classifier,
            policy,
            settings,
        }
    }

    /// Acquire every URL in `urls` for `ticker`.
    ///
    /// Always returns exactly `urls.len()` records in input order. URLs in
    /// `known` are emitted as skipped without a fetch. Once `cancel` fires,
    /// every unfinished item is emitted as `Failed(Cancelled)`.
    #[instrument(level = "info", skip_all, fields(%ticker, count = urls.len()))]
    pub async fn acquire(
        &self,
        ticker: &str,
        urls: &[String],
        known: &KnownUrlSet,
        cancel: &CancellationToken,
    ) -> Vec<ArticleRecord> {
        let t0 = Instant::now();
        let workers = self.settings.workers.max(1);

        let mut records: Vec<ArticleRecord> = stream::iter(urls.iter().enumerate())
            .map(|(idx, url)| self.process(ticker, idx, url, known, cancel))
            .buffered(workers)
            .collect()
            .await;

        self.classify(&mut records);

        let done = records.iter().filter(|r| r.is_persistable()).count();
        let failed = records.iter().filter(|r| r.is_failed()).count();
        let skipped = records.iter().filter(|r| r.is_skipped()).count();
        info!(
            done,
            failed,
            skipped,
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Acquisition batch complete"
        );
        records
    }

    async fn process(
        &self,
        ticker: &str,
        idx: usize,
        url: &str,
        known: &KnownUrlSet,
        cancel: &CancellationToken,
    ) -> ArticleRecord {
        if known.contains(url) {
            debug!(%url, "Already stored; skipping");
            return ArticleRecord::empty(ticker, url, today_canonical(), ItemStatus::Skipped);
        }
        if cancel.is_cancelled() {
            return cancelled(ticker, url);
        }

        let work = async {
            if idx > 0 {
                self.throttle().await;
            }
            self.acquire_one(ticker, url).await
        };

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            r = work => r,
        };

        match result {
            Ok(record) => record,
            Err(err) => {
                match &err {
                    PipelineError::Cancelled => debug!(%url, "Item abandoned by cancellation"),
                    PipelineError::Transport(e) => warn!(%url, error = %e, "Fetch failed; item dropped"),
                    other => warn!(%url, error = %other, "Item failed"),
                }
                ArticleRecord::empty(ticker, url, today_canonical(), ItemStatus::Failed(err))
            }
        }
    }

    /// Fetch, extract and, when the static pass is thin, render.
    async fn acquire_one(&self, ticker: &str, url: &str) -> Result<ArticleRecord, PipelineError> {
        let raw = self.transport.fetch(url).await?;
        if let Some(ct) = raw.content_type.as_deref() {
            if !is_markup(ct) {
                return Err(PipelineError::Extraction(format!("unsupported content type {ct}")));
            }
        }
        let markup = raw.text();
        let static_pass = extract(&markup, today_canonical());

        let content = if self.policy.should_render(url, &static_pass.body) {
            self.render_fallback(url, static_pass).await
        } else {
            static_pass
        };

        debug!(
            %url,
            title = %truncate_for_log(&content.title, 80),
            body_chars = content.body.chars().count(),
            tier = ?content.tier,
            retrieved_at = %raw.retrieved_at,
            "Item extracted"
        );

        Ok(ArticleRecord {
            ticker: ticker.to_string(),
            url: url.to_string(),
            title: content.title,
            content: content.body,
            published_date: content.published_date,
            sentiment: Sentiment::NEUTRAL,
            status: ItemStatus::Done(content.tier),
        })
    }

    /// Render `url` and merge the result. Render failures keep the static pass.
    async fn render_fallback(&self, url: &str, static_pass: ExtractedContent) -> ExtractedContent {
        let identity = self.transport.next_identity();
        match self.renderer.render(url, identity).await {
            Ok(html) => promote(static_pass, extract(&html, today_canonical())),
            Err(e) => {
                warn!(%url, error = %PipelineError::Render(e), "Render fallback failed; keeping static result");
                static_pass
            }
        }
    }

    async fn throttle(&self) {
        let lo = self.settings.delay_min_ms;
        let hi = self.settings.delay_max_ms.max(lo);
        let ms = if hi > lo { rng().random_range(lo..=hi) } else { lo };
        if ms > 0 {
            sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Text handed to the classifier: body, else title, capped in characters.
    fn classification_text<'r>(&self, record: &'r ArticleRecord) -> &'r str {
        let text = if record.content.trim().is_empty() {
            &record.title
        } else {
            &record.content
        };
        truncate_chars(text, self.settings.classify_max_chars)
    }

    /// Score every completed item. Failed and skipped items stay neutral.
    fn classify(&self, records: &mut [ArticleRecord]) {
        let texts: Vec<&str> = records
            .iter()
            .filter(|r| r.is_persistable())
            .map(|r| self.classification_text(r))
            .collect();
        let (scores, _) = self.classifier.classify_batch(texts);
        for (record, sentiment) in records.iter_mut().filter(|r| r.is_persistable()).zip(scores) {
            record.sentiment = sentiment;
        }
    }
}

/// Content types the extractor can make sense of.
fn is_markup(content_type: &str) -> bool {
    let mime = content_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    mime.starts_with("text/") || mime.contains("html") || mime.contains("xml")
}

fn cancelled(ticker: &str, url: &str) -> ArticleRecord {
    ArticleRecord::empty(
        ticker,
        url,
        today_canonical(),
        ItemStatus::Failed(PipelineError::Cancelled),
    )
}
