//! Yahoo Finance ticker news page scraper.
//!
//! Finds candidate article URLs on `{base}/quote/{ticker}/news?p={ticker}`.
//! Story blocks are located with an ordered selector list; the first
//! selector that matches anything wins.
//!
//! # URL Pattern
//!
//! Relative links are resolved against the base URL. Only links whose path
//! contains `/news/` are kept, e.g.
//! `https://finance.yahoo.com/news/tesla-q1-earnings-beat-123000123.html`.

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::error::TransportError;
use crate::models::{KnownUrlSet, normalize_url};
use crate::render::Renderer;
use crate::settings::DiscoverySettings;
use crate::transport::Transport;

fn sel(css: &str) -> Selector {
    Selector::parse(css).unwrap()
}

/// Primary story selector followed by its fallbacks.
static STORY_BLOCKS: Lazy<Vec<Selector>> = Lazy::new(|| {
    [
        "section[data-testid='storyitem']",
        "li.js-stream-content",
        "div.caas-content-wrapper article a",
        "div.caas-content-wrapper a",
    ]
    .iter()
    .map(|css| sel(css))
    .collect()
});

static LINK: Lazy<Selector> = Lazy::new(|| sel("a[href]"));

/// News listing page for `ticker`.
pub fn news_page_url(base: &str, ticker: &str) -> String {
    format!("{}/quote/{ticker}/news?p={ticker}", base.trim_end_matches('/'))
}

/// Story blocks from the first selector that matches, or `None` if none do.
fn story_blocks(doc: &Html) -> Option<Vec<ElementRef<'_>>> {
    STORY_BLOCKS.iter().find_map(|s| {
        let blocks: Vec<ElementRef<'_>> = doc.select(s).collect();
        (!blocks.is_empty()).then_some(blocks)
    })
}

/// The block itself when it is a link, else its first descendant link.
fn block_href<'a>(block: &ElementRef<'a>) -> Option<&'a str> {
    if block.value().name() == "a" {
        if let Some(href) = block.value().attr("href") {
            return Some(href);
        }
    }
    block.select(&LINK).next().and_then(|a| a.value().attr("href"))
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() {
        return None;
    }
    let url = base.join(href).ok()?;
    url.path().contains("/news/").then(|| normalize_url(url.as_str()))
}

/// Extract candidate article URLs from a listing page.
///
/// Returns `None` when no story block matched at all, so the caller can
/// decide whether a rendered retry is worthwhile. Known and repeated URLs
/// are skipped; the result holds at most `max` URLs.
pub fn parse_links(markup: &str, base: &Url, max: usize, known: &KnownUrlSet) -> Option<Vec<String>> {
    let doc = Html::parse_document(markup);
    let blocks = story_blocks(&doc)?;

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for block in &blocks {
        if links.len() >= max {
            break;
        }
        let Some(url) = block_href(block).and_then(|h| resolve(base, h)) else {
            continue;
        };
        if known.contains(&url) || !seen.insert(url.clone()) {
            continue;
        }
        links.push(url);
    }
    debug!(blocks = blocks.len(), links = links.len(), "Parsed story blocks");
    Some(links)
}

/// Discovers news links for a ticker, rendering the listing when the static
/// page has no story blocks.
pub struct Discovery<'a> {
    transport: &'a Transport,
    renderer: &'a dyn Renderer,
    settings: DiscoverySettings,
    render_enabled: bool,
}

impl<'a> Discovery<'a> {
    pub fn new(
        transport: &'a Transport,
        renderer: &'a dyn Renderer,
        settings: DiscoverySettings,
        render_enabled: bool,
    ) -> Self {
        Self {
            transport,
            renderer,
            settings,
            render_enabled,
        }
    }

    /// Index the news page for `ticker`.
    ///
    /// Fails only when the listing page itself cannot be fetched.
    #[instrument(level = "info", skip(self, known), fields(known = known.len()))]
    pub async fn index_articles(&self, ticker: &str, known: &KnownUrlSet) -> Result<Vec<String>, TransportError> {
        let page_url = news_page_url(&self.settings.base_url, ticker);
        let base = Url::parse(&self.settings.base_url).map_err(|source| TransportError::InvalidUrl {
            url: self.settings.base_url.clone(),
            source,
        })?;
        let max = self.settings.max_articles;

        let raw = self.transport.fetch(&page_url).await?;
        if let Some(links) = parse_links(&raw.text(), &base, max, known) {
            info!(count = links.len(), source = %page_url, "Indexed Yahoo article URLs");
            return Ok(links);
        }

        if !self.render_enabled {
            warn!(source = %page_url, "No story blocks in static page");
            return Ok(Vec::new());
        }

        debug!("No story blocks in static page; rendering");
        let identity = self.transport.next_identity();
        let links = match self.renderer.render(&page_url, identity).await {
            Ok(html) => parse_links(&html, &base, max, known).unwrap_or_default(),
            Err(e) => {
                warn!(error = %e, source = %page_url, "Rendering news page failed");
                Vec::new()
            }
        };
        info!(count = links.len(), source = %page_url, "Indexed Yahoo article URLs (rendered)");
        Ok(links)
    }
}
