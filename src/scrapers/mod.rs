//! News link discovery.
//!
//! A scraper turns a ticker into candidate article URLs. It does not fetch
//! article content; that is the acquisition orchestrator's job.
//!
//! # Supported Sources
//!
//! | Source | Module | Method | Notes |
//! |--------|--------|--------|-------|
//! | Yahoo Finance | [`yahoo`] | HTML scraping | Ticker news page, rendered when script-only |

pub mod yahoo;
