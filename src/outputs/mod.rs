//! Run output files.
//!
//! - [`json`]: per-run report with per-ticker counts and item failures

pub mod json;
