//! Command-line interface definitions for stockmind.
//!
//! Flags override the YAML settings file, which overrides built-in defaults.
//! Most flags can also come from environment variables.

use clap::Parser;

use crate::settings::{RotationMode, Settings};

/// Collect daily prices and sentiment-tagged news for a set of tickers.
///
/// # Examples
///
/// ```sh
/// # Full run against PostgreSQL
/// DATABASE_URL=postgres://localhost/stocks stockmind
///
/// # Try it without a database or a browser
/// stockmind --dry-run --no-render --tickers TSLA
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Optional path to a settings YAML file
    #[arg(short, long, env = "STOCKMIND_CONFIG")]
    pub config: Option<String>,

    /// PostgreSQL connection string
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Keep results in memory instead of writing to the database
    #[arg(long)]
    pub dry_run: bool,

    /// Never launch a browser; static extraction only
    #[arg(long)]
    pub no_render: bool,

    /// Tickers to process, overriding the settings file
    #[arg(short, long, value_delimiter = ',')]
    pub tickers: Vec<String>,

    /// User-agent rotation strategy
    #[arg(long, value_enum)]
    pub rotation: Option<RotationMode>,

    /// Items acquired concurrently per ticker
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Cancel the run after this many seconds
    #[arg(long, env = "STOCKMIND_RUN_TIMEOUT_SECS")]
    pub run_timeout_secs: Option<u64>,

    /// Directory for the JSON run report
    #[arg(short = 'r', long, env = "STOCKMIND_REPORT_DIR")]
    pub report_dir: Option<String>,
}

impl Cli {
    /// Fold command-line overrides into `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if !self.tickers.is_empty() {
            settings.tickers = self.tickers.clone();
        }
        if let Some(rotation) = self.rotation {
            settings.transport.rotation = rotation;
        }
        if let Some(workers) = self.workers {
            settings.acquire.workers = workers;
        }
        if self.no_render {
            settings.render.enabled = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::parse_from([
            "stockmind",
            "--config",
            "./stockmind.yaml",
            "--database-url",
            "postgres://localhost/stocks",
            "--tickers",
            "TSLA,005930.KS",
        ]);

        assert_eq!(cli.config.as_deref(), Some("./stockmind.yaml"));
        assert_eq!(cli.database_url.as_deref(), Some("postgres://localhost/stocks"));
        assert_eq!(cli.tickers, vec!["TSLA", "005930.KS"]);
        assert!(!cli.dry_run);
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::parse_from(["stockmind", "-c", "/tmp/s.yaml", "-w", "4", "-r", "/tmp/reports"]);

        assert_eq!(cli.config.as_deref(), Some("/tmp/s.yaml"));
        assert_eq!(cli.workers, Some(4));
        assert_eq!(cli.report_dir.as_deref(), Some("/tmp/reports"));
    }

    #[test]
    fn test_apply_overrides_settings() {
        let cli = Cli::parse_from([
            "stockmind",
            "--dry-run",
            "--no-render",
            "--rotation",
            "random",
            "--workers",
            "3",
            "--tickers",
            "AAPL",
        ]);
        let mut settings = Settings::with_default_tickers();
        cli.apply(&mut settings);

        assert!(cli.dry_run);
        assert_eq!(settings.tickers, vec!["AAPL"]);
        assert_eq!(settings.transport.rotation, RotationMode::Random);
        assert_eq!(settings.acquire.workers, 3);
        assert!(!settings.render.enabled);
    }

    #[test]
    fn test_apply_without_flags_keeps_settings() {
        let cli = Cli::parse_from(["stockmind"]);
        let mut settings = Settings::with_default_tickers();
        cli.apply(&mut settings);
        assert_eq!(settings.tickers, vec!["005930.KS", "TSLA"]);
        assert!(settings.render.enabled);
    }
}
