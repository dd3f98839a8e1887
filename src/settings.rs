//! Run settings with defaults, optionally loaded from a YAML file.
//!
//! Every field has a default, so a settings file only needs the keys it
//! overrides:
//!
//! ```yaml
//! tickers: ["005930.KS", "TSLA"]
//! transport:
//!   timeout_ms: 20000
//! render:
//!   enabled: false
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument};

use crate::error::RunError;

/// Default user-agent pool for identity rotation.
pub const DEFAULT_USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:124.0) Gecko/20100101 Firefox/124.0",
    "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
];

pub const DEFAULT_ACCEPT_LANGUAGE: &str = "ko-KR,ko;q=0.9,en-US;q=0.8,en;q=0.7";

/// How the outbound user-agent is picked for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    /// Walk the pool in order and wrap.
    RoundRobin,
    /// Uniform random pick per request.
    Random,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub user_agents: Vec<String>,
    pub rotation: RotationMode,
    pub accept_language: String,
    pub timeout_ms: u64,
    /// Retries after the first attempt.
    pub total_retries: u32,
    pub backoff_factor_secs: f64,
    pub backoff_max_secs: f64,
    pub pool_max_idle_per_host: usize,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            user_agents: DEFAULT_USER_AGENTS.iter().map(|s| s.to_string()).collect(),
            rotation: RotationMode::RoundRobin,
            accept_language: DEFAULT_ACCEPT_LANGUAGE.to_string(),
            timeout_ms: 15_000,
            total_retries: 3,
            backoff_factor_secs: 0.8,
            backoff_max_secs: 120.0,
            pool_max_idle_per_host: 30,
        }
    }
}

impl TransportSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderSettings {
    pub enabled: bool,
    /// Hosts (or parent domains) whose pages need a rendering pass.
    pub domains: Vec<String>,
    /// Static bodies shorter than this many characters trigger rendering.
    pub min_body_chars: usize,
    pub page_load_timeout_secs: u64,
    pub settle_delay_ms: u64,
    pub window_width: u32,
    pub window_height: u32,
    /// Explicit Chromium binary; auto-detected when absent.
    pub chrome_path: Option<PathBuf>,
    pub consent_phrases: Vec<String>,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            domains: vec!["finance.yahoo.com".to_string()],
            min_body_chars: 120,
            page_load_timeout_secs: 180,
            settle_delay_ms: 1500,
            window_width: 1920,
            window_height: 1080,
            chrome_path: None,
            consent_phrases: ["Accept", "I agree", "동의", "허용"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquireSettings {
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
    /// Upper bound on items processed concurrently.
    pub workers: usize,
    /// Characters of text handed to the classifier.
    pub classify_max_chars: usize,
}

impl Default for AcquireSettings {
    fn default() -> Self {
        Self {
            delay_min_ms: 800,
            delay_max_ms: 1600,
            workers: 1,
            classify_max_chars: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    pub base_url: String,
    pub max_articles: usize,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            base_url: "https://finance.yahoo.com".to_string(),
            max_articles: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceSettings {
    pub chart_url: String,
    /// `5d`, `1mo`, ...
    pub period: String,
    pub interval: String,
}

impl Default for PriceSettings {
    fn default() -> Self {
        Self {
            chart_url: "https://query1.finance.yahoo.com/v8/finance/chart/".to_string(),
            period: "5d".to_string(),
            interval: "1d".to_string(),
        }
    }
}

/// Complete configuration for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tickers: Vec<String>,
    pub transport: TransportSettings,
    pub render: RenderSettings,
    pub acquire: AcquireSettings,
    pub discovery: DiscoverySettings,
    pub prices: PriceSettings,
}

impl Settings {
    /// Defaults with the stock ticker list.
    pub fn with_default_tickers() -> Self {
        Self {
            tickers: vec!["005930.KS".to_string(), "TSLA".to_string()],
            ..Self::default()
        }
    }

    /// Load a YAML settings file. Missing keys keep their defaults.
    #[instrument(level = "info", skip_all, fields(path = %path))]
    pub async fn load(path: &str) -> Result<Self, RunError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| RunError::Settings(format!("cannot read {path}: {e}")))?;
        let mut settings: Settings = serde_yaml::from_str(&raw)
            .map_err(|e| RunError::Settings(format!("cannot parse {path}: {e}")))?;
        if settings.tickers.is_empty() {
            settings.tickers = Self::with_default_tickers().tickers;
        }
        info!(tickers = ?settings.tickers, "Loaded settings file");
        Ok(settings)
    }

    /// Reject combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), RunError> {
        if self.transport.user_agents.is_empty() {
            return Err(RunError::Settings("transport.user_agents must not be empty".into()));
        }
        if self.acquire.delay_min_ms > self.acquire.delay_max_ms {
            return Err(RunError::Settings(
                "acquire.delay_min_ms must not exceed acquire.delay_max_ms".into(),
            ));
        }
        if self.acquire.workers == 0 {
            return Err(RunError::Settings("acquire.workers must be at least 1".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_pipeline_constants() {
        let s = Settings::with_default_tickers();
        assert_eq!(s.tickers, vec!["005930.KS", "TSLA"]);
        assert_eq!(s.transport.timeout_ms, 15_000);
        assert_eq!(s.transport.total_retries, 3);
        assert_eq!(s.transport.backoff_factor_secs, 0.8);
        assert_eq!(s.render.min_body_chars, 120);
        assert_eq!(s.render.page_load_timeout_secs, 180);
        assert_eq!(s.acquire.delay_min_ms, 800);
        assert_eq!(s.acquire.delay_max_ms, 1600);
        assert_eq!(s.acquire.classify_max_chars, 1000);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
tickers: ["AAPL"]
transport:
  timeout_ms: 20000
  rotation: random
render:
  enabled: false
"#;
        let s: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(s.tickers, vec!["AAPL"]);
        assert_eq!(s.transport.timeout_ms, 20_000);
        assert_eq!(s.transport.rotation, RotationMode::Random);
        assert_eq!(s.transport.total_retries, 3);
        assert!(!s.render.enabled);
        assert_eq!(s.render.domains, vec!["finance.yahoo.com"]);
    }

    #[test]
    fn test_validate_rejects_bad_delay_range() {
        let mut s = Settings::with_default_tickers();
        s.acquire.delay_min_ms = 2000;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_user_agents() {
        let mut s = Settings::with_default_tickers();
        s.transport.user_agents.clear();
        assert!(s.validate().is_err());
    }

    #[tokio::test]
    async fn test_load_missing_file() {
        let err = Settings::load("/nonexistent/stockmind.yaml").await.unwrap_err();
        assert!(matches!(err, RunError::Settings(_)));
    }
}
