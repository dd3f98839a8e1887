//! Error types for every stage of the collection pipeline.
//!
//! Failures are contained at the smallest boundary that can absorb them:
//!
//! | Error | Raised by | Effect on the run |
//! |-------|-----------|-------------------|
//! | [`TransportError`] | [`crate::transport`] | item marked failed after retries |
//! | [`RenderError`] | [`crate::render`] | logged, static extraction kept |
//! | [`ClassificationError`] | [`crate::sentiment`] | neutral / 0.0 recorded |
//! | [`PriceError`] | [`crate::prices`] | logged, ticker continues without prices |
//! | [`StoreError`] | [`crate::store`] | run aborted, retried next invocation |
//!
//! [`PipelineError`] is the closed set of per-item failures the orchestrator
//! matches on; [`RunError`] is the only thing that stops a run. A
//! [`TransportError`] becomes run-fatal only when the first ticker cannot
//! reach either its price or its news source.

use thiserror::Error;

/// Failure of a single HTTP fetch, after the retry policy has been applied.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("unexpected response status {status} at {url}")]
    Status { status: u16, url: String },

    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout { url: String },

    /// The host name could not be resolved.
    #[error("DNS resolution failed for {url}: {message}")]
    Dns { url: String, message: String },

    /// The TLS handshake or certificate validation failed.
    #[error("TLS failure for {url}: {message}")]
    Tls { url: String, message: String },

    /// The connection could not be established or was reset.
    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    /// Any other request-level failure (body decode, redirect loop, ...).
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The candidate string is not a fetchable URL.
    #[error("invalid URL {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// The user-agent pool has no entries.
    #[error("user-agent pool is empty")]
    NoIdentity,

    /// The HTTP client itself could not be built.
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl TransportError {
    /// The remote host could not be reached at all, as opposed to answering badly.
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            TransportError::Timeout { .. } | TransportError::Dns { .. } | TransportError::Connect { .. }
        )
    }
}

/// Failure of the headless-browser fallback.
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to launch browser: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("page load for {url} exceeded {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    #[error("script evaluation failed: {0}")]
    Script(String),

    #[error("rendering is disabled")]
    Disabled,
}

/// The scoring function could not produce a usable polarity.
#[derive(Debug, Error)]
pub enum ClassificationError {
    #[error("scorer produced a non-finite score: {0}")]
    NonFinite(f64),

    #[error("scorer failed: {0}")]
    Scorer(String),
}

/// Failure talking to the persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Daily price fetch failure. Logged by the run driver; never run-fatal.
#[derive(Debug, Error)]
pub enum PriceError {
    #[error("price request failed: {0}")]
    Transport(#[from] TransportError),

    #[error("price response not decodable: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("chart api error {code}: {description}")]
    Api { code: String, description: String },

    #[error("chart response has no result")]
    Empty,
}

impl PriceError {
    pub fn is_unreachable(&self) -> bool {
        matches!(self, PriceError::Transport(e) if e.is_unreachable())
    }
}

/// Per-item failure recorded on an [`crate::models::ArticleRecord`].
///
/// The orchestrator matches these explicitly: transport failures fail the
/// item, render failures degrade to the static result, classification
/// failures degrade to a neutral score.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("transport: {0}")]
    Transport(#[from] TransportError),

    #[error("render: {0}")]
    Render(#[from] RenderError),

    #[error("extraction: {0}")]
    Extraction(String),

    #[error("classification: {0}")]
    Classification(#[from] ClassificationError),

    #[error("run cancelled before the item completed")]
    Cancelled,
}

/// Run-level failure. The scheduler retries the whole run on the next tick.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("transport unavailable: {0}")]
    Transport(#[from] TransportError),

    #[error("invalid settings: {0}")]
    Settings(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_error_message() {
        let e = TransportError::Status {
            status: 503,
            url: "https://example.com/a".to_string(),
        };
        assert_eq!(
            e.to_string(),
            "unexpected response status 503 at https://example.com/a"
        );
    }

    #[test]
    fn test_pipeline_error_wraps_transport() {
        let e: PipelineError = TransportError::Timeout {
            url: "https://example.com".to_string(),
        }
        .into();
        assert!(matches!(e, PipelineError::Transport(TransportError::Timeout { .. })));
        assert!(e.to_string().starts_with("transport:"));
    }

    #[test]
    fn test_unreachable_covers_network_failures_only() {
        let url = "https://example.com".to_string();
        assert!(TransportError::Timeout { url: url.clone() }.is_unreachable());
        assert!(TransportError::Connect { url: url.clone(), message: "refused".into() }.is_unreachable());
        assert!(!TransportError::Status { status: 503, url }.is_unreachable());
        assert!(!PriceError::Empty.is_unreachable());
    }

    #[test]
    fn test_run_error_from_store() {
        let e: RunError = StoreError::Unavailable("down".to_string()).into();
        assert!(e.to_string().contains("down"));
    }
}
