//! HTTP transport with identity rotation and exponential backoff.
//!
//! One [`Transport`] is built per run and shared by every fetch in it. It
//! owns the pooled `reqwest` client, the user-agent rotation cursor and the
//! retry policy.
//!
//! # Retry Strategy
//!
//! - Only idempotent methods (GET, HEAD, OPTIONS) are retried
//! - Retryable: 429, 500, 502, 503, 504, timeouts, connection failures
//! - Not retryable: other 4xx, DNS and TLS failures
//! - Delay before retry `n` is `factor * 2^(n-1)`, capped; a `Retry-After`
//!   header wins when present
//!
//! ```text
//! attempt 1 ──fail──▶ sleep 0.8s ──▶ attempt 2 ──fail──▶ sleep 1.6s ──▶ ...
//! ```

use chrono::Utc;
use rand::{Rng, rng};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, RETRY_AFTER, USER_AGENT};
use reqwest::{Method, StatusCode};
use std::error::Error as StdError;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};
use url::Url;

use crate::error::TransportError;
use crate::models::RawFetchResult;
use crate::settings::{RotationMode, TransportSettings};

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

/// Status codes that are worth another attempt.
pub const RETRYABLE_STATUS: [u16; 5] = [429, 500, 502, 503, 504];

/// Rotating pool of client identities (user-agent strings).
///
/// The round-robin cursor is atomic, so one rotation can be shared by
/// concurrent fetches without handing out a torn index.
#[derive(Debug)]
pub struct IdentityRotation {
    agents: Vec<String>,
    mode: RotationMode,
    cursor: AtomicUsize,
}

impl IdentityRotation {
    /// Returns `None` for an empty pool.
    pub fn new(agents: Vec<String>, mode: RotationMode) -> Option<Self> {
        if agents.is_empty() {
            return None;
        }
        Some(Self {
            agents,
            mode,
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn pick(&self) -> &str {
        let idx = match self.mode {
            RotationMode::RoundRobin => self.cursor.fetch_add(1, Ordering::Relaxed) % self.agents.len(),
            RotationMode::Random => rng().random_range(0..self.agents.len()),
        };
        &self.agents[idx]
    }
}

/// When and how long to back off.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub total_retries: u32,
    pub backoff_factor: Duration,
    pub backoff_max: Duration,
    pub retry_on_status: Vec<u16>,
}

impl RetryPolicy {
    pub fn from_settings(settings: &TransportSettings) -> Self {
        Self {
            total_retries: settings.total_retries,
            backoff_factor: Duration::from_secs_f64(settings.backoff_factor_secs.max(0.0)),
            backoff_max: Duration::from_secs_f64(settings.backoff_max_secs.max(0.0)),
            retry_on_status: RETRYABLE_STATUS.to_vec(),
        }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn backoff(&self, retry: u32) -> Duration {
        let exp = retry.saturating_sub(1).min(16);
        self.backoff_factor
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }

    pub fn allows_method(&self, method: &Method) -> bool {
        matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
    }

    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.retry_on_status.contains(&status)
    }
}

enum AttemptFailure {
    Retryable(TransportError, Option<Duration>),
    Fatal(TransportError),
}

/// Pooled HTTP client used for every page and API request of a run.
pub struct Transport {
    client: reqwest::Client,
    identities: IdentityRotation,
    policy: RetryPolicy,
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("identities", &self.identities.agents.len())
            .field("policy", &self.policy)
            .finish()
    }
}

impl Transport {
    /// Build the client. Fails only when TLS or the user-agent pool is unusable.
    pub fn new(settings: &TransportSettings) -> Result<Self, TransportError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_HTML));
        if let Ok(lang) = HeaderValue::from_str(&settings.accept_language) {
            headers.insert(reqwest::header::ACCEPT_LANGUAGE, lang);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(settings.timeout())
            .pool_max_idle_per_host(settings.pool_max_idle_per_host)
            .build()
            .map_err(TransportError::Client)?;

        let identities = IdentityRotation::new(settings.user_agents.clone(), settings.rotation)
            .ok_or(TransportError::NoIdentity)?;

        Ok(Self {
            client,
            identities,
            policy: RetryPolicy::from_settings(settings),
        })
    }

    /// Next identity from the rotation.
    pub fn next_identity(&self) -> &str {
        self.identities.pick()
    }

    /// GET `url` with the next identity from the rotation.
    pub async fn fetch(&self, url: &str) -> Result<RawFetchResult, TransportError> {
        let identity = self.next_identity().to_string();
        self.fetch_as(url, &identity).await
    }

    /// GET `url` presenting `identity` as the user-agent.
    pub async fn fetch_as(&self, url: &str, identity: &str) -> Result<RawFetchResult, TransportError> {
        self.send(Method::GET, url, identity).await
    }

    #[instrument(level = "debug", skip(self, identity), fields(%method, %url))]
    async fn send(&self, method: Method, url: &str, identity: &str) -> Result<RawFetchResult, TransportError> {
        let parsed = Url::parse(url).map_err(|source| TransportError::InvalidUrl {
            url: url.to_string(),
            source,
        })?;
        let total_t0 = Instant::now();
        let mut retry = 0u32;

        loop {
            let attempt_t0 = Instant::now();
            let (err, retry_after) = match self.attempt(&method, &parsed, identity).await {
                Ok(result) => {
                    debug!(
                        status = result.status,
                        bytes = result.body.len(),
                        elapsed_ms = attempt_t0.elapsed().as_millis() as u64,
                        "Fetched"
                    );
                    return Ok(result);
                }
                Err(AttemptFailure::Fatal(e)) => {
                    warn!(error = %e, "Non-retryable failure");
                    return Err(e);
                }
                Err(AttemptFailure::Retryable(e, retry_after)) => (e, retry_after),
            };

            if !self.policy.allows_method(&method) || retry >= self.policy.total_retries {
                error!(
                    attempts = retry + 1,
                    elapsed_ms_total = total_t0.elapsed().as_millis() as u64,
                    error = %err,
                    "fetch exhausted retries"
                );
                return Err(err);
            }

            retry += 1;
            let delay = retry_after
                .map(|d| d.min(self.policy.backoff_max))
                .unwrap_or_else(|| self.policy.backoff(retry));
            warn!(
                retry,
                max = self.policy.total_retries,
                elapsed_ms_attempt = attempt_t0.elapsed().as_millis() as u64,
                ?delay,
                error = %err,
                "fetch attempt failed; backing off"
            );
            sleep(delay).await;
        }
    }

    async fn attempt(&self, method: &Method, url: &Url, identity: &str) -> Result<RawFetchResult, AttemptFailure> {
        let resp = self
            .client
            .request(method.clone(), url.clone())
            .header(USER_AGENT, identity)
            .send()
            .await
            .map_err(|e| self.failure(url.as_str(), e))?;

        let status = resp.status();
        if !status.is_success() {
            let err = TransportError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            };
            return Err(if self.policy.is_retryable_status(status.as_u16()) {
                AttemptFailure::Retryable(err, retry_after(status, resp.headers()))
            } else {
                AttemptFailure::Fatal(err)
            });
        }

        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp.bytes().await.map_err(|e| self.failure(url.as_str(), e))?;

        Ok(RawFetchResult {
            url: final_url,
            status: status.as_u16(),
            body: body.to_vec(),
            content_type,
            retrieved_at: Utc::now(),
        })
    }

    fn failure(&self, url: &str, e: reqwest::Error) -> AttemptFailure {
        let err = classify_error(url, e);
        match err {
            TransportError::Timeout { .. } | TransportError::Connect { .. } => AttemptFailure::Retryable(err, None),
            _ => AttemptFailure::Fatal(err),
        }
    }
}

/// Honour `Retry-After: <seconds>` on throttling responses.
fn retry_after(status: StatusCode, headers: &HeaderMap) -> Option<Duration> {
    if status != StatusCode::TOO_MANY_REQUESTS && status != StatusCode::SERVICE_UNAVAILABLE {
        return None;
    }
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn error_chain(e: &reqwest::Error) -> String {
    let mut parts = vec![e.to_string()];
    let mut source = e.source();
    while let Some(inner) = source {
        parts.push(inner.to_string());
        source = inner.source();
    }
    parts.join(": ").to_lowercase()
}

/// Map a `reqwest` failure onto the transport taxonomy.
fn classify_error(url: &str, e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        return TransportError::Timeout { url: url.to_string() };
    }
    if e.is_connect() {
        let message = error_chain(&e);
        if message.contains("dns error") || message.contains("failed to lookup address") {
            return TransportError::Dns { url: url.to_string(), message };
        }
        if message.contains("certificate") || message.contains("tls") || message.contains("handshake") {
            return TransportError::Tls { url: url.to_string(), message };
        }
        return TransportError::Connect { url: url.to_string(), message };
    }
    TransportError::Request {
        url: url.to_string(),
        source: e,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::{Method::GET, MockServer};

    fn fast_settings(retries: u32) -> TransportSettings {
        TransportSettings {
            user_agents: vec!["ua-1".to_string(), "ua-2".to_string()],
            timeout_ms: 2_000,
            total_retries: retries,
            backoff_factor_secs: 0.001,
            backoff_max_secs: 0.01,
            ..TransportSettings::default()
        }
    }

    #[test]
    fn test_round_robin_wraps() {
        let rot = IdentityRotation::new(
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            RotationMode::RoundRobin,
        )
        .unwrap();
        let picks: Vec<String> = (0..5).map(|_| rot.pick().to_string()).collect();
        assert_eq!(picks, vec!["a", "b", "c", "a", "b"]);
    }

    #[test]
    fn test_random_rotation_stays_in_pool() {
        let rot = IdentityRotation::new(vec!["a".to_string(), "b".to_string()], RotationMode::Random).unwrap();
        for _ in 0..50 {
            assert!(["a", "b"].contains(&rot.pick()));
        }
    }

    #[test]
    fn test_empty_pool_rejected() {
        assert!(IdentityRotation::new(vec![], RotationMode::RoundRobin).is_none());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::from_settings(&TransportSettings::default());
        assert_eq!(policy.backoff(1), Duration::from_millis(800));
        assert_eq!(policy.backoff(2), Duration::from_millis(1600));
        assert_eq!(policy.backoff(3), Duration::from_millis(3200));
        assert_eq!(policy.backoff(30), Duration::from_secs(120));
    }

    #[test]
    fn test_only_idempotent_methods_retry() {
        let policy = RetryPolicy::from_settings(&TransportSettings::default());
        assert!(policy.allows_method(&Method::GET));
        assert!(policy.allows_method(&Method::HEAD));
        assert!(!policy.allows_method(&Method::POST));
        assert!(policy.is_retryable_status(429));
        assert!(!policy.is_retryable_status(404));
    }

    #[tokio::test]
    async fn test_fetch_success_rotates_identity() {
        let server = MockServer::start();
        let first = server.mock(|when, then| {
            when.method(GET).path("/story").header("user-agent", "ua-1");
            then.status(200)
                .header("content-type", "text/html")
                .body("<html>one</html>");
        });
        let second = server.mock(|when, then| {
            when.method(GET).path("/story").header("user-agent", "ua-2");
            then.status(200).body("<html>two</html>");
        });

        let transport = Transport::new(&fast_settings(0)).unwrap();
        let a = transport.fetch(&server.url("/story")).await.unwrap();
        let b = transport.fetch(&server.url("/story")).await.unwrap();

        first.assert();
        second.assert();
        assert_eq!(a.status, 200);
        assert_eq!(a.text(), "<html>one</html>");
        assert_eq!(a.content_type.as_deref(), Some("text/html"));
        assert_eq!(b.text(), "<html>two</html>");
    }

    #[tokio::test]
    async fn test_retryable_status_exhausts_budget() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/busy");
            then.status(503);
        });

        let transport = Transport::new(&fast_settings(2)).unwrap();
        let err = transport.fetch(&server.url("/busy")).await.unwrap_err();

        mock.assert_calls(3);
        assert!(matches!(err, TransportError::Status { status: 503, .. }));
    }

    #[tokio::test]
    async fn test_not_found_fails_fast() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/gone");
            then.status(404);
        });

        let transport = Transport::new(&fast_settings(3)).unwrap();
        let err = transport.fetch(&server.url("/gone")).await.unwrap_err();

        mock.assert_calls(1);
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_timeout_counts_against_budget() {
        let server = MockServer::start();
        let mock = server.mock(|when, then| {
            when.method(GET).path("/slow");
            then.status(200).delay(Duration::from_millis(500)).body("late");
        });

        let mut settings = fast_settings(1);
        settings.timeout_ms = 50;
        let transport = Transport::new(&settings).unwrap();
        let err = transport.fetch(&server.url("/slow")).await.unwrap_err();

        // One retry after the first timeout, then the budget is spent.
        mock.assert_calls(2);
        assert!(matches!(err, TransportError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_without_request() {
        let transport = Transport::new(&fast_settings(0)).unwrap();
        let err = transport.fetch("not a url").await.unwrap_err();
        assert!(matches!(err, TransportError::InvalidUrl { .. }));
    }

    #[test]
    fn test_retry_after_only_on_throttling() {
        let mut headers = HeaderMap::new();
        headers.insert(RETRY_AFTER, HeaderValue::from_static("7"));
        assert_eq!(
            retry_after(StatusCode::TOO_MANY_REQUESTS, &headers),
            Some(Duration::from_secs(7))
        );
        assert_eq!(retry_after(StatusCode::BAD_GATEWAY, &headers), None);
    }
}
