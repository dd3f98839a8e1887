//! Dynamic-render fallback for pages whose content only appears after
//! scripts run.
//!
//! Rendering is a separate capability from extraction: the orchestrator asks
//! [`RenderPolicy::should_render`] whether a static result is good enough,
//! calls a [`Renderer`] when it is not, and merges the two passes with
//! [`promote`].

pub mod chromium;

use async_trait::async_trait;
use url::Url;

use crate::error::RenderError;
use crate::models::{ExtractedContent, ExtractionTier};
use crate::settings::RenderSettings;

/// Something that can turn a URL into post-script markup.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Render `url` presenting `identity` as the user-agent.
    async fn render(&self, url: &str, identity: &str) -> Result<String, RenderError>;
}

/// Renderer used when browser rendering is turned off.
#[derive(Debug, Default)]
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    async fn render(&self, _url: &str, _identity: &str) -> Result<String, RenderError> {
        Err(RenderError::Disabled)
    }
}

/// Decides when a static extraction needs a rendering pass.
#[derive(Debug, Clone)]
pub struct RenderPolicy {
    pub enabled: bool,
    pub domains: Vec<String>,
    pub min_body_chars: usize,
}

impl RenderPolicy {
    pub fn from_settings(settings: &RenderSettings) -> Self {
        Self {
            enabled: settings.enabled,
            domains: settings.domains.iter().map(|d| d.to_lowercase()).collect(),
            min_body_chars: settings.min_body_chars,
        }
    }

    /// Host is listed, or is a subdomain of a listed domain.
    pub fn domain_allowed(&self, url: &str) -> bool {
        let Some(host) = Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_lowercase)) else {
            return false;
        };
        self.domains
            .iter()
            .any(|d| host == *d || host.ends_with(&format!(".{d}")))
    }

    pub fn should_render(&self, url: &str, static_body: &str) -> bool {
        self.enabled && self.domain_allowed(url) && static_body.chars().count() < self.min_body_chars
    }
}

/// Merge a rendered extraction into the static one.
///
/// The body is replaced only by a strictly longer rendered body. Title and
/// date are promoted independently, and only when the rendered pass found a
/// value of its own, so a worse render never blanks a good static field.
pub fn promote(static_pass: ExtractedContent, rendered: ExtractedContent) -> ExtractedContent {
    let mut merged = static_pass;
    if rendered.body.chars().count() > merged.body.chars().count() {
        merged.body = rendered.body;
        merged.tier = ExtractionTier::Rendered;
    }
    if !rendered.title.is_empty() {
        merged.title = rendered.title;
    }
    if rendered.date_found {
        merged.published_date = rendered.published_date;
        merged.date_found = true;
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn content(title: &str, body: &str, date: Option<(i32, u32, u32)>) -> ExtractedContent {
        let fallback = NaiveDate::from_ymd_opt(2030, 1, 1).unwrap();
        ExtractedContent {
            title: title.to_string(),
            body: body.to_string(),
            published_date: date
                .and_then(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d))
                .unwrap_or(fallback),
            date_found: date.is_some(),
            tier: ExtractionTier::Static,
        }
    }

    #[test]
    fn test_longer_rendered_body_wins() {
        let merged = promote(content("T", "short", None), content("", "much longer body", None));
        assert_eq!(merged.body, "much longer body");
        assert_eq!(merged.tier, ExtractionTier::Rendered);
        assert_eq!(merged.title, "T");
    }

    #[test]
    fn test_equal_length_body_keeps_static() {
        let merged = promote(content("T", "abcde", None), content("R", "vwxyz", None));
        assert_eq!(merged.body, "abcde");
        assert_eq!(merged.tier, ExtractionTier::Static);
        assert_eq!(merged.title, "R");
    }

    #[test]
    fn test_title_and_date_promote_independently() {
        let static_pass = content("Static title", "long static body", Some((2024, 5, 1)));
        let merged = promote(static_pass.clone(), content("", "x", Some((2024, 5, 3))));
        assert_eq!(merged.title, "Static title");
        assert_eq!(merged.published_date, NaiveDate::from_ymd_opt(2024, 5, 3).unwrap());
        assert_eq!(merged.body, "long static body");

        let merged = promote(static_pass, content("Rendered title", "", None));
        assert_eq!(merged.title, "Rendered title");
        assert_eq!(merged.published_date, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
    }

    #[test]
    fn test_policy_domain_and_length() {
        let policy = RenderPolicy {
            enabled: true,
            domains: vec!["finance.yahoo.com".to_string()],
            min_body_chars: 120,
        };
        assert!(policy.should_render("https://finance.yahoo.com/news/a.html", "short"));
        assert!(policy.should_render("https://uk.finance.yahoo.com/news/a.html", ""));
        assert!(!policy.should_render("https://notfinance.yahoo.com/news/a.html", ""));
        assert!(!policy.should_render("https://example.com/news/a.html", ""));
        assert!(!policy.should_render("https://finance.yahoo.com/news/a.html", &"x".repeat(120)));
        assert!(!policy.should_render("not a url", ""));

        let disabled = RenderPolicy { enabled: false, ..policy };
        assert!(!disabled.should_render("https://finance.yahoo.com/news/a.html", ""));
    }

    #[tokio::test]
    async fn test_noop_renderer_reports_disabled() {
        let err = NoopRenderer.render("https://example.com", "ua").await.unwrap_err();
        assert!(matches!(err, RenderError::Disabled));
    }
}
