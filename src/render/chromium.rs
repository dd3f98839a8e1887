//! Headless Chromium renderer using chromiumoxide.
//!
//! Every [`Renderer::render`] call launches its own browser with a throwaway
//! profile directory, so no cookies or cache leak between articles. The
//! browser is closed on every exit path; teardown problems are logged and
//! swallowed.

use super::Renderer;
use crate::error::RenderError;
use crate::settings::RenderSettings;
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use rand::random;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

/// Script that clicks the first button whose label contains a consent phrase.
fn consent_script(phrases: &[String]) -> String {
    let phrases = serde_json::to_string(phrases).unwrap_or_else(|_| "[]".to_string());
    format!(
        r#"(() => {{
    const phrases = {phrases};
    const buttons = Array.from(document.querySelectorAll('button'));
    for (const phrase of phrases) {{
        for (const b of buttons) {{
            const label = (b.innerText || b.textContent || '');
            if (label.includes(phrase)) {{
                try {{ b.click(); return true; }} catch (e) {{}}
            }}
        }}
    }}
    return false;
}})()"#
    )
}

/// Profile preferences that turn off images, stylesheets and notifications.
fn profile_preferences() -> serde_json::Value {
    serde_json::json!({
        "profile": {
            "managed_default_content_settings": { "images": 2, "stylesheets": 2 },
            "default_content_setting_values": { "notifications": 2 }
        }
    })
}

/// Seed a fresh profile directory with [`profile_preferences`].
async fn seed_profile(profile_dir: &Path) -> Result<(), RenderError> {
    let default_dir = profile_dir.join("Default");
    tokio::fs::create_dir_all(&default_dir)
        .await
        .map_err(|e| RenderError::Launch(format!("profile dir {}: {e}", default_dir.display())))?;
    tokio::fs::write(default_dir.join("Preferences"), profile_preferences().to_string())
        .await
        .map_err(|e| RenderError::Launch(format!("profile preferences: {e}")))
}

/// Throwaway profile directory, removed when dropped.
///
/// Dropping covers the paths where teardown never runs, such as a render
/// future abandoned by cancellation.
struct ProfileDir(PathBuf);

impl ProfileDir {
    fn fresh() -> Self {
        Self(std::env::temp_dir().join(format!("stockmind-render-{:016x}", random::<u64>())))
    }

    fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ProfileDir {
    fn drop(&mut self) {
        match std::fs::remove_dir_all(&self.0) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => debug!(path = %self.0.display(), error = %e, "Profile directory not removed"),
        }
    }
}

/// A browser launched for a single render, plus what is needed to tear it down.
///
/// Field order matters: the browser is dropped, and killed, before its profile.
struct Session {
    browser: Browser,
    handler: JoinHandle<()>,
    _profile: ProfileDir,
}

impl Session {
    async fn teardown(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "Browser close failed");
        }
        if let Err(e) = self.browser.wait().await {
            warn!(error = %e, "Waiting for browser exit failed");
        }
        self.handler.abort();
    }
}

/// Renders pages in a fresh headless Chromium per call.
#[derive(Debug, Clone)]
pub struct ChromiumRenderer {
    settings: RenderSettings,
}

impl ChromiumRenderer {
    pub fn new(settings: RenderSettings) -> Self {
        Self { settings }
    }

    /// Command-line flags for one session.
    fn browser_args(&self, identity: &str) -> Vec<String> {
        vec![
            "--headless=new".to_string(),
            "--disable-gpu".to_string(),
            "--no-sandbox".to_string(),
            "--disable-dev-shm-usage".to_string(),
            "--blink-settings=imagesEnabled=false".to_string(),
            "--disable-notifications".to_string(),
            format!(
                "--window-size={},{}",
                self.settings.window_width, self.settings.window_height
            ),
            format!("--user-agent={identity}"),
        ]
    }

    fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.page_load_timeout_secs)
    }

    async fn launch(&self, identity: &str) -> Result<Session, RenderError> {
        let profile = ProfileDir::fresh();
        seed_profile(profile.path()).await?;

        let mut builder = BrowserConfig::builder()
            .user_data_dir(profile.path())
            .window_size(self.settings.window_width, self.settings.window_height)
            .request_timeout(self.page_load_timeout());
        for arg in self.browser_args(identity) {
            builder = builder.arg(arg);
        }
        if let Some(path) = &self.settings.chrome_path {
            builder = builder.chrome_executable(path);
        }
        let launched = match builder.build() {
            Ok(config) => Browser::launch(config).await.map_err(|e| RenderError::Launch(e.to_string())),
            Err(e) => Err(RenderError::Launch(e)),
        };
        let (browser, mut handler) = launched?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        Ok(Session {
            browser,
            handler,
            _profile: profile,
        })
    }

    /// Best-effort consent dialog dismissal. A missing dialog is not an error.
    async fn dismiss_consent(&self, page: &Page) {
        if self.settings.consent_phrases.is_empty() {
            return;
        }
        match page.evaluate(consent_script(&self.settings.consent_phrases)).await {
            Ok(result) => {
                if result.into_value::<bool>().unwrap_or(false) {
                    debug!("Dismissed consent dialog");
                    sleep(Duration::from_millis(500)).await;
                }
            }
            Err(e) => debug!(error = %e, "Consent probe failed"),
        }
    }

    async fn drive(&self, session: &Session, url: &str) -> Result<String, RenderError> {
        let page = session
            .browser
            .new_page("about:blank")
            .await
            .map_err(|e| RenderError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        match timeout(self.page_load_timeout(), page.goto(url)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => {
                return Err(RenderError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                });
            }
            Err(_) => {
                return Err(RenderError::Timeout {
                    url: url.to_string(),
                    timeout_secs: self.settings.page_load_timeout_secs,
                });
            }
        }

        self.dismiss_consent(&page).await;
        sleep(Duration::from_millis(self.settings.settle_delay_ms)).await;

        page.evaluate("document.documentElement.outerHTML")
            .await
            .map_err(|e| RenderError::Script(e.to_string()))?
            .into_value::<String>()
            .map_err(|e| RenderError::Script(format!("{e:?}")))
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    #[instrument(level = "info", skip(self, identity), fields(%url))]
    async fn render(&self, url: &str, identity: &str) -> Result<String, RenderError> {
        let t0 = Instant::now();
        let session = self.launch(identity).await?;
        let result = self.drive(&session, url).await;
        session.teardown().await;

        match &result {
            Ok(html) => info!(
                bytes = html.len(),
                elapsed_ms = t0.elapsed().as_millis() as u64,
                "Rendered page"
            ),
            Err(e) => warn!(elapsed_ms = t0.elapsed().as_millis() as u64, error = %e, "Render failed"),
        }
        result
    }
}
