//! Chromium-based renderer using chromiumoxide.
//!
//! Every session launches its own headless browser with a throwaway profile
//! directory, so invocations never share cookies, cache or process state.

use super::{NavigationResult, RenderSession, Renderer, SessionProfile};
use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Environment variable that overrides browser discovery.
pub const CHROMIUM_PATH_ENV: &str = "PAGESIFT_CHROMIUM_PATH";

/// Find the Chromium binary path.
pub fn find_chromium(explicit: Option<&Path>) -> Option<PathBuf> {
    // 1. PAGESIFT_CHROMIUM_PATH env
    if let Ok(p) = std::env::var(CHROMIUM_PATH_ENV) {
        let path = PathBuf::from(&p);
        if path.exists() {
            return Some(path);
        }
        warn!(path = %p, "{CHROMIUM_PATH_ENV} points at a missing file");
    }

    // 2. Configured path
    if let Some(path) = explicit {
        if path.exists() {
            return Some(path.to_path_buf());
        }
    }

    // 3. Cache directory
    if let Some(cache) = dirs::cache_dir() {
        let candidates = if cfg!(target_os = "macos") {
            vec![
                cache.join("pagesift/chromium/chrome-mac-arm64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
                cache.join("pagesift/chromium/chrome-mac-x64/Google Chrome for Testing.app/Contents/MacOS/Google Chrome for Testing"),
            ]
        } else {
            vec![
                cache.join("pagesift/chromium/chrome-linux64/chrome"),
                cache.join("pagesift/chromium/chrome"),
            ]
        };
        if let Some(found) = candidates.into_iter().find(|c| c.exists()) {
            return Some(found);
        }
    }

    // 4. System PATH
    for name in [
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(path) = which::which(name) {
            return Some(path);
        }
    }

    // 5. Common macOS location
    if cfg!(target_os = "macos") {
        let common = PathBuf::from("/Applications/Google Chrome.app/Contents/MacOS/Google Chrome");
        if common.exists() {
            return Some(common);
        }
    }

    None
}

/// Chromium-based renderer.
///
/// Holds only the resolved binary path; browsers are launched per session.
pub struct ChromiumRenderer {
    executable: Option<PathBuf>,
}

impl ChromiumRenderer {
    /// Resolve the browser binary, preferring `explicit` after the env override.
    pub fn discover(explicit: Option<&Path>) -> Self {
        let executable = find_chromium(explicit);
        match &executable {
            Some(path) => debug!(path = %path.display(), "chromium found"),
            None => debug!("chromium not found; rendered requests will be downgraded"),
        }
        Self { executable }
    }

    /// Use a specific binary without discovery.
    pub fn with_executable(path: PathBuf) -> Self {
        Self {
            executable: Some(path),
        }
    }

    pub fn executable(&self) -> Option<&Path> {
        self.executable.as_deref()
    }
}

#[async_trait]
impl Renderer for ChromiumRenderer {
    fn is_available(&self) -> bool {
        self.executable.is_some()
    }

    async fn open_session(&self, profile: &SessionProfile) -> Result<Box<dyn RenderSession>> {
        let Some(executable) = self.executable.clone() else {
            bail!("Chromium not found. Set {CHROMIUM_PATH_ENV} or install chromium.");
        };

        let profile_dir = tempfile::Builder::new()
            .prefix("pagesift-profile-")
            .tempdir()
            .context("failed to create temp profile dir")?;

        let width = profile.viewport.width;
        let height = profile.viewport.height;
        let config = BrowserConfig::builder()
            .chrome_executable(executable)
            .user_data_dir(profile_dir.path())
            .window_size(width, height)
            .viewport(Some(Viewport {
                width,
                height,
                ..Default::default()
            }))
            .args([
                "--headless=new".to_string(),
                "--disable-gpu".to_string(),
                "--no-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-extensions".to_string(),
                "--disable-infobars".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
                "--no-first-run".to_string(),
                format!("--user-agent={}", profile.user_agent),
                format!("--lang={}", profile.accept_language),
            ])
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build browser config: {e}"))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("failed to launch Chromium")?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                let mut browser = browser;
                let _ = browser.close().await;
                let _ = browser.wait().await;
                handler_task.abort();
                return Err(e).context("failed to create new page");
            }
        };

        Ok(Box::new(ChromiumSession {
            browser,
            page,
            handler_task,
            _profile_dir: profile_dir,
        }))
    }
}

/// One launched browser with a single page.
pub struct ChromiumSession {
    browser: Browser,
    page: Page,
    handler_task: JoinHandle<()>,
    _profile_dir: TempDir,
}

#[async_trait]
impl RenderSession for ChromiumSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult> {
        let start = Instant::now();

        let result = tokio::time::timeout(timeout, self.page.goto(url)).await;

        let load_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(Ok(_)) => {
                let final_url = self
                    .page
                    .url()
                    .await
                    .unwrap_or_default()
                    .map(|u| u.to_string())
                    .unwrap_or_else(|| url.to_string());

                Ok(NavigationResult {
                    final_url,
                    load_time_ms,
                })
            }
            Ok(Err(e)) => bail!("navigation failed: {e}"),
            Err(_) => bail!("navigation timed out after {}ms", timeout.as_millis()),
        }
    }

    async fn ready_state(&self) -> Result<String> {
        let result = self
            .page
            .evaluate("document.readyState")
            .await
            .context("failed to read document.readyState")?;

        result
            .into_value()
            .map_err(|e| anyhow::anyhow!("failed to convert readyState: {e:?}"))
    }

    async fn html(&self) -> Result<String> {
        self.page.content().await.context("failed to get HTML")
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let mut session = self;
        let _ = session.page.clone().close().await;
        session
            .browser
            .close()
            .await
            .context("failed to close browser")?;
        let _ = session.browser.wait().await;
        Ok(())
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        // Browser's own drop kills the child process if close() never ran.
        self.handler_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::ViewportSize;

    #[test]
    fn explicit_missing_path_is_ignored() {
        let renderer = ChromiumRenderer { executable: None };
        assert!(!renderer.is_available());

        let missing = Path::new("/definitely/not/here/chrome");
        let found = find_chromium(Some(missing));
        assert_ne!(found.as_deref(), Some(missing));
    }

    #[tokio::test]
    #[ignore] // Requires Chromium to be installed
    async fn test_chromium_render_data_url() {
        let renderer = ChromiumRenderer::discover(None);
        let profile = SessionProfile {
            user_agent: "Mozilla/5.0 pagesift-test".into(),
            accept_language: "en-US".into(),
            viewport: ViewportSize::default(),
        };
        let mut session = renderer
            .open_session(&profile)
            .await
            .expect("failed to open session");

        session
            .navigate(
                "data:text/html,<title>T</title><h1>Hello</h1><p>World</p>",
                Duration::from_secs(10),
            )
            .await
            .expect("navigation failed");

        assert_eq!(session.ready_state().await.expect("readyState"), "complete");
        let html = session.html().await.expect("html failed");
        assert!(html.contains("<h1>Hello</h1>"));

        session.close().await.expect("close failed");
    }
}
