//! Renderer abstraction for browser-based page rendering.
//!
//! Defines the `Renderer` and `RenderSession` traits that abstract over the
//! browser engine (currently Chromium via chromiumoxide). A session is an
//! isolated, short-lived browser owned by exactly one pipeline invocation.

pub mod chromium;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub use chromium::ChromiumRenderer;

/// Result of navigating to a URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavigationResult {
    /// The final URL after any redirects.
    pub final_url: String,
    /// Time taken to load the page in milliseconds.
    pub load_time_ms: u64,
}

/// Fixed window geometry for rendered sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewportSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ViewportSize {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 800,
        }
    }
}

/// How a session presents itself to the site.
#[derive(Debug, Clone)]
pub struct SessionProfile {
    pub user_agent: String,
    pub accept_language: String,
    pub viewport: ViewportSize,
}

/// A browser engine that can open isolated sessions.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Whether this deployment can render at all (e.g. a browser binary was found).
    fn is_available(&self) -> bool;
    /// Launch a fresh, isolated session.
    async fn open_session(&self, profile: &SessionProfile) -> Result<Box<dyn RenderSession>>;
}

/// A single isolated browser session.
///
/// Callers must `close` it on every path they control; implementations also
/// release their resources on drop so cancellation cannot leak a browser.
#[async_trait]
pub trait RenderSession: Send + Sync {
    /// Navigate to a URL with a timeout.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavigationResult>;
    /// Current `document.readyState`.
    async fn ready_state(&self) -> Result<String>;
    /// Get the full page HTML.
    async fn html(&self) -> Result<String>;
    /// Close the session and tear down the browser.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// A renderer used when no browser is available.
///
/// Rendered requests served by it are downgraded to the lightweight fetch.
pub struct NoopRenderer;

#[async_trait]
impl Renderer for NoopRenderer {
    fn is_available(&self) -> bool {
        false
    }

    async fn open_session(&self, _profile: &SessionProfile) -> Result<Box<dyn RenderSession>> {
        Err(anyhow::anyhow!("Browser not available (HTTP-only mode)"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_renderer_is_unavailable() {
        let profile = SessionProfile {
            user_agent: "test".into(),
            accept_language: "en-US".into(),
            viewport: ViewportSize::default(),
        };
        assert!(!NoopRenderer.is_available());
        assert!(NoopRenderer.open_session(&profile).await.is_err());
    }
}
