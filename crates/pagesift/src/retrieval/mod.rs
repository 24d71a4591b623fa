//! Retrieval backend: turn a URL into a `PageSnapshot`.
//!
//! Two strategies serve a request. `Lightweight` is a single HTTP GET;
//! `Rendered` drives an isolated headless browser session and waits for the
//! document to settle. A rendered request on a deployment that cannot render
//! is served lightweight and tagged with the reason.

pub mod http;

use crate::config::{PipelineConfig, RenderConfig};
use crate::error::{RenderUnavailable, RetrievalError};
use crate::monitor::{ChallengeMonitor, Inspection};
use crate::pipeline::deadline_after;
use crate::renderer::{RenderSession, Renderer, SessionProfile};
use crate::snapshot::PageSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Time allowed for an explicit session close, which may run past the
/// invocation deadline.
pub const SESSION_CLOSE_GRACE: Duration = Duration::from_secs(5);

pub use http::{HttpFetcher, HttpResponse};

/// How a page is retrieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Plain HTTP GET.
    #[default]
    #[serde(alias = "requests")]
    Lightweight,
    /// Headless browser with script execution.
    #[serde(alias = "selenium")]
    Rendered,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Lightweight => "lightweight",
            Strategy::Rendered => "rendered",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A retrieved page and how it was served.
#[derive(Debug, Clone)]
pub struct Fetched {
    pub snapshot: PageSnapshot,
    pub requested: Strategy,
    pub served_by: Strategy,
    /// Set when a rendered request fell back to lightweight.
    pub downgrade: Option<RenderUnavailable>,
}

impl Fetched {
    pub fn downgraded(&self) -> bool {
        self.downgrade.is_some()
    }
}

/// Result of one retrieval attempt.
#[derive(Debug, Clone)]
pub enum RetrievalOutcome {
    Success(Fetched),
    /// A challenge page is still present; the snapshot is partial.
    ChallengeDetected(Fetched),
    Failure(RetrievalError),
}

/// Fetches pages with either strategy.
pub struct Retriever {
    http: HttpFetcher,
    renderer: Arc<dyn Renderer>,
    monitor: ChallengeMonitor,
    render: RenderConfig,
}

impl Retriever {
    pub fn new(config: &PipelineConfig, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            http: HttpFetcher::new(
                &config.user_agents,
                &config.accept_language,
                config.request_timeout(),
            ),
            renderer,
            monitor: ChallengeMonitor::new(config.challenge.clone()),
            render: config.render.clone(),
        }
    }

    pub fn monitor(&self) -> &ChallengeMonitor {
        &self.monitor
    }

    /// Retrieve `url` with `strategy`, finishing before `deadline`.
    pub async fn fetch(&self, url: &str, strategy: Strategy, deadline: Instant) -> RetrievalOutcome {
        if let Err(e) = validate_url(url) {
            return RetrievalOutcome::Failure(e);
        }

        match strategy {
            Strategy::Lightweight => {
                self.fetch_lightweight(url, deadline, Strategy::Lightweight, None)
                    .await
            }
            Strategy::Rendered => {
                let reason = if self.renderer.is_available() {
                    match self.fetch_rendered(url, deadline).await {
                        Ok(outcome) => return outcome,
                        Err(reason) => reason,
                    }
                } else {
                    RenderUnavailable("no browser binary found".to_string())
                };

                warn!(url, reason = %reason, "rendered retrieval unavailable, falling back to lightweight");
                self.fetch_lightweight(url, deadline, Strategy::Rendered, Some(reason))
                    .await
            }
        }
    }

    async fn fetch_lightweight(
        &self,
        url: &str,
        deadline: Instant,
        requested: Strategy,
        downgrade: Option<RenderUnavailable>,
    ) -> RetrievalOutcome {
        debug!(url, strategy = %Strategy::Lightweight, "fetching");
        let response = match self.http.get(url, deadline).await {
            Ok(response) => response,
            Err(e) => return RetrievalOutcome::Failure(e),
        };

        let snapshot = PageSnapshot::from_html(&response.final_url, response.body);
        let inspection = self.monitor.inspect(&snapshot);
        let fetched = Fetched {
            snapshot,
            requested,
            served_by: Strategy::Lightweight,
            downgrade,
        };

        match inspection {
            Inspection::Clean => RetrievalOutcome::Success(fetched),
            Inspection::ChallengePresent { signature } => {
                warn!(url, %signature, "challenge page served to lightweight fetch");
                RetrievalOutcome::ChallengeDetected(fetched)
            }
        }
    }

    /// Render `url` in a fresh session.
    ///
    /// `Err` means the browser could not be brought up at all and the
    /// request should be downgraded.
    async fn fetch_rendered(
        &self,
        url: &str,
        deadline: Instant,
    ) -> Result<RetrievalOutcome, RenderUnavailable> {
        let profile = SessionProfile {
            user_agent: self
                .http
                .pick_user_agent()
                .unwrap_or_default()
                .to_string(),
            accept_language: self.http.accept_language().to_string(),
            viewport: self.render.viewport,
        };

        let mut session =
            match tokio::time::timeout_at(deadline, self.renderer.open_session(&profile)).await {
                Ok(Ok(session)) => session,
                Ok(Err(e)) => return Err(RenderUnavailable(format!("{e:#}"))),
                Err(_) => return Ok(RetrievalOutcome::Failure(RetrievalError::Timeout)),
            };

        debug!(url, strategy = %Strategy::Rendered, "fetching");
        let outcome = self.drive_session(session.as_mut(), url, deadline).await;

        match tokio::time::timeout(SESSION_CLOSE_GRACE, session.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "failed to close browser session"),
            Err(_) => warn!("browser session close timed out, left to drop"),
        }
        Ok(outcome)
    }

    async fn drive_session(
        &self,
        session: &mut dyn RenderSession,
        url: &str,
        deadline: Instant,
    ) -> RetrievalOutcome {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let nav_timeout = Duration::from_millis(self.render.navigation_timeout_ms).min(remaining);
        if nav_timeout.is_zero() {
            return RetrievalOutcome::Failure(RetrievalError::Timeout);
        }

        let nav = match session.navigate(url, nav_timeout).await {
            Ok(nav) => nav,
            Err(e) => return RetrievalOutcome::Failure(render_error(e, deadline)),
        };
        debug!(url, final_url = %nav.final_url, load_ms = nav.load_time_ms, "navigated");

        self.wait_ready(session, deadline).await;

        let html = match tokio::time::timeout_at(deadline, session.html()).await {
            Ok(Ok(html)) => html,
            Ok(Err(e)) => return RetrievalOutcome::Failure(render_error(e, deadline)),
            Err(_) => return RetrievalOutcome::Failure(RetrievalError::Timeout),
        };

        let snapshot = PageSnapshot::from_html(&nav.final_url, html);
        let (snapshot, clean) = match self.monitor.inspect(&snapshot) {
            Inspection::Clean => (snapshot, true),
            Inspection::ChallengePresent { signature } => {
                info!(url, %signature, "challenge page detected");
                self.monitor
                    .await_clearance(session, snapshot, deadline)
                    .await
            }
        };

        let fetched = Fetched {
            snapshot,
            requested: Strategy::Rendered,
            served_by: Strategy::Rendered,
            downgrade: None,
        };
        if clean {
            RetrievalOutcome::Success(fetched)
        } else {
            RetrievalOutcome::ChallengeDetected(fetched)
        }
    }

    /// Poll `document.readyState` until `complete`.
    ///
    /// Falls back to a fixed settle delay when the state cannot be read.
    async fn wait_ready(&self, session: &dyn RenderSession, deadline: Instant) {
        let limit = deadline_after(Duration::from_millis(self.render.ready_timeout_ms)).min(deadline);
        let poll = Duration::from_millis(self.render.ready_poll_ms.max(1));

        loop {
            match tokio::time::timeout_at(limit, session.ready_state()).await {
                Ok(Ok(state)) if state == "complete" => return,
                Ok(Ok(state)) => debug!(state = %state, "document not ready"),
                Ok(Err(e)) => {
                    debug!(error = %e, "ready state unavailable, using settle delay");
                    let settle = deadline_after(Duration::from_millis(self.render.settle_delay_ms));
                    tokio::time::sleep_until(settle.min(deadline)).await;
                    return;
                }
                Err(_) => {
                    warn!("ready state poll timed out");
                    return;
                }
            }

            if deadline_after(poll) >= limit {
                warn!("document not complete before ready timeout");
                return;
            }
            tokio::time::sleep(poll).await;
        }
    }
}

/// Accept only absolute http(s) URLs.
pub fn validate_url(url: &str) -> Result<url::Url, RetrievalError> {
    let parsed =
        url::Url::parse(url.trim()).map_err(|e| RetrievalError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        scheme => Err(RetrievalError::InvalidUrl(format!(
            "{url}: unsupported scheme `{scheme}`"
        ))),
    }
}

fn render_error(err: anyhow::Error, deadline: Instant) -> RetrievalError {
    if Instant::now() >= deadline {
        RetrievalError::Timeout
    } else {
        RetrievalError::Render(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::NoopRenderer;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn retriever() -> Retriever {
        Retriever::new(&PipelineConfig::default(), Arc::new(NoopRenderer))
    }

    fn deadline() -> Instant {
        Instant::now() + Duration::from_secs(10)
    }

    #[test]
    fn strategy_names_and_aliases() {
        let s: Strategy = serde_json::from_str("\"selenium\"").unwrap();
        assert_eq!(s, Strategy::Rendered);
        let s: Strategy = serde_json::from_str("\"requests\"").unwrap();
        assert_eq!(s, Strategy::Lightweight);
        assert_eq!(serde_json::to_string(&Strategy::Rendered).unwrap(), "\"rendered\"");
        assert_eq!(Strategy::default(), Strategy::Lightweight);
    }

    #[test]
    fn only_http_urls_are_valid() {
        assert!(validate_url("https://example.com/x").is_ok());
        assert!(validate_url("http://example.com").is_ok());
        for bad in ["", "example.com", "/relative", "ftp://example.com", "file:///etc/passwd"] {
            assert!(
                matches!(validate_url(bad), Err(RetrievalError::InvalidUrl(_))),
                "{bad} should be rejected"
            );
        }
    }

    #[tokio::test]
    async fn invalid_url_fails_without_network() {
        match retriever().fetch("nope", Strategy::Lightweight, deadline()).await {
            RetrievalOutcome::Failure(e) => assert_eq!(e.kind(), "invalid_url"),
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn rendered_without_browser_is_downgraded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_body_string("<title>Plain</title><p>hello</p>"),
            )
            .mount(&server)
            .await;

        match retriever().fetch(&server.uri(), Strategy::Rendered, deadline()).await {
            RetrievalOutcome::Success(fetched) => {
                assert_eq!(fetched.requested, Strategy::Rendered);
                assert_eq!(fetched.served_by, Strategy::Lightweight);
                assert!(fetched.downgraded());
                assert_eq!(fetched.snapshot.title, "Plain");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test]
    async fn lightweight_flags_challenge_and_keeps_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "<title>Just a moment...</title><div>Cloudflare browser challenge</div>",
            ))
            .mount(&server)
            .await;

        match retriever().fetch(&server.uri(), Strategy::Lightweight, deadline()).await {
            RetrievalOutcome::ChallengeDetected(fetched) => {
                assert!(!fetched.downgraded());
                assert_eq!(fetched.snapshot.title, "Just a moment...");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
