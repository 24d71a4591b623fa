//! Pipeline configuration loading and resolution.
//!
//! Every field has a default, so a config file only needs the values it
//! overrides. Resolution order: explicit path, `PAGESIFT_CONFIG`, then
//! `./pagesift.json` if present, then built-in defaults.

use crate::canonical::TrackingPolicy;
use crate::dom::Matcher;
use crate::error::{SiftError, SiftResult};
use crate::monitor::ChallengeConfig;
use crate::renderer::ViewportSize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable naming a config file.
pub const CONFIG_ENV: &str = "PAGESIFT_CONFIG";

/// Config file picked up from the working directory.
pub const LOCAL_CONFIG_FILE: &str = "pagesift.json";

/// Top-level configuration consumed by the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Browser identification strings; one is picked per request.
    pub user_agents: Vec<String>,
    pub accept_language: String,
    /// Lightweight fetch timeout.
    pub request_timeout_ms: u64,
    /// Overall per-invocation deadline when the caller gives none.
    pub invocation_timeout_ms: u64,
    /// Upper bound on extracted records per page.
    pub max_records: usize,
    /// Line width for the plain-text rendering.
    pub text_width: usize,
    pub challenge: ChallengeConfig,
    pub render: RenderConfig,
    pub tracking: TrackingPolicy,
    /// Sites whose pages trigger record extraction.
    pub listing_sites: Vec<ListingSite>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            user_agents: default_user_agents(),
            accept_language: "en-US,en;q=0.9".to_string(),
            request_timeout_ms: 10_000,
            invocation_timeout_ms: 60_000,
            max_records: 5,
            text_width: 80,
            challenge: ChallengeConfig::default(),
            render: RenderConfig::default(),
            tracking: TrackingPolicy::default(),
            listing_sites: vec![ListingSite::getyourguide()],
        }
    }
}

fn default_user_agents() -> Vec<String> {
    [
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.5 Safari/605.1.15",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:133.0) Gecko/20100101 Firefox/133.0",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl PipelineConfig {
    /// Resolve and load configuration.
    pub fn load(explicit: Option<&Path>) -> SiftResult<Self> {
        match resolve_config_path(explicit) {
            Some(path) => Self::from_file(&path),
            None => {
                debug!("no config file, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// Load a JSON config file, filling unspecified fields with defaults.
    pub fn from_file(path: &Path) -> SiftResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn validate(&self) -> SiftResult<()> {
        if self.user_agents.iter().all(|ua| ua.trim().is_empty()) {
            return Err(SiftError::Config("user_agents must not be empty".into()));
        }
        if self.challenge.poll_interval_ms == 0 {
            return Err(SiftError::Config(
                "challenge.poll_interval_ms must be positive".into(),
            ));
        }
        if self.render.ready_poll_ms == 0 {
            return Err(SiftError::Config("render.ready_poll_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_millis(self.invocation_timeout_ms)
    }

    /// First listing site whose host matches `url`.
    pub fn listing_site_for(&self, url: &str) -> Option<&ListingSite> {
        self.listing_sites.iter().find(|s| s.matches_url(url))
    }
}

/// Resolve the config file path, if any.
pub fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }

    if let Ok(env_path) = std::env::var(CONFIG_ENV) {
        if !env_path.trim().is_empty() {
            return Some(PathBuf::from(env_path));
        }
    }

    let local = PathBuf::from(LOCAL_CONFIG_FILE);
    local.exists().then_some(local)
}

/// Rendered-session timings and geometry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    /// Browser binary; discovery is used when unset.
    pub chromium_path: Option<PathBuf>,
    pub viewport: ViewportSize,
    pub navigation_timeout_ms: u64,
    /// How long to poll `document.readyState` for `complete`.
    pub ready_timeout_ms: u64,
    pub ready_poll_ms: u64,
    /// Fixed wait used when no ready state can be read.
    pub settle_delay_ms: u64,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            chromium_path: None,
            viewport: ViewportSize::default(),
            navigation_timeout_ms: 30_000,
            ready_timeout_ms: 20_000,
            ready_poll_ms: 250,
            settle_delay_ms: 3_000,
        }
    }
}

/// A listing site: pages on `host` get their cards extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingSite {
    /// Host, matched exactly or as a parent domain.
    pub host: String,
    /// Card predicate.
    pub card: Matcher,
    /// Search URL template with a `{terms}` placeholder.
    #[serde(default)]
    pub search_url: Option<String>,
}

impl ListingSite {
    /// GetYourGuide activity listings.
    pub fn getyourguide() -> Self {
        Self {
            host: "getyourguide.com".to_string(),
            card: Matcher::any_of(vec![
                Matcher::class_token("activity-card"),
                Matcher::tag_with_class("article", "activityCard"),
                Matcher::class_token("vertical-activity-card"),
                Matcher::class_token("activity-card-container"),
            ]),
            search_url: Some("https://www.getyourguide.com/s/?q={terms}&searchSource=3".into()),
        }
    }

    pub fn matches_url(&self, url: &str) -> bool {
        let Ok(parsed) = url::Url::parse(url) else {
            return false;
        };
        let Some(host) = parsed.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let wanted = self.host.trim().to_ascii_lowercase();
        !wanted.is_empty() && (host == wanted || host.ends_with(&format!(".{wanted}")))
    }

    /// Search URL for `query` in `city`, when the site has a template.
    pub fn search_url(&self, query: &str, city: &str) -> Option<String> {
        let template = self.search_url.as_deref()?;
        let terms = [query, city]
            .iter()
            .map(|part| url::form_urlencoded::byte_serialize(part.trim().as_bytes()).collect::<String>())
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("+");
        Some(template.replace("{terms}", &terms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.max_records, 5);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.challenge.wait_bound_ms, 30_000);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"max_records": 2, "tracking": {{"affiliate_params": "ref=abc"}}}}"#
        )
        .unwrap();
        let config = PipelineConfig::from_file(file.path()).unwrap();
        assert_eq!(config.max_records, 2);
        assert_eq!(config.tracking.affiliate_params, "ref=abc");
        assert!(config.tracking.denylist.contains(&"utm_source".to_string()));
        assert_eq!(config.text_width, 80);
    }

    #[test]
    fn empty_user_agent_pool_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"user_agents": []}}"#).unwrap();
        let err = PipelineConfig::from_file(file.path()).unwrap_err();
        assert_eq!(err.kind(), "config");
    }

    #[test]
    fn explicit_path_wins() {
        let path = Path::new("/tmp/some-config.json");
        assert_eq!(resolve_config_path(Some(path)), Some(path.to_path_buf()));
    }

    #[test]
    fn listing_site_host_matching() {
        let site = ListingSite::getyourguide();
        assert!(site.matches_url("https://www.getyourguide.com/s/?q=kayak"));
        assert!(site.matches_url("https://getyourguide.com/"));
        assert!(!site.matches_url("https://notgetyourguide.com/"));
        assert!(!site.matches_url("not a url"));
        let config = PipelineConfig::default();
        assert!(config.listing_site_for("https://example.com/").is_none());
    }

    #[test]
    fn search_url_encodes_terms() {
        let site = ListingSite::getyourguide();
        assert_eq!(
            site.search_url("wine tasting", "Paris").unwrap(),
            "https://www.getyourguide.com/s/?q=wine+tasting+Paris&searchSource=3"
        );
    }
}
