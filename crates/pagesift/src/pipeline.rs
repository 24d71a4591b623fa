//! Pipeline orchestration: retrieve, isolate, optionally extract.
//!
//! One `run` call is one invocation. It owns its deadline, its snapshot and
//! any browser session it opens, and always ends in a `ScrapeOutput`.

use crate::canonical::LinkCanonicalizer;
use crate::config::{ListingSite, PipelineConfig};
use crate::error::{RetrievalError, SiftError};
use crate::extract::{extract_links, RecordExtractor, MAX_PAGE_LINKS};
use crate::isolate::ContentIsolator;
use crate::output::{FailureResult, PageResult, ScrapeOutput};
use crate::renderer::{ChromiumRenderer, Renderer};
use crate::retrieval::{Retriever, RetrievalOutcome, Strategy, SESSION_CLOSE_GRACE};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Longest wait a deadline can stand for.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

/// The instant `wait` from now, capped at a year out.
pub fn deadline_after(wait: Duration) -> Instant {
    let now = Instant::now();
    now.checked_add(wait.min(FAR_FUTURE)).unwrap_or(now)
}

/// Invocation stage, traced on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Retrieving,
    Inspecting,
    Waiting,
    Isolating,
    Extracting,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Start => "start",
            Stage::Retrieving => "retrieving",
            Stage::Inspecting => "inspecting",
            Stage::Waiting => "waiting",
            Stage::Isolating => "isolating",
            Stage::Extracting => "extracting",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// When listing records are extracted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ListingMode {
    /// When the URL host matches a configured listing site.
    #[default]
    Auto,
    Off,
    /// Always, with the given site's card rules.
    Force(ListingSite),
}

/// What to scrape and how.
#[derive(Debug, Clone)]
pub struct PipelineRequest {
    pub url: String,
    pub strategy: Strategy,
    /// Overall deadline; the configured invocation timeout when unset.
    pub timeout: Option<Duration>,
    pub listing: ListingMode,
}

impl PipelineRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            strategy: Strategy::default(),
            timeout: None,
            listing: ListingMode::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_listing(mut self, listing: ListingMode) -> Self {
        self.listing = listing;
        self
    }
}

/// The content-extraction pipeline.
///
/// Holds read-only configuration only, so one instance can serve concurrent
/// invocations.
pub struct Pipeline {
    config: PipelineConfig,
    retriever: Retriever,
    isolator: ContentIsolator,
    canonicalizer: LinkCanonicalizer,
}

impl Pipeline {
    /// Build a pipeline with Chromium discovery for rendered requests.
    pub fn new(config: PipelineConfig) -> Self {
        let renderer = ChromiumRenderer::discover(config.render.chromium_path.as_deref());
        Self::with_renderer(config, Arc::new(renderer))
    }

    pub fn with_renderer(config: PipelineConfig, renderer: Arc<dyn Renderer>) -> Self {
        Self {
            retriever: Retriever::new(&config, renderer),
            isolator: ContentIsolator::new(config.text_width),
            canonicalizer: LinkCanonicalizer::new(config.tracking.clone()),
            config,
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run one invocation to completion.
    pub async fn run(&self, request: PipelineRequest) -> ScrapeOutput {
        let timeout = request
            .timeout
            .unwrap_or_else(|| self.config.invocation_timeout());
        let deadline = deadline_after(timeout);
        let url = request.url.trim().to_string();

        enter(Stage::Start, &url);
        info!(url = %url, strategy = %request.strategy, timeout_ms = timeout.as_millis() as u64, "scrape started");

        enter(Stage::Retrieving, &url);
        // every retrieval step honours `deadline`; the grace lets a session close
        let hard_stop = deadline.checked_add(SESSION_CLOSE_GRACE).unwrap_or(deadline);
        let outcome = tokio::time::timeout_at(
            hard_stop,
            self.retriever.fetch(&url, request.strategy, deadline),
        )
        .await
        .unwrap_or(RetrievalOutcome::Failure(RetrievalError::Timeout));

        enter(Stage::Inspecting, &url);
        let (fetched, challenge_unresolved) = match outcome {
            RetrievalOutcome::Success(fetched) => (fetched, false),
            RetrievalOutcome::ChallengeDetected(fetched) => {
                warn!(url = %url, "challenge unresolved, continuing with partial page");
                (fetched, true)
            }
            RetrievalOutcome::Failure(e) => return self.fail(&url, e.into()),
        };

        enter(Stage::Isolating, &url);
        let content = match self.isolator.isolate(&fetched.snapshot) {
            Ok(content) => content,
            Err(e) => return self.fail(&url, e),
        };

        let extracted_urls = extract_links(
            &content.region,
            &fetched.snapshot.source_url,
            &self.canonicalizer,
            MAX_PAGE_LINKS,
        );

        let activities = match self.listing_site(&request) {
            Some(site) => {
                enter(Stage::Extracting, &url);
                let extractor = RecordExtractor::new(site.card, self.canonicalizer.clone())
                    .with_max_records(self.config.max_records);
                extractor.extract(&content.region, &fetched.snapshot.source_url)
            }
            None => Vec::new(),
        };

        enter(Stage::Done, &url);
        info!(
            url = %url,
            served_by = %fetched.served_by,
            downgraded = fetched.downgraded(),
            challenge_unresolved,
            records = activities.len(),
            "scrape finished"
        );

        ScrapeOutput::Page(PageResult {
            title: content.title,
            url,
            content: content.plain_text,
            html: content.content_html,
            extracted_urls,
            activities,
            strategy: fetched.served_by,
            strategy_downgraded: fetched.downgraded(),
            challenge_unresolved,
        })
    }

    fn listing_site(&self, request: &PipelineRequest) -> Option<ListingSite> {
        match &request.listing {
            ListingMode::Off => None,
            ListingMode::Force(site) => Some(site.clone()),
            ListingMode::Auto => self.config.listing_site_for(&request.url).cloned(),
        }
    }

    fn fail(&self, url: &str, err: SiftError) -> ScrapeOutput {
        enter(Stage::Failed, url);
        warn!(url, error = %err, kind = err.kind(), "scrape failed");
        ScrapeOutput::Failed(FailureResult {
            url: url.to_string(),
            error: err.to_string(),
            error_kind: err.kind().to_string(),
        })
    }
}

fn enter(stage: Stage, url: &str) {
    debug!(stage = %stage, url, "stage");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::NoopRenderer;

    fn pipeline() -> Pipeline {
        Pipeline::with_renderer(PipelineConfig::default(), Arc::new(NoopRenderer))
    }

    #[test]
    fn listing_mode_selection() {
        let p = pipeline();
        let gyg = PipelineRequest::new("https://www.getyourguide.com/s/?q=kayak");
        assert!(p.listing_site(&gyg).is_some());
        assert!(p
            .listing_site(&gyg.clone().with_listing(ListingMode::Off))
            .is_none());

        let other = PipelineRequest::new("https://example.com/");
        assert!(p.listing_site(&other).is_none());
        let forced = other.with_listing(ListingMode::Force(ListingSite::getyourguide()));
        assert_eq!(p.listing_site(&forced), Some(ListingSite::getyourguide()));
    }

    #[tokio::test]
    async fn invalid_url_yields_failure_result() {
        let out = pipeline().run(PipelineRequest::new("not-a-url")).await;
        match out {
            ScrapeOutput::Failed(f) => {
                assert_eq!(f.url, "not-a-url");
                assert_eq!(f.error_kind, "invalid_url");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unbounded_timeout_still_returns_a_result() {
        let out = pipeline()
            .run(PipelineRequest::new("not-a-url").with_timeout(Duration::MAX))
            .await;
        match out {
            ScrapeOutput::Failed(f) => assert_eq!(f.error_kind, "invalid_url"),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn deadline_saturates() {
        let now = Instant::now();
        let far = deadline_after(Duration::MAX);
        assert!(far > now + Duration::from_secs(86_400 * 300));
        assert!(deadline_after(Duration::from_secs(5)) <= Instant::now() + Duration::from_secs(5));
    }

    #[test]
    fn stage_names() {
        assert_eq!(Stage::Waiting.to_string(), "waiting");
        assert_eq!(Stage::Failed.to_string(), "failed");
    }
}
