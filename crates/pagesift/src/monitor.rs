//! Anti-automation challenge detection.
//!
//! A page is considered challenged when every token of one configured
//! signature appears in its raw HTML. The monitor only observes: rendered
//! sessions are re-read until the challenge page goes away on its own or the
//! wait bound runs out.

use crate::pipeline::{deadline_after, Stage};
use crate::renderer::RenderSession;
use crate::snapshot::PageSnapshot;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Signatures and polling bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Token groups that must all co-occur to flag a challenge.
    pub strong_signatures: Vec<Vec<String>>,
    /// Tokens that are only logged.
    pub weak_tokens: Vec<String>,
    /// Maximum time spent waiting for a challenge to clear.
    pub wait_bound_ms: u64,
    pub poll_interval_ms: u64,
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        let group = |tokens: &[&str]| -> Vec<String> { tokens.iter().map(|t| t.to_string()).collect() };
        Self {
            strong_signatures: vec![
                group(&["cloudflare", "challenge"]),
                group(&["cf-chl", "challenge"]),
                group(&["captcha", "challenge"]),
            ],
            weak_tokens: vec!["captcha".to_string(), "robot".to_string()],
            wait_bound_ms: 30_000,
            poll_interval_ms: 2_000,
        }
    }
}

/// Verdict for one snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inspection {
    Clean,
    ChallengePresent {
        /// The matched signature, tokens joined with `+`.
        signature: String,
    },
}

impl Inspection {
    pub fn is_challenge(&self) -> bool {
        matches!(self, Inspection::ChallengePresent { .. })
    }
}

/// Inspects snapshots for challenge pages.
#[derive(Debug, Clone, Default)]
pub struct ChallengeMonitor {
    config: ChallengeConfig,
}

impl ChallengeMonitor {
    pub fn new(config: ChallengeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChallengeConfig {
        &self.config
    }

    /// Classify a snapshot. Case-insensitive substring match over raw HTML.
    pub fn inspect(&self, snapshot: &PageSnapshot) -> Inspection {
        let haystack = snapshot.raw_html.to_lowercase();

        for group in &self.config.strong_signatures {
            if group.is_empty() {
                continue;
            }
            if group
                .iter()
                .all(|token| haystack.contains(&token.to_lowercase()))
            {
                let signature = group.join("+");
                debug!(url = %snapshot.source_url, %signature, "challenge signature matched");
                return Inspection::ChallengePresent { signature };
            }
        }

        for token in &self.config.weak_tokens {
            if !token.is_empty() && haystack.contains(&token.to_lowercase()) {
                warn!(url = %snapshot.source_url, token = %token, "weak challenge indicator on page");
            }
        }

        Inspection::Clean
    }

    /// Re-read a rendered page until the challenge clears.
    ///
    /// Polls every `poll_interval_ms` until the verdict is `Clean`, the wait
    /// bound is spent, or `deadline` passes. Returns the latest snapshot and
    /// whether it is clean.
    pub async fn await_clearance(
        &self,
        session: &dyn RenderSession,
        mut snapshot: PageSnapshot,
        deadline: Instant,
    ) -> (PageSnapshot, bool) {
        let interval = Duration::from_millis(self.config.poll_interval_ms.max(1));
        let bound = deadline_after(Duration::from_millis(self.config.wait_bound_ms)).min(deadline);
        let mut attempt = 0u32;

        info!(
            stage = %Stage::Waiting,
            url = %snapshot.source_url,
            wait_ms = self.config.wait_bound_ms,
            "waiting for challenge to clear"
        );

        loop {
            let next = deadline_after(interval);
            if next > bound {
                break;
            }
            tokio::time::sleep_until(next).await;
            attempt += 1;

            let html = match tokio::time::timeout_at(bound, session.html()).await {
                Ok(Ok(html)) => html,
                Ok(Err(e)) => {
                    warn!(attempt, error = %e, "failed to re-read page during challenge wait");
                    continue;
                }
                Err(_) => break,
            };

            snapshot = PageSnapshot::from_html(&snapshot.source_url, html);
            match self.inspect(&snapshot) {
                Inspection::Clean => {
                    info!(url = %snapshot.source_url, attempt, "challenge cleared");
                    return (snapshot, true);
                }
                Inspection::ChallengePresent { signature } => {
                    debug!(attempt, %signature, "challenge still present");
                }
            }
        }

        warn!(url = %snapshot.source_url, attempt, "challenge still present after wait bound");
        (snapshot, false)
    }
}
