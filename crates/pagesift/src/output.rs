//! JSON result shapes written by the pipeline.

use crate::extract::{ExtractedRecord, PageLink};
use crate::retrieval::Strategy;
use serde::{Deserialize, Serialize};

/// Result of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScrapeOutput {
    Page(PageResult),
    Failed(FailureResult),
}

impl ScrapeOutput {
    pub fn is_success(&self) -> bool {
        matches!(self, ScrapeOutput::Page(_))
    }

    pub fn url(&self) -> &str {
        match self {
            ScrapeOutput::Page(page) => &page.url,
            ScrapeOutput::Failed(failure) => &failure.url,
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

/// Content of a successfully processed page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageResult {
    pub title: String,
    pub url: String,
    /// Plain-text rendering of the content region.
    pub content: String,
    /// Serialized content region.
    pub html: String,
    /// First links of the content region, canonicalized.
    pub extracted_urls: Vec<PageLink>,
    /// Listing records; empty when no extraction ran.
    pub activities: Vec<ExtractedRecord>,
    /// Strategy that actually served the page.
    pub strategy: Strategy,
    pub strategy_downgraded: bool,
    pub challenge_unresolved: bool,
}

/// A page-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureResult {
    pub url: String,
    pub error: String,
    pub error_kind: String,
}
