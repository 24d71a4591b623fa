//! pagesift: adaptive content extraction for single web pages.
//!
//! Fetches a page over plain HTTP or through a headless browser, watches for
//! anti-automation challenge pages, isolates the main content region and,
//! on listing sites, pulls structured records out of the page.

pub mod canonical;
pub mod config;
pub mod dom;
pub mod error;
pub mod extract;
pub mod isolate;
pub mod monitor;
pub mod output;
pub mod pipeline;
pub mod renderer;
pub mod retrieval;
pub mod snapshot;

pub use canonical::{LinkCanonicalizer, TrackingPolicy};
pub use config::{ListingSite, PipelineConfig, RenderConfig};
pub use dom::{DomNode, Matcher, NodePredicate};
pub use error::{RenderUnavailable, RetrievalError, SiftError, SiftResult};
pub use extract::{ExtractedRecord, FieldRules, Lookup, PageLink, RecordExtractor, NOT_AVAILABLE};
pub use isolate::{ContentIsolator, ContentResult};
pub use monitor::{ChallengeConfig, ChallengeMonitor, Inspection};
pub use output::{FailureResult, PageResult, ScrapeOutput};
pub use pipeline::{ListingMode, Pipeline, PipelineRequest, Stage};
pub use renderer::{ChromiumRenderer, NoopRenderer, RenderSession, Renderer, SessionProfile};
pub use retrieval::{Fetched, RetrievalOutcome, Retriever, Strategy};
pub use snapshot::PageSnapshot;
