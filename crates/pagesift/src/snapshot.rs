//! Immutable capture of a page at one retrieval moment.

use crate::dom::{self, DomNode, Matcher};

/// Title used when a document has no usable `<title>`.
pub const NO_TITLE: &str = "No title found";

/// A page as one retrieval attempt saw it.
///
/// Created by a retrieval backend and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub source_url: String,
    pub title: String,
    pub dom_root: DomNode,
    pub raw_html: String,
}

impl PageSnapshot {
    /// Parse `raw_html` and capture it as a snapshot of `source_url`.
    pub fn from_html(source_url: &str, raw_html: String) -> Self {
        let dom_root = dom::parse_document(&raw_html);
        let title = document_title(&dom_root).unwrap_or_else(|| NO_TITLE.to_string());
        Self {
            source_url: source_url.to_string(),
            title,
            dom_root,
            raw_html,
        }
    }

    /// True when retrieval produced no markup at all.
    pub fn is_blank(&self) -> bool {
        self.raw_html.trim().is_empty() && self.dom_root.normalized_text().is_empty()
    }
}

/// Trimmed text of the first `<title>` element, if it has any.
pub fn document_title(root: &DomNode) -> Option<String> {
    let title = root.find_first(&Matcher::tag("title"))?.normalized_text();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}
