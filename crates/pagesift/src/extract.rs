//! Structured record extraction from listing pages.
//!
//! Every card on the page becomes one `ExtractedRecord`. Each field is looked
//! up through its own chain of rules; a missing field never prevents a record
//! and never affects another field.

use crate::canonical::{resolve_absolute, LinkCanonicalizer};
use crate::dom::{DomNode, Matcher, NodePredicate};
use crate::error::ExtractionFieldMiss;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::debug;

/// Value used for required text fields that could not be found.
pub const NOT_AVAILABLE: &str = "not available";

/// Text given to a page link that has none of its own.
pub const NO_LINK_TEXT: &str = "[No text]";

/// Links reported per page.
pub const MAX_PAGE_LINKS: usize = 4;

/// One listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRecord {
    pub title: String,
    /// Absolute canonical URL, or empty.
    pub url: String,
    pub image_url: String,
    pub price: String,
    pub rating: Option<String>,
    pub review_count: Option<String>,
}

/// A hyperlink found in a page's content region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageLink {
    pub url: String,
    pub text: String,
}

/// The first `limit` links under `root` that canonicalize to http(s) URLs.
pub fn extract_links(
    root: &DomNode,
    base_url: &str,
    canonicalizer: &LinkCanonicalizer,
    limit: usize,
) -> Vec<PageLink> {
    root.walk()
        .filter(|n| n.tag == "a")
        .filter_map(|anchor| {
            let url = canonicalizer.canonicalize(anchor.attr("href")?, base_url);
            if url.is_empty() {
                return None;
            }
            let text = anchor.normalized_text();
            Some(PageLink {
                url,
                text: if text.is_empty() {
                    NO_LINK_TEXT.to_string()
                } else {
                    text
                },
            })
        })
        .take(limit)
        .collect()
}

/// One step of a field lookup chain.
///
/// Lookups consider the card itself and all of its descendants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lookup {
    /// Normalized text of the first matching node with any text.
    Text(Matcher),
    /// First non-empty attribute, tried in order, of any matching node.
    Attr(Matcher, Vec<String>),
}

impl Lookup {
    pub fn text(matcher: Matcher) -> Self {
        Lookup::Text(matcher)
    }

    pub fn attr(matcher: Matcher, attributes: &[&str]) -> Self {
        Lookup::Attr(matcher, attributes.iter().map(|a| a.to_string()).collect())
    }

    fn resolve(&self, card: &DomNode) -> Option<String> {
        match self {
            Lookup::Text(matcher) => card
                .walk()
                .filter(|n| matcher.matches(n))
                .map(|n| n.normalized_text())
                .find(|text| !text.is_empty()),
            Lookup::Attr(matcher, attributes) => card
                .walk()
                .filter(|n| matcher.matches(n))
                .find_map(|n| {
                    attributes
                        .iter()
                        .filter_map(|a| n.attr(a))
                        .map(str::trim)
                        .find(|v| !v.is_empty())
                        .map(str::to_string)
                }),
        }
    }
}

/// Lookup chains per field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRules {
    pub title: Vec<Lookup>,
    pub price: Vec<Lookup>,
    pub rating: Vec<Lookup>,
    pub review_count: Vec<Lookup>,
    pub image: Vec<Lookup>,
    pub link: Vec<Lookup>,
}

impl Default for FieldRules {
    fn default() -> Self {
        Self {
            title: vec![
                Lookup::text(Matcher::tag("h3")),
                Lookup::text(Matcher::class_contains("activityCard__title")),
                Lookup::text(Matcher::class_contains("activity-card-title")),
                Lookup::text(Matcher::class_contains("title")),
                Lookup::text(Matcher::tag("h2")),
            ],
            price: vec![
                Lookup::text(Matcher::class_contains("price")),
                Lookup::text(Matcher::class_contains("baseline")),
                Lookup::text(Matcher::class_contains("amount")),
            ],
            rating: vec![Lookup::text(Matcher::class_contains("rating"))],
            review_count: vec![Lookup::text(Matcher::class_contains("review"))],
            image: vec![
                Lookup::attr(
                    Matcher::tag_with_class("img", "activityCard__image"),
                    &["src"],
                ),
                Lookup::attr(Matcher::tag("img"), &["src", "data-src"]),
            ],
            link: vec![
                Lookup::attr(Matcher::tag_with_class("a", "activityCard__link"), &["href"]),
                Lookup::attr(Matcher::tag("a"), &["href"]),
            ],
        }
    }
}

/// Pulls records out of cards on a listing page.
pub struct RecordExtractor {
    card: Box<dyn NodePredicate>,
    fields: FieldRules,
    max_records: usize,
    canonicalizer: LinkCanonicalizer,
}

impl RecordExtractor {
    pub fn new(card: impl NodePredicate + 'static, canonicalizer: LinkCanonicalizer) -> Self {
        Self {
            card: Box::new(card),
            fields: FieldRules::default(),
            max_records: 5,
            canonicalizer,
        }
    }

    pub fn with_fields(mut self, fields: FieldRules) -> Self {
        self.fields = fields;
        self
    }

    pub fn with_max_records(mut self, max_records: usize) -> Self {
        self.max_records = max_records;
        self
    }

    /// Extract up to `max_records` records from cards under `content_root`.
    ///
    /// `base_url` is the page the cards were found on; relative links and
    /// images are resolved against it.
    pub fn extract(&self, content_root: &DomNode, base_url: &str) -> Vec<ExtractedRecord> {
        let mut records = Vec::new();
        if self.max_records == 0 {
            return records;
        }

        let cards = content_root.find_outermost(self.card.as_ref());
        debug!(cards = cards.len(), "cards found");

        for (index, card) in cards.into_iter().enumerate() {
            if records.len() >= self.max_records {
                break;
            }
            match self.extract_card(card, base_url) {
                Some(record) => records.push(record),
                None => debug!(index, "card skipped: no title, price or image"),
            }
        }

        records
    }

    fn extract_card(&self, card: &DomNode, base_url: &str) -> Option<ExtractedRecord> {
        let title = lookup_field("title", &self.fields.title, card);
        let price = lookup_field("price", &self.fields.price, card);
        let image = lookup_field("image", &self.fields.image, card);
        if title.is_none() && price.is_none() && image.is_none() {
            return None;
        }
        let link = lookup_field("link", &self.fields.link, card);

        let rating = lookup_field("rating", &self.fields.rating, card).and_then(|r| parse_rating(&r));
        let review_count = lookup_field("review_count", &self.fields.review_count, card)
            .and_then(|r| parse_review_count(&r));

        let url = link
            .map(|href| self.canonicalizer.canonicalize(&href, base_url))
            .unwrap_or_default();
        let image_url = image
            .map(|src| resolve_absolute(&src, base_url))
            .filter(|src| !src.is_empty())
            .unwrap_or_else(|| NOT_AVAILABLE.to_string());

        Some(ExtractedRecord {
            title: title.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            url,
            image_url,
            price: price.unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            rating,
            review_count,
        })
    }
}

fn lookup_field(field: &'static str, chain: &[Lookup], card: &DomNode) -> Option<String> {
    let value = chain.iter().find_map(|lookup| lookup.resolve(card));
    if value.is_none() {
        debug!(miss = %ExtractionFieldMiss { field }, "field lookup failed");
    }
    value
}

fn rating_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\d+(?:[.,]\d+)?").expect("rating regex is valid"))
}

/// First decimal number in `raw`, comma accepted as the decimal separator.
pub fn parse_rating(raw: &str) -> Option<String> {
    let found = rating_regex().find(raw)?;
    let value: f64 = found.as_str().replace(',', ".").parse().ok()?;
    Some(value.to_string())
}

/// Digits of `raw`, or `None` when there are none.
pub fn parse_review_count(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}
