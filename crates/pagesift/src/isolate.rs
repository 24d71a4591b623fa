//! Main-content isolation.
//!
//! Picks the region of a page that carries its content, in order of
//! preference: a semantic `main` landmark, a conventional `content`/`main`
//! container, a group of repeated product-like blocks, then the body. Page
//! chrome (header, footer, navigation, sidebars) never reaches the output.

use crate::dom::{DomNode, Matcher, NodePredicate};
use crate::error::{SiftError, SiftResult};
use crate::snapshot::{PageSnapshot, NO_TITLE};
use html2text::render::TextDecorator;
use serde::Serialize;
use tracing::{debug, warn};

/// Minimum number of product-like blocks for the grouping fallback.
const MIN_PRODUCT_GROUP: usize = 3;

/// Class of the wrapper built around grouped product blocks.
pub const PRODUCT_GROUP_CLASS: &str = "extracted-products";

/// The isolated content of one page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentResult {
    pub title: String,
    pub plain_text: String,
    pub content_html: String,
    /// The chosen region as a tree, for record extraction.
    #[serde(skip)]
    pub region: DomNode,
}

/// Which rule chose the region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionSource {
    Landmark,
    Container,
    ProductGroup,
    Body,
    Document,
}

/// Selects a page's content region and renders it as text.
#[derive(Debug, Clone)]
pub struct ContentIsolator {
    text_width: usize,
}

impl Default for ContentIsolator {
    fn default() -> Self {
        Self::new(80)
    }
}

impl ContentIsolator {
    pub fn new(text_width: usize) -> Self {
        Self {
            text_width: text_width.max(1),
        }
    }

    pub fn isolate(&self, snapshot: &PageSnapshot) -> SiftResult<ContentResult> {
        if snapshot.is_blank() {
            return Err(SiftError::NoContentRegion(format!(
                "{} returned an empty document",
                snapshot.source_url
            )));
        }

        let (region, source) = select_region(&snapshot.dom_root);
        debug!(url = %snapshot.source_url, source = ?source, "content region selected");

        let content_html = region.to_html();
        let plain_text = match html2text::config::with_decorator(InlineLinks::default())
            .link_footnotes(false)
            .string_from_read(content_html.as_bytes(), self.text_width)
        {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "html to text conversion failed, using raw text");
                region.normalized_text()
            }
        };

        let title = if snapshot.title.trim().is_empty() {
            NO_TITLE.to_string()
        } else {
            snapshot.title.clone()
        };

        Ok(ContentResult {
            title,
            plain_text,
            content_html,
            region,
        })
    }
}

/// Plain-text decorator that writes links as `[text](url)` where they occur.
#[derive(Debug, Clone, Default)]
struct InlineLinks {
    open: Vec<String>,
}

impl TextDecorator for InlineLinks {
    type Annotation = ();

    fn decorate_link_start(&mut self, url: &str) -> (String, Self::Annotation) {
        self.open.push(url.to_string());
        ("[".to_string(), ())
    }

    fn decorate_link_end(&mut self) -> String {
        match self.open.pop() {
            Some(url) => format!("]({url})"),
            None => "]".to_string(),
        }
    }

    fn decorate_em_start(&self) -> (String, Self::Annotation) {
        (String::new(), ())
    }

    fn decorate_em_end(&self) -> String {
        String::new()
    }

    fn decorate_strong_start(&self) -> (String, Self::Annotation) {
        (String::new(), ())
    }

    fn decorate_strong_end(&self) -> String {
        String::new()
    }

    fn decorate_strikeout_start(&self) -> (String, Self::Annotation) {
        (String::new(), ())
    }

    fn decorate_strikeout_end(&self) -> String {
        String::new()
    }

    fn decorate_code_start(&self) -> (String, Self::Annotation) {
        (String::new(), ())
    }

    fn decorate_code_end(&self) -> String {
        String::new()
    }

    fn decorate_preformat_first(&self) -> Self::Annotation {}

    fn decorate_preformat_cont(&self) -> Self::Annotation {}

    fn decorate_image(&mut self, src: &str, title: &str) -> (String, Self::Annotation) {
        (format!("![{title}]({src})"), ())
    }

    fn header_prefix(&self, level: usize) -> String {
        "#".repeat(level) + " "
    }

    fn quote_prefix(&self) -> String {
        "> ".to_string()
    }

    fn unordered_item_prefix(&self) -> String {
        "* ".to_string()
    }

    fn ordered_item_prefix(&self, i: i64) -> String {
        format!("{i}. ")
    }

    fn make_subblock_decorator(&self) -> Self {
        Self::default()
    }
}

fn chrome() -> Matcher {
    Matcher::any_of(vec![
        Matcher::tag("header"),
        Matcher::tag("footer"),
        Matcher::tag("nav"),
        Matcher::tag("aside"),
    ])
}

/// Choose the content region of `root`, returned as a new tree.
pub fn select_region(root: &DomNode) -> (DomNode, RegionSource) {
    let chrome = chrome();

    let landmark = Matcher::any_of(vec![Matcher::tag("main"), Matcher::attr("role", "main")]);
    if let Some(node) = root.find_first(&landmark) {
        return (node.without(&chrome), RegionSource::Landmark);
    }

    let containers = [
        Matcher::id("content"),
        Matcher::id("main"),
        Matcher::class_token("content"),
        Matcher::class_token("main"),
    ];
    for container in &containers {
        if let Some(node) = root.find_first(container) {
            return (node.without(&chrome), RegionSource::Container);
        }
    }

    let working = root.without(&chrome);

    let product_like = Matcher::any_of(vec![
        Matcher::class_contains("product"),
        Matcher::class_contains("card"),
        Matcher::class_contains("item"),
    ]);
    let blocks = working.find_outermost(&product_like);
    if blocks.len() >= MIN_PRODUCT_GROUP {
        let group = blocks.into_iter().fold(
            DomNode::new("div").with_attr("class", PRODUCT_GROUP_CLASS),
            |group, block| group.with_child(block.clone()),
        );
        return (group, RegionSource::ProductGroup);
    }

    if let Some(body) = working.find_first(&Matcher::tag("body")) {
        return (body.clone(), RegionSource::Body);
    }

    (working, RegionSource::Document)
}

/// True when `node` is page chrome.
pub fn is_chrome(node: &DomNode) -> bool {
    chrome().matches(node)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(html: &str) -> PageSnapshot {
        PageSnapshot::from_html("https://example.com/", html.to_string())
    }

    #[test]
    fn landmark_wins_and_chrome_is_dropped() {
        let snapshot = snap(
            r#"<html><head><title>Guide</title></head><body>
                <header>Site Header</header>
                <nav>Menu Links</nav>
                <main><header>Inner Banner</header><h1>Article</h1><p>Body paragraph.</p>
                  <aside>Related Sidebar</aside></main>
                <footer>Copyright Footer</footer>
            </body></html>"#,
        );
        let result = ContentIsolator::default().isolate(&snapshot).unwrap();
        assert_eq!(result.title, "Guide");
        assert!(result.content_html.starts_with("<main>"));
        assert!(result.plain_text.contains("Body paragraph."));
        for chrome_text in ["Site Header", "Menu Links", "Inner Banner", "Related Sidebar", "Copyright Footer"] {
            assert!(!result.plain_text.contains(chrome_text), "{chrome_text} leaked");
            assert!(!result.content_html.contains(chrome_text), "{chrome_text} leaked");
        }
    }

    #[test]
    fn role_main_counts_as_landmark() {
        let root = snap(r#"<body><div id="content">Other</div><section role="MAIN">Primary</section></body>"#)
            .dom_root;
        let (region, source) = select_region(&root);
        assert_eq!(source, RegionSource::Landmark);
        assert_eq!(region.normalized_text(), "Primary");
    }

    #[test]
    fn container_id_before_class() {
        let root = snap(
            r#"<body><div class="main">By class</div><div id="Content">By id <nav>skip</nav></div></body>"#,
        )
        .dom_root;
        let (region, source) = select_region(&root);
        assert_eq!(source, RegionSource::Container);
        assert_eq!(region.normalized_text(), "By id");
    }

    #[test]
    fn product_blocks_are_grouped_in_order() {
        let root = snap(
            r#"<body>
                <nav><div class="menu-item">Nav item</div></nav>
                <h1>Results</h1>
                <div class="product-tile">First<span class="item-price">1</span></div>
                <p>spacer</p>
                <li class="CardView">Second</li>
                <div class="list-item">Third</div>
                <footer><div class="footer-item">Footer item</div></footer>
            </body>"#,
        )
        .dom_root;
        let (region, source) = select_region(&root);
        assert_eq!(source, RegionSource::ProductGroup);
        assert_eq!(region.attr("class"), Some(PRODUCT_GROUP_CLASS));
        let texts: Vec<String> = region.elements().map(|e| e.normalized_text()).collect();
        assert_eq!(texts, vec!["First1", "Second", "Third"]);
    }

    #[test]
    fn too_few_products_falls_back_to_body() {
        let root = snap(
            r#"<body><header>Top</header><div class="product">Only</div><div class="card">Two</div><p>Text</p></body>"#,
        )
        .dom_root;
        let (region, source) = select_region(&root);
        assert_eq!(source, RegionSource::Body);
        assert_eq!(region.tag, "body");
        assert_eq!(region.normalized_text(), "OnlyTwoText");
    }

    #[test]
    fn blank_document_has_no_region() {
        let err = ContentIsolator::default().isolate(&snap("")).unwrap_err();
        assert_eq!(err.kind(), "no_content_region");
    }

    #[test]
    fn links_stay_inline_with_their_text() {
        let snapshot = snap(
            r#"<main><p>See <a href="https://example.com/a">the page</a> and more text here.</p>
               <ul><li><a href="/b">second</a></li></ul></main>"#,
        );
        let result = ContentIsolator::new(60).isolate(&snapshot).unwrap();
        assert!(
            result.plain_text.contains("See [the page](https://example.com/a) and more text"),
            "{}",
            result.plain_text
        );
        assert!(result.plain_text.contains("[second](/b)"), "{}", result.plain_text);
        assert!(!result.plain_text.contains("[1]"));
        assert!(is_chrome(&DomNode::new("nav")));
    }

    #[test]
    fn deeply_nested_page_is_isolated_on_a_small_stack() {
        let levels = 20_000;
        let html = format!(
            "<html><body><main>{}<p>buried</p>{}</main></body></html>",
            "<div>".repeat(levels),
            "</div>".repeat(levels)
        );
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(move || {
                let snapshot = snap(&html);
                ContentIsolator::default().isolate(&snapshot).map(|r| r.plain_text)
            })
            .unwrap();
        let text = handle.join().expect("isolation thread overflowed").unwrap();
        assert!(text.contains("buried"));
    }
}
