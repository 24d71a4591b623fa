//! Owned DOM tree used by every stage after retrieval.
//!
//! Documents are parsed with `scraper` and copied into `DomNode`, a plain
//! owned tree with top-down traversal only. Stages that need a filtered view
//! build a new tree (`DomNode::without`) instead of mutating a shared one.

use scraper::{ElementRef, Html, Node};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Elements serialized without a closing tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source",
    "track", "wbr",
];

/// Elements whose text is emitted verbatim.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

/// Deepest element nesting kept by `parse_document`. Elements below it are
/// flattened into their text, which bounds every recursive walk of the tree.
pub const MAX_DEPTH: usize = 512;

/// An element with its attributes and ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DomNode {
    /// Lower-case tag name.
    pub tag: String,
    /// Attribute map; ordered so serialization is deterministic.
    pub attrs: BTreeMap<String, String>,
    /// Children in document order.
    pub children: Vec<DomChild>,
}

/// A child of an element: a nested element or a run of text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomChild {
    Element(DomNode),
    Text(String),
}

impl DomNode {
    /// Create an element with no attributes or children.
    pub fn new(tag: &str) -> Self {
        Self {
            tag: tag.to_ascii_lowercase(),
            attrs: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    /// Builder-style attribute setter.
    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.attrs.insert(name.to_string(), value.to_string());
        self
    }

    /// Builder-style element child.
    pub fn with_child(mut self, child: DomNode) -> Self {
        self.children.push(DomChild::Element(child));
        self
    }

    /// Builder-style text child.
    pub fn with_text(mut self, text: &str) -> Self {
        self.children.push(DomChild::Text(text.to_string()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs.get(name).map(String::as_str)
    }

    /// Whitespace-separated tokens of the `class` attribute.
    pub fn class_tokens(&self) -> impl Iterator<Item = &str> {
        self.attr("class").unwrap_or("").split_whitespace()
    }

    /// Direct element children.
    pub fn elements(&self) -> impl Iterator<Item = &DomNode> {
        self.children.iter().filter_map(|c| match c {
            DomChild::Element(e) => Some(e),
            DomChild::Text(_) => None,
        })
    }

    /// Pre-order traversal of this node and all descendant elements.
    pub fn walk(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }

    /// First node (self included) matching `pred`, in document order.
    pub fn find_first(&self, pred: &dyn NodePredicate) -> Option<&DomNode> {
        self.walk().find(|n| pred.matches(n))
    }

    /// Matching nodes in document order, without descending into a match.
    pub fn find_outermost(&self, pred: &dyn NodePredicate) -> Vec<&DomNode> {
        let mut found = Vec::new();
        collect_outermost(self, pred, &mut found);
        found
    }

    /// Copy of this tree with every descendant element matching `pred` removed.
    ///
    /// The root itself is always kept.
    pub fn without(&self, pred: &dyn NodePredicate) -> DomNode {
        DomNode {
            tag: self.tag.clone(),
            attrs: self.attrs.clone(),
            children: self
                .children
                .iter()
                .filter_map(|child| match child {
                    DomChild::Element(e) if pred.matches(e) => None,
                    DomChild::Element(e) => Some(DomChild::Element(e.without(pred))),
                    DomChild::Text(t) => Some(DomChild::Text(t.clone())),
                })
                .collect(),
        }
    }

    /// Concatenated descendant text, including script and style bodies.
    pub fn text(&self) -> String {
        let mut out = String::new();
        push_text(self, &mut out);
        out
    }

    /// Descendant text with runs of whitespace collapsed to single spaces.
    pub fn normalized_text(&self) -> String {
        self.text().split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// Serialize this element and its subtree as HTML.
    pub fn to_html(&self) -> String {
        let mut out = String::new();
        write_html(self, &mut out);
        out
    }
}

/// Pre-order iterator over a `DomNode` subtree.
pub struct Walk<'a> {
    stack: Vec<&'a DomNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a DomNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        let children: Vec<&DomNode> = node.elements().collect();
        self.stack.extend(children.into_iter().rev());
        Some(node)
    }
}

fn collect_outermost<'a>(node: &'a DomNode, pred: &dyn NodePredicate, out: &mut Vec<&'a DomNode>) {
    if pred.matches(node) {
        out.push(node);
        return;
    }
    for child in node.elements() {
        collect_outermost(child, pred, out);
    }
}

fn push_text(node: &DomNode, out: &mut String) {
    for child in &node.children {
        match child {
            DomChild::Element(e) => push_text(e, out),
            DomChild::Text(t) => out.push_str(t),
        }
    }
}

fn write_html(node: &DomNode, out: &mut String) {
    out.push('<');
    out.push_str(&node.tag);
    for (name, value) in &node.attrs {
        out.push(' ');
        out.push_str(name);
        out.push_str("=\"");
        escape_into(value, true, out);
        out.push('"');
    }
    out.push('>');

    if VOID_ELEMENTS.contains(&node.tag.as_str()) {
        return;
    }

    let raw = RAW_TEXT_ELEMENTS.contains(&node.tag.as_str());
    for child in &node.children {
        match child {
            DomChild::Element(e) => write_html(e, out),
            DomChild::Text(t) if raw => out.push_str(t),
            DomChild::Text(t) => escape_into(t, false, out),
        }
    }

    out.push_str("</");
    out.push_str(&node.tag);
    out.push('>');
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(ch),
        }
    }
}

/// Parse an HTML document into an owned tree rooted at `<html>`.
///
/// The parser is forgiving: any input, including the empty string, yields
/// an `<html>` root with `<head>` and `<body>`. The result is at most
/// `MAX_DEPTH` elements deep.
pub fn parse_document(html: &str) -> DomNode {
    let document = Html::parse_document(html);
    convert_element(document.root_element(), 1)
}

fn convert_element(element: ElementRef<'_>, depth: usize) -> DomNode {
    let value = element.value();
    let mut node = DomNode::new(value.name());
    for (name, attr_value) in value.attrs() {
        node.attrs.insert(name.to_string(), attr_value.to_string());
    }

    for child in element.children() {
        match child.value() {
            Node::Element(_) => {
                let Some(child_element) = ElementRef::wrap(child) else {
                    continue;
                };
                if depth < MAX_DEPTH {
                    node.children
                        .push(DomChild::Element(convert_element(child_element, depth + 1)));
                } else {
                    // scraper's text iterator walks the arena without recursing
                    let text: String = child_element.text().collect();
                    if !text.is_empty() {
                        node.children.push(DomChild::Text(text));
                    }
                }
            }
            Node::Text(text) => node.children.push(DomChild::Text(String::from(&**text))),
            _ => {}
        }
    }

    node
}

/// Pluggable element-selection heuristic.
///
/// Closures implement it, so site-specific rules can be swapped in without
/// touching the traversal code.
pub trait NodePredicate: Send + Sync {
    fn matches(&self, node: &DomNode) -> bool;
}

impl<F> NodePredicate for F
where
    F: Fn(&DomNode) -> bool + Send + Sync,
{
    fn matches(&self, node: &DomNode) -> bool {
        self(node)
    }
}

/// Declarative predicate, loadable from configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Matcher {
    /// Tag name equals `name` (case-insensitive).
    Tag { name: String },
    /// The whole `class` attribute contains `value` (case-insensitive).
    ClassContains { value: String },
    /// One class token equals `value` (case-insensitive).
    ClassToken { value: String },
    /// `id` equals `value` (case-insensitive).
    Id { value: String },
    /// Attribute `name` equals `value` (case-insensitive).
    Attr { name: String, value: String },
    /// Tag name equals `name` and the class attribute contains `value`.
    TagWithClass { name: String, value: String },
    AnyOf { any: Vec<Matcher> },
    AllOf { all: Vec<Matcher> },
}

impl Matcher {
    pub fn tag(name: &str) -> Self {
        Matcher::Tag { name: name.into() }
    }

    pub fn class_contains(value: &str) -> Self {
        Matcher::ClassContains {
            value: value.into(),
        }
    }

    pub fn class_token(value: &str) -> Self {
        Matcher::ClassToken {
            value: value.into(),
        }
    }

    pub fn id(value: &str) -> Self {
        Matcher::Id {
            value: value.into(),
        }
    }

    pub fn attr(name: &str, value: &str) -> Self {
        Matcher::Attr {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn tag_with_class(name: &str, value: &str) -> Self {
        Matcher::TagWithClass {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn any_of(any: Vec<Matcher>) -> Self {
        Matcher::AnyOf { any }
    }

    pub fn all_of(all: Vec<Matcher>) -> Self {
        Matcher::AllOf { all }
    }
}

fn class_contains(node: &DomNode, needle: &str) -> bool {
    node.attr("class")
        .map(|c| c.to_lowercase().contains(&needle.to_lowercase()))
        .unwrap_or(false)
}

impl NodePredicate for Matcher {
    fn matches(&self, node: &DomNode) -> bool {
        match self {
            Matcher::Tag { name } => node.tag.eq_ignore_ascii_case(name),
            Matcher::ClassContains { value } => class_contains(node, value),
            Matcher::ClassToken { value } => {
                node.class_tokens().any(|t| t.eq_ignore_ascii_case(value))
            }
            Matcher::Id { value } => node
                .attr("id")
                .map(|id| id.trim().eq_ignore_ascii_case(value))
                .unwrap_or(false),
            Matcher::Attr { name, value } => node
                .attr(name)
                .map(|v| v.trim().eq_ignore_ascii_case(value))
                .unwrap_or(false),
            Matcher::TagWithClass { name, value } => {
                node.tag.eq_ignore_ascii_case(name) && class_contains(node, value)
            }
            Matcher::AnyOf { any } => any.iter().any(|m| m.matches(node)),
            Matcher::AllOf { all } => !all.is_empty() && all.iter().all(|m| m.matches(node)),
        }
    }
}
