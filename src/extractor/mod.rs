//! Page extraction over the serialized DOM of the active tab.
//!
//! Each section (text, metadata, structure, testable elements) is computed
//! independently. A section that fails, or panics on a malformed tree, is
//! logged and replaced by its default value; the other sections are still
//! returned.

mod metadata;
mod structure;
mod testable;
mod text;

use std::panic::{AssertUnwindSafe, catch_unwind};

use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use tracing::warn;
use url::Url;

use crate::error::ExtractionError;
use crate::types::{PageMetadata, PageSnapshot, PageStructure, RawPage, TestableElements};

/// A parsed page, ready for any of the snapshot sections.
pub struct PageDocument {
    document: Html,
    url: String,
    base: Option<Url>,
}

impl PageDocument {
    pub fn parse(page: &RawPage) -> Self {
        Self {
            document: Html::parse_document(&page.html),
            url: page.url.clone(),
            base: Url::parse(&page.url).ok(),
        }
    }

    pub fn text(&self) -> String {
        guarded("text", || text::extract(self))
    }

    pub fn metadata(&self) -> PageMetadata {
        guarded("metadata", || metadata::extract(self))
    }

    pub fn structure(&self) -> PageStructure {
        guarded("structure", || structure::extract(self))
    }

    pub fn testable_elements(&self) -> TestableElements {
        guarded("testable elements", || testable::extract(self))
    }

    pub fn snapshot(&self) -> PageSnapshot {
        PageSnapshot {
            text: self.text(),
            metadata: self.metadata(),
            structure: self.structure(),
            testable_elements: self.testable_elements(),
        }
    }

    fn select(&self, section: &'static str, css: &str) -> Result<Vec<ElementRef<'_>>, ExtractionError> {
        let selector = selector(section, css)?;
        Ok(self.document.select(&selector).collect())
    }

    fn first(&self, section: &'static str, css: &str) -> Result<Option<ElementRef<'_>>, ExtractionError> {
        let selector = selector(section, css)?;
        Ok(self.document.select(&selector).next())
    }

    fn host(&self) -> Option<&str> {
        self.base.as_ref().and_then(|u| u.host_str())
    }

    /// Resolve `href` against the page URL; unresolvable values are returned as-is.
    fn resolve(&self, href: &str) -> String {
        match &self.base {
            Some(base) => base
                .join(href)
                .map(|u| u.to_string())
                .unwrap_or_else(|_| href.to_string()),
            None => href.to_string(),
        }
    }
}

/// Parse `page` and produce every snapshot section.
pub fn snapshot(page: &RawPage) -> PageSnapshot {
    PageDocument::parse(page).snapshot()
}

fn guarded<T: Default>(section: &'static str, f: impl FnOnce() -> Result<T, ExtractionError>) -> T {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value,
        Ok(Err(err)) => {
            warn!(error = %err, "extraction section failed");
            T::default()
        }
        Err(_) => {
            warn!(section, "extraction section panicked");
            T::default()
        }
    }
}

fn selector(section: &'static str, css: &str) -> Result<Selector, ExtractionError> {
    Selector::parse(css)
        .map_err(|e| ExtractionError::new(section, format!("invalid selector `{css}`: {e:?}")))
}

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "div", "dl", "dt", "fieldset",
    "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr",
    "li", "main", "nav", "ol", "p", "pre", "section", "table", "td", "th", "tr", "ul",
];

/// True when the element itself would not render.
fn hides_content(element: &ElementRef<'_>) -> bool {
    let value = element.value();
    if matches!(
        value.name(),
        "script" | "style" | "noscript" | "template" | "svg" | "head"
    ) {
        return true;
    }
    if value.attr("hidden").is_some() || value.attr("aria-hidden") == Some("true") {
        return true;
    }
    if value.name() == "input"
        && value
            .attr("type")
            .is_some_and(|t| t.eq_ignore_ascii_case("hidden"))
    {
        return true;
    }
    match value.attr("style") {
        Some(style) => {
            let style: String = style
                .chars()
                .filter(|c| !c.is_whitespace())
                .collect::<String>()
                .to_ascii_lowercase();
            style.contains("display:none") || style.contains("visibility:hidden")
        }
        None => false,
    }
}

/// True when neither the element nor any ancestor hides it.
fn is_visible(element: &ElementRef<'_>) -> bool {
    !hides_content(element)
        && element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .all(|a| !hides_content(&a))
}

/// Rendered text of `element`, whitespace-normalized; empty when hidden.
fn visible_text(element: &ElementRef<'_>) -> String {
    if !is_visible(element) {
        return String::new();
    }
    let mut raw = String::new();
    collect_text(element, &mut raw);
    normalize_whitespace(&raw)
}

fn collect_text(element: &ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child) = ElementRef::wrap(child) else {
                    continue;
                };
                if hides_content(&child) {
                    continue;
                }
                let block = BLOCK_TAGS.contains(&child.value().name());
                if block {
                    out.push(' ');
                }
                collect_text(&child, out);
                if block {
                    out.push(' ');
                }
            }
            _ => {}
        }
    }
}

/// Collapse whitespace runs to single spaces and trim.
pub fn normalize_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn attr(element: &ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn attr_or_empty(element: &ElementRef<'_>, name: &str) -> String {
    attr(element, name).unwrap_or_default()
}
