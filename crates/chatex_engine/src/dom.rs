use std::cell::RefCell;
use std::collections::HashMap;

use chatex_logging::chatex_warn;
use ego_tree::NodeId;
use regex::{Regex, RegexBuilder};
use scraper::node::Node;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::probe::{MarkupProbe, PageProbe};
use crate::site::{SiteAdapter, SiteKey};

/// Attribute carrying a turn id on cloned markup.
pub const MESSAGE_ID_ATTR: &str = "data-ced-message-id";

/// Selector list matching the exporter's own overlay widgets.
pub const OVERLAY_SELECTOR: &str = ".ced-panel, .ced-floating-button, .ced-toast, .ced-formula-copy-toast, .ced-timeline-bar, .ced-timeline-tooltip, .ced-timeline-preview-toggle, .ced-timeline-preview-panel, .ced-timeline-preview-export, .ced-timeline-export-quick, .ced-timeline-context-menu, .ced-snow-effect-canvas";

pub(crate) fn compile(selector: &str) -> Option<Selector> {
    match Selector::parse(selector) {
        Ok(sel) => Some(sel),
        Err(err) => {
            chatex_warn!("Ignoring unparsable selector {:?}: {:?}", selector, err);
            None
        }
    }
}

/// Site selectors compiled once per document.
pub struct CompiledSite {
    pub adapter: &'static SiteAdapter,
    pub message_turn: Option<Selector>,
    pub role_user: Option<Selector>,
    pub role_assistant: Option<Selector>,
    pub ai_content: Option<Selector>,
    pub user_content: Option<Selector>,
    pub roots: Vec<Selector>,
    pub scroll_containers: Vec<Selector>,
    pub fallback: Vec<Selector>,
    pub active_title: Option<Selector>,
    pub overlay: Option<Selector>,
    pub title_strip: Option<Regex>,
}

impl CompiledSite {
    pub fn new(adapter: &'static SiteAdapter) -> Self {
        let list = |items: &[&str]| items.iter().filter_map(|s| compile(s)).collect::<Vec<_>>();
        let selectors = &adapter.selectors;
        Self {
            adapter,
            message_turn: compile(selectors.message_turn),
            role_user: compile(selectors.role_user),
            role_assistant: compile(selectors.role_assistant),
            ai_content: compile(selectors.ai_content),
            user_content: compile(selectors.user_content),
            roots: list(adapter.root_selectors),
            scroll_containers: list(adapter.scroll_container_selectors),
            fallback: list(adapter.fallback_selectors),
            active_title: adapter.active_title_selector.and_then(compile),
            overlay: compile(OVERLAY_SELECTOR),
            title_strip: RegexBuilder::new(adapter.title_strip_pattern)
                .case_insensitive(true)
                .build()
                .ok(),
        }
    }
}

/// Read-only view of a chat page.
///
/// The parsed tree is never mutated. The only page-side state the engine
/// records is the turn id stamp table.
pub struct LiveDocument {
    html: Html,
    base_url: Url,
    site: CompiledSite,
    probe: Box<dyn PageProbe>,
    stamps: RefCell<HashMap<NodeId, String>>,
    order: HashMap<NodeId, usize>,
}

impl LiveDocument {
    /// Parses captured markup; the site is detected from `base_url`.
    pub fn parse(markup: &str, base_url: Url) -> Self {
        let html = Html::parse_document(markup);
        let probe = MarkupProbe::from_html(&html);
        let site = SiteKey::from_url(&base_url);
        Self::with_probe(html, base_url, site, Box::new(probe))
    }

    pub fn with_probe(
        html: Html,
        base_url: Url,
        site: SiteKey,
        probe: Box<dyn PageProbe>,
    ) -> Self {
        let order = html
            .tree
            .root()
            .descendants()
            .enumerate()
            .map(|(i, node)| (node.id(), i))
            .collect();
        Self {
            html,
            base_url,
            site: CompiledSite::new(site.adapter()),
            probe,
            stamps: RefCell::new(HashMap::new()),
            order,
        }
    }

    /// Replaces the detected site, e.g. when the caller knows better than the host name.
    pub fn with_site(mut self, site: SiteKey) -> Self {
        self.site = CompiledSite::new(site.adapter());
        self
    }

    pub fn html(&self) -> &Html {
        &self.html
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn site(&self) -> &CompiledSite {
        &self.site
    }

    pub fn adapter(&self) -> &'static SiteAdapter {
        self.site.adapter
    }

    pub fn probe(&self) -> &dyn PageProbe {
        self.probe.as_ref()
    }

    pub fn element(&self, id: NodeId) -> Option<ElementRef<'_>> {
        self.html.tree.get(id).and_then(ElementRef::wrap)
    }

    /// Document-order index of a node.
    pub fn position(&self, id: NodeId) -> usize {
        self.order.get(&id).copied().unwrap_or(usize::MAX)
    }

    pub fn stamp(&self, id: NodeId, message_id: &str) {
        self.stamps.borrow_mut().insert(id, message_id.to_string());
    }

    pub fn stamp_of(&self, id: NodeId) -> Option<String> {
        self.stamps.borrow().get(&id).cloned()
    }

    pub(crate) fn stamps(&self) -> std::cell::Ref<'_, HashMap<NodeId, String>> {
        self.stamps.borrow()
    }

    pub fn select_all(&self, selector: &Selector) -> Vec<ElementRef<'_>> {
        self.html.select(selector).collect()
    }

    pub fn query_first(&self, selectors: &[Selector]) -> Option<ElementRef<'_>> {
        selectors.iter().find_map(|sel| self.html.select(sel).next())
    }

    pub fn root_element(&self) -> ElementRef<'_> {
        self.html.root_element()
    }

    pub fn head(&self) -> Option<ElementRef<'_>> {
        self.child_of_root("head")
    }

    pub fn body(&self) -> Option<ElementRef<'_>> {
        self.child_of_root("body")
    }

    pub fn main(&self) -> Option<ElementRef<'_>> {
        self.root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "main")
    }

    fn child_of_root(&self, name: &str) -> Option<ElementRef<'_>> {
        self.root_element()
            .children()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == name)
    }

    /// Text of the `<title>` element.
    pub fn document_title(&self) -> String {
        self.head()
            .into_iter()
            .flat_map(|head| head.descendants())
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "title")
            .map(|el| el.text().collect::<String>())
            .unwrap_or_default()
    }

    /// Absolute form of `raw`, or `raw` itself when it cannot be joined.
    pub fn normalize_url(&self, raw: &str) -> String {
        normalize_url(&self.base_url, raw)
    }

    pub fn in_overlay(&self, element: ElementRef<'_>) -> bool {
        self.site
            .overlay
            .as_ref()
            .is_some_and(|sel| closest(element, sel).is_some())
    }
}

pub fn normalize_url(base: &Url, raw: &str) -> String {
    let raw = raw.trim();
    if raw.is_empty() {
        return String::new();
    }
    base.join(raw)
        .map(|u| u.to_string())
        .unwrap_or_else(|_| raw.to_string())
}

/// Nearest inclusive ancestor matching `selector`.
pub fn closest<'a>(element: ElementRef<'a>, selector: &Selector) -> Option<ElementRef<'a>> {
    std::iter::once(element)
        .chain(element.ancestors().filter_map(ElementRef::wrap))
        .find(|el| selector.matches(el))
}

/// True when `inner` is `outer` or one of its descendants.
pub fn contains(outer: ElementRef<'_>, inner: ElementRef<'_>) -> bool {
    outer.id() == inner.id() || inner.ancestors().any(|node| node.id() == outer.id())
}

pub fn select_first<'a>(element: ElementRef<'a>, selector: Option<&Selector>) -> Option<ElementRef<'a>> {
    element.select(selector?).next()
}

pub fn has_descendant(element: ElementRef<'_>, selector: Option<&Selector>) -> bool {
    select_first(element, selector).is_some()
}

pub fn matches(element: ElementRef<'_>, selector: Option<&Selector>) -> bool {
    selector.is_some_and(|sel| sel.matches(&element))
}

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "blockquote", "dd", "details", "div", "dl", "dt", "figcaption",
    "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6", "header", "hr", "li", "main",
    "nav", "ol", "p", "pre", "section", "summary", "table", "tr", "ul",
];

/// Approximation of rendered text: block elements break lines, `<br>` is a
/// newline, script and style are skipped. Runs of blank lines are kept.
pub fn inner_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_inner_text(*element, &mut out);
    out
}

fn push_inner_text(node: ego_tree::NodeRef<'_, Node>, out: &mut String) {
    for child in node.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(el) => {
                let name = el.name();
                if matches!(name, "script" | "style" | "template" | "noscript") {
                    continue;
                }
                if name == "br" {
                    out.push('\n');
                    continue;
                }
                let block = BLOCK_TAGS.contains(&name);
                if block && !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                push_inner_text(child, out);
                if block && !out.ends_with('\n') {
                    out.push('\n');
                }
                if name == "p" {
                    out.push('\n');
                }
            }
            _ => {}
        }
    }
}

/// Whitespace-collapsed, trimmed text.
pub fn collapsed_text(element: ElementRef<'_>) -> String {
    inner_text(element).split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_text_breaks_blocks() {
        let html = Html::parse_fragment("<div><p>One</p><p>Two<br>Three</p><span>a</span><span>b</span></div>");
        let text = inner_text(html.root_element());
        assert_eq!(text.trim(), "One\n\nTwo\nThree\n\nab");
    }

    #[test]
    fn urls_resolve_against_base() {
        let base = Url::parse("https://chatgpt.com/c/123").unwrap();
        assert_eq!(normalize_url(&base, "/img/a.png"), "https://chatgpt.com/img/a.png");
        assert_eq!(normalize_url(&base, "data:image/png;base64,AA"), "data:image/png;base64,AA");
        assert_eq!(normalize_url(&base, "  "), "");
    }
}
