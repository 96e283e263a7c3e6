//! Isolated copies of the conversation region for visual exports.
//!
//! The snapshot is an owned [`FragmentElement`] tree. Everything that needs
//! the live page (selector matches, geometry, canvas pixels) is read here,
//! so later async stages only touch owned data.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use ego_tree::NodeId;
use scraper::{ElementRef, Selector};
use url::Url;

use crate::cache::ImageCache;
use crate::color::{color_to_rgb, contrast_ratio, is_dark_color, is_transparent_color, sanitize_style_string};
use crate::dom::{self, closest, contains, has_descendant, matches, normalize_url, LiveDocument, MESSAGE_ID_ATTR};
use crate::extract::find_conversation_root;
use crate::fragment::{escape_html, FragmentElement, FragmentNode};
use crate::resolve::should_skip_inlining;
use crate::site::SiteKey;
use crate::Turn;

const FORMULA_NODE_CLASS: &str = "ced-formula-node";
const FORMULA_HOOK_ATTRS: &[&str] = &[
    "role",
    "tabindex",
    "title",
    "aria-label",
    "data-ced-formula-latex",
    "data-ced-formula-display",
];
const SNAPSHOT_ICON_PX: u32 = 48;

static INPUT_LIKE: LazyLock<Option<Selector>> = LazyLock::new(|| {
    dom::compile(r#"textarea, [role="textbox"], [contenteditable="true"], input[type="text"], input[type="search"]"#)
});
static INPUT_CONTAINER: LazyLock<Option<Selector>> = LazyLock::new(|| {
    dom::compile(r#"[data-testid*="composer"], [data-testid*="chat-input"], [data-testid*="message-input"], [class*="composer"], [class*="chat-input"], form, footer"#)
});
static COMPOSER_CHROME: LazyLock<Option<Selector>> = LazyLock::new(|| {
    dom::compile(r#"[data-testid*="composer"], [data-testid*="chat-input"], [data-testid*="message-input"], [class*="composer"], [class*="chat-input"]"#)
});
static CITATION: LazyLock<Option<Selector>> =
    LazyLock::new(|| dom::compile(r#".citation, .source-citation, [data-testid*="citation"]"#));

/// Snapshot of the conversation region.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub root: FragmentElement,
    /// Live element the snapshot was cloned from.
    pub source_root: NodeId,
}

fn live_matches(doc: &LiveDocument, el: &FragmentElement, selector: Option<&Selector>) -> bool {
    el.origin
        .and_then(|id| doc.element(id))
        .is_some_and(|live| matches(live, selector))
}

/// Clones the conversation root enclosing `turns`.
///
/// Extension overlays, formula-copy buttons and formula hook state are
/// removed, canvases are baked to images, and composer/input chrome is
/// stripped without ever removing a message node or one of its ancestors.
/// With `include_all_turns` false, turns whose stamped id is not in `turns`
/// are dropped. Returns `None` when no turn node is still in the document.
pub fn build_export_snapshot_root(doc: &LiveDocument, turns: &[Turn], include_all_turns: bool) -> Option<Snapshot> {
    let turn_nodes: Vec<ElementRef<'_>> = turns.iter().filter_map(|t| doc.element(t.node)).collect();
    let first = *turn_nodes.first()?;
    let source_root = find_conversation_root(doc, first, &turn_nodes)?;

    let removable = composer_chrome(doc, source_root);
    let selected: HashSet<&str> = turns.iter().map(|t| t.id.as_str()).collect();
    let site = doc.site();

    let mut root = FragmentElement::from_live(doc, source_root);
    root.remove_where(&mut |el| live_matches(doc, el, site.overlay.as_ref()));
    root.for_each_mut(&mut |el| {
        if el.has_class(FORMULA_NODE_CLASS) {
            el.remove_class(FORMULA_NODE_CLASS);
            for attr in FORMULA_HOOK_ATTRS {
                el.remove_attr(attr);
            }
        }
    });
    root.remove_where(&mut |el| el.has_class("ced-formula-copy-btn"));
    if !include_all_turns {
        root.remove_where(&mut |el| {
            live_matches(doc, el, site.message_turn.as_ref())
                && el.attr(MESSAGE_ID_ATTR).is_some_and(|id| !selected.contains(id))
        });
    }
    root.bake_canvases(doc);
    root.remove_where(&mut |el| el.origin.is_some_and(|id| removable.contains(&id)));

    Some(Snapshot {
        root,
        source_root: source_root.id(),
    })
}

fn composer_chrome(doc: &LiveDocument, root: ElementRef<'_>) -> HashSet<NodeId> {
    let site = doc.site();
    let turn = site.message_turn.as_ref();
    let mut removable = HashSet::new();
    let mut add_if_safe = |node: ElementRef<'_>| {
        if node.id() == root.id() {
            return;
        }
        if matches(node, site.overlay.as_ref()) {
            removable.insert(node.id());
            return;
        }
        if matches(node, turn) || has_descendant(node, turn) {
            return;
        }
        removable.insert(node.id());
    };

    if let Some(inputs) = INPUT_LIKE.as_ref() {
        for input in root.select(inputs) {
            let container = INPUT_CONTAINER
                .as_ref()
                .and_then(|sel| closest(input, sel))
                .filter(|c| contains(root, *c));
            add_if_safe(container.unwrap_or(input));
        }
    }
    if let Some(chrome) = COMPOSER_CHROME.as_ref() {
        for node in root.select(chrome) {
            add_if_safe(node);
        }
    }
    removable
}

/// Data URLs already known for snapshot images: turn descriptors first,
/// then the shared cache, each under raw and normalized keys.
pub fn known_image_map(turns: &[Turn], cache: &ImageCache, base: &Url) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for img in turns.iter().flat_map(|t| &t.images) {
        let Some(data) = img.data_url.as_ref().filter(|_| !img.src.is_empty()) else {
            continue;
        };
        map.insert(img.src.clone(), data.clone());
        let normalized = normalize_url(base, &img.src);
        if !normalized.is_empty() {
            map.insert(normalized, data.clone());
        }
    }
    for (key, value) in cache.entries() {
        let normalized = normalize_url(base, &key);
        map.entry(key).or_insert_with(|| value.clone());
        if !normalized.is_empty() {
            map.entry(normalized).or_insert(value);
        }
    }
    map
}

/// Points every `<img>` with a known source at its data URL and drops its
/// `srcset`. Returns how many images changed.
pub fn apply_image_map(root: &mut FragmentElement, map: &HashMap<String, String>, base: &Url) -> usize {
    let mut applied = 0;
    root.for_each_mut(&mut |el| {
        if el.name != "img" {
            return;
        }
        let Some(src) = el.attr("src").map(str::to_string) else {
            return;
        };
        if src.starts_with("data:") {
            return;
        }
        let normalized = normalize_url(base, &src);
        if let Some(data) = map.get(&src).or_else(|| map.get(&normalized)) {
            el.remove_attr("srcset");
            el.set_attr("src", data.clone());
            applied += 1;
        }
    });
    applied
}

fn image_dimension(doc: &LiveDocument, img: &FragmentElement, attr: &str) -> u32 {
    let from_attr = img
        .attr(attr)
        .and_then(|v| v.trim().trim_end_matches("px").parse::<f64>().ok())
        .filter(|v| v.is_finite() && *v > 0.0);
    let from_rect = || {
        let rect = doc.probe().rect(doc.element(img.origin?)?)?;
        Some(if attr == "width" { rect.width } else { rect.height })
    };
    from_attr.or_else(from_rect).map(|v| v.round().max(0.0) as u32).unwrap_or(0)
}

fn skip_snapshot_image(doc: &LiveDocument, img: &FragmentElement, src: &str) -> bool {
    let in_citation = img
        .origin
        .and_then(|id| doc.element(id))
        .is_some_and(|live| CITATION.as_ref().is_some_and(|sel| closest(live, sel).is_some()));
    if in_citation {
        return true;
    }
    let width = image_dimension(doc, img, "width");
    let height = image_dimension(doc, img, "height");
    if width > 0 && height > 0 && width <= SNAPSHOT_ICON_PX && height <= SNAPSHOT_ICON_PX {
        return true;
    }
    should_skip_inlining(src)
}

/// Remote `http(s)` image sources in the snapshot that still need fetching,
/// normalized and in document order. Citation thumbnails, icons and
/// denylisted hosts are skipped.
pub fn pending_remote_images(
    doc: &LiveDocument,
    root: &FragmentElement,
    map: &HashMap<String, String>,
) -> Vec<String> {
    let base = doc.base_url();
    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    let mut images: Vec<&FragmentElement> = root.descendants_named("img");
    if root.name == "img" {
        images.insert(0, root);
    }
    for img in images {
        let Some(src) = img.attr("src") else {
            continue;
        };
        let normalized = normalize_url(base, src);
        if src.starts_with("data:") || map.contains_key(src) || map.contains_key(&normalized) {
            continue;
        }
        if skip_snapshot_image(doc, img, &normalized) {
            continue;
        }
        let lower = normalized.to_ascii_lowercase();
        if (lower.starts_with("http:") || lower.starts_with("https:")) && seen.insert(normalized.clone()) {
            pending.push(normalized);
        }
    }
    pending
}

/// The parts of the live page an exported HTML document reuses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageShell {
    /// Inner markup of `<head>`, scripts removed and title replaced.
    pub head_html: String,
    pub html_attrs: String,
    pub body_attrs: String,
    pub origin: String,
    /// Page background, modern color syntax converted.
    pub background: String,
}

pub fn page_shell(doc: &LiveDocument, title: &str) -> PageShell {
    let mut head = doc
        .head()
        .map(|h| FragmentElement::from_live(doc, h))
        .unwrap_or_else(|| FragmentElement::new("head"));
    head.remove_where(&mut |el| el.name == "script");
    let mut has_title = false;
    head.for_each_mut(&mut |el| {
        if el.name == "title" && !has_title {
            el.children = vec![FragmentNode::Text(title.to_string())];
            has_title = true;
        }
    });
    if !has_title {
        let mut title_el = FragmentElement::new("title");
        title_el.children.push(FragmentNode::Text(title.to_string()));
        head.children.push(FragmentNode::Element(title_el));
    }

    let attrs_of = |el: Option<ElementRef<'_>>| {
        el.map(|el| {
            el.value()
                .attrs()
                .map(|(k, v)| format!("{k}=\"{}\"", escape_html(v)))
                .collect::<Vec<_>>()
                .join(" ")
        })
        .unwrap_or_default()
    };
    let html_el = Some(doc.root_element());
    let background = doc
        .probe()
        .background_color(doc.html())
        .map(|bg| sanitize_style_string(&bg))
        .filter(|bg| !bg.trim().is_empty())
        .unwrap_or_else(|| "#ffffff".to_string());

    PageShell {
        head_html: head.inner_html(),
        html_attrs: attrs_of(html_el),
        body_attrs: attrs_of(doc.body()),
        origin: doc.base_url().origin().ascii_serialization(),
        background,
    }
}

const HIDDEN_CHROME_STYLE: &str = r#"<style>
  .ced-floating-button, .ced-panel, .ced-toast, .ced-formula-copy-toast, .ced-formula-copy-btn, .ced-timeline-bar, .ced-timeline-tooltip, .ced-timeline-preview-toggle, .ced-timeline-preview-panel, .ced-timeline-preview-export, .ced-timeline-export-quick, .ced-timeline-context-menu, .ced-snow-effect-canvas {
    display: none !important;
  }
  [data-testid*="composer"],
  [data-testid*="chat-input"],
  [data-testid*="message-input"],
  [class*="composer"],
  [class*="chat-input"] {
    display: none !important;
  }
</style>"#;

/// Standalone HTML document around a snapshot.
pub fn build_full_html_document(shell: &PageShell, snapshot_root: &FragmentElement) -> String {
    format!(
        "<!DOCTYPE html>\n<html {html_attrs}>\n<head>\n<meta charset=\"UTF-8\">\n<meta name=\"viewport\" content=\"width=device-width, initial-scale=1.0\">\n<base href=\"{base}\">\n{head}\n{style}\n</head>\n<body {body_attrs}>\n{root}\n</body>\n</html>",
        html_attrs = shell.html_attrs,
        base = escape_html(&format!("{}/", shell.origin)),
        head = shell.head_html,
        style = HIDDEN_CHROME_STYLE,
        body_attrs = shell.body_attrs,
        root = snapshot_root.outer_html(),
    )
}

/// Value of `property` in an element's inline style.
pub(crate) fn style_value(el: &FragmentElement, property: &str) -> Option<String> {
    el.attr("style")?.split(';').find_map(|decl| {
        let (name, value) = decl.split_once(':')?;
        name.trim()
            .eq_ignore_ascii_case(property)
            .then(|| value.replace("!important", "").trim().to_string())
    })
}

fn set_important(el: &mut FragmentElement, property: &str, value: &str) {
    el.append_style(&format!("{property}: {value} !important"));
}

/// Claude on a dark theme: gives `pre`/`code` readable colors when the
/// text contrast is below 4.5.
pub fn enhance_dark_code_contrast(root: &mut FragmentElement, site: SiteKey, background: &str) {
    if site != SiteKey::Claude {
        return;
    }
    let page_bg = color_to_rgb(background, [255, 255, 255]);
    if !is_dark_color(page_bg) {
        return;
    }
    enhance_code_nodes(root, page_bg, false);
}

fn enhance_code_nodes(el: &mut FragmentElement, page_bg: [u8; 3], in_pre: bool) {
    let is_pre = el.name == "pre";
    if is_pre || el.name == "code" {
        let text = color_to_rgb(&style_value(el, "color").unwrap_or_default(), [230, 237, 243]);
        let bg_raw = style_value(el, "background-color").unwrap_or_default();
        let transparent = is_transparent_color(&bg_raw);
        let bg = if transparent { page_bg } else { color_to_rgb(&bg_raw, page_bg) };
        let low_contrast = contrast_ratio(text, bg) < 4.5;
        if low_contrast {
            set_important(el, "color", "#e6edf3");
        }
        if is_pre && (low_contrast || transparent) {
            set_important(el, "background", "#111827");
            set_important(el, "border-radius", "10px");
        } else if !is_pre && !in_pre {
            set_important(el, "background", "rgba(148, 163, 184, 0.16)");
            set_important(el, "padding", "0.12em 0.34em");
            set_important(el, "border-radius", "6px");
        }
    }
    for child in &mut el.children {
        if let FragmentNode::Element(inner) = child {
            enhance_code_nodes(inner, page_bg, in_pre || is_pre);
        }
    }
}
