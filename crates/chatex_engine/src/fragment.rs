//! Owned, mutable copies of page subtrees.
//!
//! Clones remember the live node they came from (`origin`) so selector
//! questions can still be answered against the live document.

use std::collections::HashMap;

use ego_tree::{NodeId, NodeRef};
use scraper::node::Node;
use scraper::ElementRef;

use crate::dom::{LiveDocument, MESSAGE_ID_ATTR};

#[derive(Debug, Clone, PartialEq)]
pub enum FragmentNode {
    Element(FragmentElement),
    Text(String),
    /// LaTeX lifted out of a rendered formula widget.
    Formula { latex: String, display: bool },
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FragmentElement {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<FragmentNode>,
    pub origin: Option<NodeId>,
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

impl FragmentElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Deep copy of a live element. Turn id stamps become `data-ced-message-id`.
    pub fn from_live(doc: &LiveDocument, element: ElementRef<'_>) -> Self {
        let stamps = doc.stamps();
        clone_element(element, &stamps)
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn has_attr(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }

    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attrs.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value,
            None => self.attrs.push((name.to_string(), value)),
        }
    }

    pub fn remove_attr(&mut self, name: &str) {
        self.attrs.retain(|(k, _)| k != name);
    }

    pub fn has_class(&self, class: &str) -> bool {
        self.attr("class")
            .is_some_and(|c| c.split_whitespace().any(|item| item == class))
    }

    pub fn remove_class(&mut self, class: &str) {
        if let Some(current) = self.attr("class") {
            let kept: Vec<&str> = current.split_whitespace().filter(|c| *c != class).collect();
            let kept = kept.join(" ");
            self.set_attr("class", kept);
        }
    }

    /// Substring test on an attribute value, like CSS `[name*="needle"]`.
    pub fn attr_contains(&self, name: &str, needle: &str) -> bool {
        self.attr(name).is_some_and(|v| v.contains(needle))
    }

    pub fn append_style(&mut self, declaration: &str) {
        let style = match self.attr("style").map(str::trim) {
            Some(existing) if !existing.is_empty() => {
                let sep = if existing.ends_with(';') { " " } else { "; " };
                format!("{existing}{sep}{declaration}")
            }
            _ => declaration.to_string(),
        };
        self.set_attr("style", style);
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &FragmentElement> {
        self.children.iter().filter_map(|c| match c {
            FragmentNode::Element(el) => Some(el),
            _ => None,
        })
    }

    /// Pre-order descendants, excluding `self`.
    pub fn descendants(&self) -> Vec<&FragmentElement> {
        let mut out = Vec::new();
        fn walk<'a>(el: &'a FragmentElement, out: &mut Vec<&'a FragmentElement>) {
            for child in el.child_elements() {
                out.push(child);
                walk(child, out);
            }
        }
        walk(self, &mut out);
        out
    }

    pub fn descendants_named(&self, name: &str) -> Vec<&FragmentElement> {
        self.descendants()
            .into_iter()
            .filter(|el| el.name == name)
            .collect()
    }

    /// Visits `self` and every descendant element, parents first.
    pub fn for_each_mut(&mut self, f: &mut dyn FnMut(&mut FragmentElement)) {
        f(self);
        for child in &mut self.children {
            if let FragmentNode::Element(el) = child {
                el.for_each_mut(f);
            }
        }
    }

    /// Removes every descendant element for which `pred` holds, with its
    /// subtree. Returns how many were removed.
    pub fn remove_where(&mut self, pred: &mut dyn FnMut(&FragmentElement) -> bool) -> usize {
        let mut removed = 0;
        self.children.retain(|child| match child {
            FragmentNode::Element(el) if pred(el) => {
                removed += 1;
                false
            }
            _ => true,
        });
        for child in &mut self.children {
            if let FragmentNode::Element(el) = child {
                removed += el.remove_where(pred);
            }
        }
        removed
    }

    /// Replaces descendant elements: `f` returns `Some(node)` to swap an element
    /// out. Replaced subtrees are not visited further.
    pub fn replace_where(&mut self, f: &mut dyn FnMut(&FragmentElement) -> Option<FragmentNode>) {
        for child in &mut self.children {
            if let FragmentNode::Element(el) = child {
                if let Some(replacement) = f(el) {
                    *child = replacement;
                    continue;
                }
                el.replace_where(f);
            }
        }
    }

    /// `<button>`s become `<span>`s keeping every attribute but `type` and `aria-pressed`.
    pub fn replace_buttons_with_spans(&mut self) {
        for child in &mut self.children {
            if let FragmentNode::Element(el) = child {
                if el.name == "button" {
                    el.name = "span".to_string();
                    el.remove_attr("type");
                    el.remove_attr("aria-pressed");
                }
                el.replace_buttons_with_spans();
            }
        }
    }

    /// Swaps `<canvas>` elements for `<img>`s holding their current pixels.
    pub fn bake_canvases(&mut self, doc: &LiveDocument) {
        self.replace_where(&mut |el| {
            if el.name != "canvas" {
                return None;
            }
            let live = el.origin.and_then(|id| doc.element(id))?;
            let data_url = doc.probe().canvas_data_url(live)?;
            let mut img = FragmentElement::new("img");
            img.set_attr("src", data_url);
            for dim in ["width", "height"] {
                if let Some(value) = live.value().attr(dim).filter(|v| !v.is_empty()) {
                    img.set_attr(dim, value);
                }
            }
            if let Some(class) = el.attr("class").filter(|v| !v.is_empty()) {
                img.set_attr("class", class);
            }
            if let Some(style) = el.attr("style") {
                img.set_attr("style", style);
            }
            Some(FragmentNode::Element(img))
        });
    }

    /// Concatenated text, formulas rendered with their `$` delimiters.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        push_text(self, &mut out);
        out
    }

    pub fn inner_html(&self) -> String {
        let mut out = String::new();
        for child in &self.children {
            write_node(child, &self.name, &mut out);
        }
        out
    }

    pub fn outer_html(&self) -> String {
        let mut out = String::new();
        write_element(self, &mut out);
        out
    }

    pub fn attrs_html(&self) -> String {
        self.attrs
            .iter()
            .map(|(k, v)| format!("{k}=\"{}\"", escape_attr(v)))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn clone_element(element: ElementRef<'_>, stamps: &HashMap<NodeId, String>) -> FragmentElement {
    let value = element.value();
    let mut attrs: Vec<(String, String)> = value
        .attrs()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    if let Some(stamp) = stamps.get(&element.id()) {
        attrs.retain(|(k, _)| k != MESSAGE_ID_ATTR);
        attrs.push((MESSAGE_ID_ATTR.to_string(), stamp.clone()));
    }
    FragmentElement {
        name: value.name().to_string(),
        attrs,
        children: element
            .children()
            .filter_map(|child| clone_node(child, stamps))
            .collect(),
        origin: Some(element.id()),
    }
}

fn clone_node(node: NodeRef<'_, Node>, stamps: &HashMap<NodeId, String>) -> Option<FragmentNode> {
    match node.value() {
        Node::Text(text) => Some(FragmentNode::Text(text.to_string())),
        Node::Element(_) => ElementRef::wrap(node).map(|el| FragmentNode::Element(clone_element(el, stamps))),
        _ => None,
    }
}

pub(crate) fn formula_text(latex: &str, display: bool) -> String {
    if display {
        format!("$${latex}$$")
    } else {
        format!("${latex}$")
    }
}

fn push_text(el: &FragmentElement, out: &mut String) {
    for child in &el.children {
        match child {
            FragmentNode::Text(t) => out.push_str(t),
            FragmentNode::Formula { latex, display } => out.push_str(&formula_text(latex, *display)),
            FragmentNode::Element(inner) => push_text(inner, out),
        }
    }
}

fn write_node(node: &FragmentNode, parent: &str, out: &mut String) {
    match node {
        FragmentNode::Element(el) => write_element(el, out),
        FragmentNode::Text(t) if matches!(parent, "script" | "style") => out.push_str(t),
        FragmentNode::Text(t) => out.push_str(&escape_text(t)),
        FragmentNode::Formula { latex, display } => out.push_str(&escape_text(&formula_text(latex, *display))),
    }
}

fn write_element(el: &FragmentElement, out: &mut String) {
    out.push('<');
    out.push_str(&el.name);
    for (k, v) in &el.attrs {
        out.push(' ');
        out.push_str(k);
        out.push_str("=\"");
        out.push_str(&escape_attr(v));
        out.push('"');
    }
    out.push('>');
    if VOID_ELEMENTS.contains(&el.name.as_str()) {
        return;
    }
    for child in &el.children {
        write_node(child, &el.name, out);
    }
    out.push_str("</");
    out.push_str(&el.name);
    out.push('>');
}

pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
    out
}

pub fn escape_attr(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\u{a0}' => out.push_str("&nbsp;"),
            _ => out.push(c),
        }
    }
    out
}

/// Escaping used for text placed into exported HTML documents.
pub fn escape_html(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn doc(markup: &str) -> LiveDocument {
        LiveDocument::parse(markup, Url::parse("https://chatgpt.com/c/1").unwrap())
    }

    fn body_clone(doc: &LiveDocument) -> FragmentElement {
        FragmentElement::from_live(doc, doc.body().unwrap())
    }

    #[test]
    fn serializes_with_escaping_and_void_elements() {
        let d = doc(r#"<body><p title="a&quot;b">x &lt; y<br><img src="/a.png?x=1&amp;y=2"></p></body>"#);
        let clone = body_clone(&d);
        assert_eq!(
            clone.inner_html(),
            r#"<p title="a&quot;b">x &lt; y<br><img src="/a.png?x=1&amp;y=2"></p>"#
        );
    }

    #[test]
    fn buttons_become_spans_without_type() {
        let d = doc(r#"<body><button type="button" aria-pressed="false" class="b" data-x="1">Go</button></body>"#);
        let mut clone = body_clone(&d);
        clone.replace_buttons_with_spans();
        assert_eq!(clone.inner_html(), r#"<span class="b" data-x="1">Go</span>"#);
    }

    #[test]
    fn remove_where_drops_whole_subtrees() {
        let d = doc(r#"<body><div class="sr-only"><span class="sr-only">a</span></div><p>keep</p></body>"#);
        let mut clone = body_clone(&d);
        let removed = clone.remove_where(&mut |el| el.has_class("sr-only"));
        assert_eq!(removed, 1);
        assert_eq!(clone.inner_html(), "<p>keep</p>");
    }

    #[test]
    fn stamps_are_copied_into_clones() {
        let d = doc(r#"<body><article id="t">Hello there</article></body>"#);
        let article = d.body().unwrap().children().find_map(ElementRef::wrap).unwrap();
        d.stamp(article.id(), "ced-abc-0");
        let clone = body_clone(&d);
        let cloned = clone.child_elements().next().unwrap();
        assert_eq!(cloned.attr(MESSAGE_ID_ATTR), Some("ced-abc-0"));
    }

    #[test]
    fn canvases_bake_into_images() {
        let d = doc(r#"<body><canvas class="chart" width="40" height="20" data-ced-canvas="data:image/png;base64,AAAA"></canvas><canvas></canvas></body>"#);
        let mut clone = body_clone(&d);
        clone.bake_canvases(&d);
        assert_eq!(
            clone.inner_html(),
            r#"<img src="data:image/png;base64,AAAA" width="40" height="20" class="chart"><canvas></canvas>"#
        );
    }
}
