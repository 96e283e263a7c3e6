//! Markdown serialization of cleaned content clones, plus the clean-up pass
//! that prepares a clone for it.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::dom::normalize_url;
use crate::fragment::{formula_text, FragmentElement, FragmentNode};

pub const IMAGE_TOKEN_PREFIX: &str = "__CED_IMAGE_";
pub const IMAGE_TOKEN_SUFFIX: &str = "__";
pub const IMAGE_INDEX_ATTR: &str = "data-ced-image-index";

static BLANK_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").expect("static regex"));
static MARKDOWN_META: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([\\`*_{}\[\]()#+\-.!])").expect("static regex"));
static SPACE_RUNS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s{2,}").expect("static regex"));

pub fn image_token(index: usize) -> String {
    format!("{IMAGE_TOKEN_PREFIX}{index}{IMAGE_TOKEN_SUFFIX}")
}

pub fn escape_markdown(text: &str) -> String {
    MARKDOWN_META.replace_all(text, r"\$1").into_owned()
}

pub fn collapse_blank_lines(text: &str) -> String {
    BLANK_RUNS.replace_all(text, "\n\n").into_owned()
}

pub fn to_markdown(root: &FragmentElement, base: &Url) -> String {
    let out = walk_element(root, "", base);
    collapse_blank_lines(&out)
}

fn walk(node: &FragmentNode, parent: &str, base: &Url) -> String {
    match node {
        FragmentNode::Text(text) => escape_markdown(text),
        FragmentNode::Formula { latex, display } => formula_text(latex, *display),
        FragmentNode::Element(el) => walk_element(el, parent, base),
    }
}

fn walk_children(el: &FragmentElement, base: &Url) -> String {
    el.children.iter().map(|c| walk(c, &el.name, base)).collect()
}

fn walk_element(el: &FragmentElement, parent: &str, base: &Url) -> String {
    match el.name.as_str() {
        "p" => {
            let content = walk_children(el, base);
            let trimmed = content.trim();
            if trimmed.is_empty() {
                "\n\n".to_string()
            } else {
                format!("{trimmed}\n\n")
            }
        }
        "br" => "  \n".to_string(),
        "strong" | "b" => format!("**{}**", walk_children(el, base)),
        "em" | "i" => format!("_{}_", walk_children(el, base)),
        "code" if parent == "pre" => walk_children(el, base),
        "code" => format!("`{}`", walk_children(el, base)),
        "pre" => format!("\n```\n{}\n```\n", el.text_content()),
        "ul" => {
            let items: Vec<String> = el
                .child_elements()
                .map(|li| format!("- {}", walk_element(li, &el.name, base)))
                .collect();
            format!("{}\n", items.join("\n"))
        }
        "ol" => {
            let items: Vec<String> = el
                .child_elements()
                .enumerate()
                .map(|(i, li)| format!("{}. {}", i + 1, walk_element(li, &el.name, base)))
                .collect();
            format!("{}\n", items.join("\n"))
        }
        "a" => {
            let href = el.attr("href").map(|h| normalize_url(base, h)).unwrap_or_default();
            format!("[{}]({href})", walk_children(el, base))
        }
        "img" => {
            let alt = el.attr("alt").unwrap_or_default();
            let target = match el.attr(IMAGE_INDEX_ATTR) {
                Some(idx) => format!("{IMAGE_TOKEN_PREFIX}{idx}{IMAGE_TOKEN_SUFFIX}"),
                None => el.attr("src").map(|s| normalize_url(base, s)).unwrap_or_default(),
            };
            format!("![{alt}]({target})")
        }
        "blockquote" => format!("> {}\n", walk_children(el, base)),
        "table" => table_to_markdown(el),
        _ => walk_children(el, base),
    }
}

fn table_to_markdown(table: &FragmentElement) -> String {
    let rows = table.descendants_named("tr");
    let Some(first) = rows.first() else {
        return String::new();
    };
    let render_row = |tr: &FragmentElement| {
        let cells: Vec<String> = tr
            .child_elements()
            .map(|cell| cell.text_content().trim().replace('|', "\\|"))
            .collect();
        format!("| {} |", cells.join(" | "))
    };
    let header = render_row(first);
    let divider = format!(
        "| {} |",
        first.child_elements().map(|_| "---").collect::<Vec<_>>().join(" | ")
    );
    let body: Vec<String> = rows.iter().skip(1).map(|tr| render_row(tr)).collect();
    format!("\n{header}\n{divider}\n{}\n", body.join("\n"))
}

/// Numbers every `<img>` in document order so markdown can refer to it.
pub fn annotate_images(root: &mut FragmentElement) {
    let mut next = 0usize;
    root.for_each_mut(&mut |el| {
        if el.name == "img" {
            el.set_attr(IMAGE_INDEX_ATTR, next.to_string());
            next += 1;
        }
    });
}

/// Whitespace-normalized LaTeX source.
pub fn normalize_latex_source(value: &str) -> String {
    let joined = value
        .replace('\u{a0}', " ")
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .split('\n')
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    SPACE_RUNS.replace_all(&joined, " ").trim().to_string()
}

fn latex_of(katex: &FragmentElement) -> String {
    let annotations = katex.descendants_named("annotation");
    let chosen = annotations
        .iter()
        .find(|a| a.attr("encoding") == Some("application/x-tex"))
        .or_else(|| annotations.first());
    chosen
        .map(|a| normalize_latex_source(&a.text_content()))
        .unwrap_or_default()
}

fn is_chrome(el: &FragmentElement) -> bool {
    el.name == "button"
        || el.attr("role") == Some("button")
        || el.attr_contains("data-testid", "action-bar")
        || el.attr_contains("class", "action-bar")
        || el.attr_contains("data-testid", "composer")
        || el.attr_contains("data-testid", "chat-input")
        || el.attr_contains("class", "composer")
        || el.attr_contains("class", "chat-input")
}

/// Prepares a text clone for serialization: strips interactive chrome and
/// replaces formula widgets with their LaTeX, collected into `formulas`.
pub fn normalize_clone(root: &mut FragmentElement, formulas: &mut Vec<String>) {
    root.replace_buttons_with_spans();
    root.remove_where(&mut |el| matches!(el.name.as_str(), "script" | "style") || el.has_class("sr-only"));
    root.remove_where(&mut is_chrome);
    replace_formulas(root, false, formulas);
}

fn replace_formulas(el: &mut FragmentElement, in_display: bool, formulas: &mut Vec<String>) {
    for child in &mut el.children {
        let FragmentNode::Element(inner) = child else {
            continue;
        };
        let display = in_display || inner.has_class("katex-display");
        if inner.has_class("katex") {
            let latex = latex_of(inner);
            if !latex.is_empty() {
                formulas.push(latex.clone());
                *child = FragmentNode::Formula { latex, display };
                continue;
            }
        }
        replace_formulas(inner, display, formulas);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markdown_metacharacters() {
        assert_eq!(escape_markdown("a*b_c [x](y) #1 v1.2!"), r"a\*b\_c \[x\]\(y\) \#1 v1\.2\!");
    }

    #[test]
    fn latex_source_is_flattened() {
        assert_eq!(normalize_latex_source("  a\u{a0}+\r\n\n   b  \n c   d "), "a + b c d");
    }

    #[test]
    fn blank_line_runs_collapse() {
        assert_eq!(collapse_blank_lines("a\n\n\n\nb\n\nc"), "a\n\nb\n\nc");
    }
}
