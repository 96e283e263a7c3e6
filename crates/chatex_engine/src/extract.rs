//! Turn extraction: live markup in, ordered and deduplicated turns out.
//!
//! Every step is fail-soft. Selectors that do not parse match nothing, and a
//! page without recognizable turns degrades to the fallback selectors and
//! finally to one synthetic turn covering the conversation root.

use std::collections::HashSet;
use std::sync::LazyLock;

use chatex_logging::{chatex_debug, chatex_info};
use regex::Regex;
use scraper::{ElementRef, Selector};

use crate::dom::{self, closest, collapsed_text, contains, has_descendant, inner_text, matches, select_first, LiveDocument};
use crate::fragment::FragmentElement;
use crate::markdown::{annotate_images, collapse_blank_lines, normalize_clone, to_markdown};
use crate::media::{extract_attachments, extract_images, merge_image_sources};
use crate::signature::{base_signature, normalize_signature_text, short_hash, OccurrenceCounter, SignatureInput};
use crate::site::SiteKey;
use crate::types::preview_of;
use crate::{ParseMode, Role, Turn};

static NAV_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(sidebar|history|toolbar|header|footer|composer|input|search|nav|menu)").expect("static regex")
});
static MESSAGE_HINT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(message|chat|conversation|assistant|user|model|reply)").expect("static regex")
});
static USER_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^a-z])(user|human|you)([^a-z]|$)").expect("static regex"));
static ASSISTANT_WORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(^|[^a-z])(assistant|model|ai|claude|grok|bot)([^a-z]|$)").expect("static regex")
});

static METADATA_CARRIER: LazyLock<Option<Selector>> = LazyLock::new(|| {
    dom::compile("[data-message-author-role], [data-author-role], [data-role], [data-testid]")
});
static CLAUDE_USER: LazyLock<Option<Selector>> = LazyLock::new(|| {
    dom::compile(r#"div.font-user-message, [data-testid="user-message"], [data-testid*="user-message"]"#)
});
static CLAUDE_ASSISTANT: LazyLock<Option<Selector>> = LazyLock::new(|| {
    dom::compile(r#"div.font-claude-message, [data-testid*="assistant-message"], [data-testid*="claude"]"#)
});
static ASSISTANT_CONTENT_HINT: LazyLock<Option<Selector>> =
    LazyLock::new(|| dom::compile("message-content, .markdown"));
static GROK_ASSISTANT_HINT: LazyLock<Option<Selector>> = LazyLock::new(|| {
    dom::compile(r#".assistant-message, .ai-message, [data-role="assistant"], [data-testid*="assistant"], .markdown"#)
});
static PROSE_HINT: LazyLock<Option<Selector>> =
    LazyLock::new(|| dom::compile("message-content, .markdown, .prose, .text-message"));
static IMG: LazyLock<Option<Selector>> = LazyLock::new(|| dom::compile("img"));

const MAX_SAMPLED_TURNS: usize = 300;
const ROOT_CANDIDATES_PER_SELECTOR: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction {
    pub turns: Vec<Turn>,
    pub mode: ParseMode,
}

/// Extracts the conversation turns of `doc` in document order.
///
/// Stamps every extracted turn node with its id. Returns an empty list only
/// when the page has no plausible content at all.
pub fn collect_conversation_turns(doc: &LiveDocument) -> Extraction {
    let site = doc.site();
    let root = resolve_collection_root(doc);

    let mut nodes = Vec::new();
    if let Some(sel) = site.message_turn.as_ref() {
        if let Some(root) = root {
            nodes.extend(root.select(sel));
        }
        nodes.extend(doc.select_all(sel));
    }
    let nodes: Vec<ElementRef<'_>> = dedupe_message_nodes(doc, nodes)
        .into_iter()
        .filter(|node| is_likely_message_node(doc, *node))
        .collect();

    let mut counter = OccurrenceCounter::default();
    let turns: Vec<Turn> = nodes
        .iter()
        .filter_map(|node| parse_message(doc, *node, &mut counter))
        .collect();
    if !turns.is_empty() {
        chatex_debug!("Extracted {} turns from {} candidate nodes", turns.len(), nodes.len());
        return Extraction {
            turns,
            mode: ParseMode::Normal,
        };
    }

    let fallback = collect_fallback_turns(doc, root);
    if !fallback.is_empty() {
        chatex_info!("Primary selectors found no turns; fallback produced {}", fallback.len());
        return Extraction {
            turns: fallback,
            mode: ParseMode::Fallback,
        };
    }

    chatex_debug!("No conversation content found");
    Extraction {
        turns: Vec::new(),
        mode: ParseMode::Normal,
    }
}

fn collect_fallback_turns<'a>(doc: &'a LiveDocument, root: Option<ElementRef<'a>>) -> Vec<Turn> {
    let Some(scope) = root.or_else(|| doc.body()) else {
        return Vec::new();
    };
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for sel in &doc.site().fallback {
        for node in scope.select(sel) {
            if !seen.insert(node.id()) {
                continue;
            }
            if is_likely_message_node(doc, node) {
                candidates.push(node);
            }
        }
    }
    let top_level = dedupe_message_nodes(doc, candidates);
    let mut counter = OccurrenceCounter::default();
    let turns: Vec<Turn> = top_level
        .into_iter()
        .filter_map(|node| parse_message(doc, node, &mut counter))
        .collect();
    if !turns.is_empty() {
        return turns;
    }
    build_fallback_single_turn(doc, scope).into_iter().collect()
}

fn build_fallback_single_turn(doc: &LiveDocument, root: ElementRef<'_>) -> Option<Turn> {
    let text = inner_text(root).trim().to_string();
    if text.is_empty() {
        return None;
    }
    let markdown = collapse_blank_lines(&text);
    let site = doc.adapter().key.id();
    let id = format!(
        "ced-fallback-{}",
        short_hash(&format!("{site}-{}", normalize_signature_text(&text)))
    );
    let clone = FragmentElement::from_live(doc, root);
    Some(Turn {
        id,
        role: Role::Assistant,
        node: root.id(),
        preview: preview_of(&text),
        markdown_resolved: markdown.clone(),
        markdown,
        html: clone.inner_html(),
        images: extract_images(doc, &clone),
        attachments: extract_attachments(doc, &clone),
        formulas: Vec::new(),
        text,
    })
}

/// Whether `node` looks like a rendered message rather than page chrome.
pub fn is_likely_message_node(doc: &LiveDocument, node: ElementRef<'_>) -> bool {
    if doc.in_overlay(node) {
        return false;
    }
    let probe = doc.probe();
    if probe.is_hidden(node) {
        return false;
    }
    if let Some(rect) = probe.rect(node) {
        if rect.width == 0.0 && rect.height == 0.0 {
            return false;
        }
    }
    let text = collapsed_text(node);
    if text.chars().count() < 6 && !has_descendant(node, IMG.as_ref()) {
        return false;
    }
    let value = node.value();
    let hint = format!(
        "{} {} {}",
        value.attr("class").unwrap_or_default(),
        value.attr("data-testid").unwrap_or_default(),
        value.attr("data-role").unwrap_or_default()
    )
    .to_lowercase();
    !(NAV_HINT.is_match(&hint) && !MESSAGE_HINT.is_match(&hint))
}

/// Sorts by document order and drops duplicates and any node containing
/// another candidate. Innermost matches win.
pub fn dedupe_message_nodes<'a>(doc: &LiveDocument, nodes: Vec<ElementRef<'a>>) -> Vec<ElementRef<'a>> {
    let mut ordered = nodes;
    ordered.sort_by_key(|node| doc.position(node.id()));
    ordered.dedup_by_key(|node| node.id());

    let mut kept: Vec<ElementRef<'a>> = Vec::new();
    for node in ordered.into_iter().rev() {
        if kept.iter().any(|existing| contains(node, *existing)) {
            continue;
        }
        kept.push(node);
    }
    kept.reverse();
    kept
}

fn gather_root_candidates<'a>(
    doc: &'a LiveDocument,
    reference: ElementRef<'a>,
    turn_nodes: &[ElementRef<'a>],
) -> Vec<ElementRef<'a>> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut add = |el: Option<ElementRef<'a>>| {
        if let Some(el) = el {
            if seen.insert(el.id()) {
                candidates.push(el);
            }
        }
    };

    let roots = &doc.site().roots;
    for seed in std::iter::once(reference).chain(turn_nodes.iter().copied()) {
        for sel in roots {
            add(closest(seed, sel));
        }
    }
    for sel in roots {
        for el in doc.html().select(sel).take(ROOT_CANDIDATES_PER_SELECTOR) {
            add(Some(el));
        }
    }
    add(doc.query_first(roots));
    add(doc.main());
    add(doc.body());
    add(reference.parent().and_then(ElementRef::wrap));
    candidates
}

fn score_root_candidate(doc: &LiveDocument, root: ElementRef<'_>, turn_nodes: &[ElementRef<'_>]) -> f64 {
    let area = doc.probe().rect(root).map(|r| r.area()).unwrap_or(0.0);
    let visible = if area > 100.0 { 1.0 } else { 0.0 };
    let turn_count = if turn_nodes.is_empty() {
        doc.site()
            .message_turn
            .as_ref()
            .map(|sel| root.select(sel).count())
            .unwrap_or(0)
    } else {
        turn_nodes.iter().filter(|node| contains(root, **node)).count()
    };
    let text_len = inner_text(root).trim().chars().count().min(50_000);
    (turn_count as f64) * 1_000_000.0 + visible * 100_000.0 + area + text_len as f64
}

/// Best-scoring container for `reference` and its sibling turns.
pub fn find_conversation_root<'a>(
    doc: &'a LiveDocument,
    reference: ElementRef<'a>,
    turn_nodes: &[ElementRef<'a>],
) -> Option<ElementRef<'a>> {
    let candidates = gather_root_candidates(doc, reference, turn_nodes);
    let mut best: Option<(ElementRef<'a>, f64)> = None;
    for candidate in candidates {
        let score = score_root_candidate(doc, candidate, turn_nodes);
        if best.map_or(true, |(_, top)| score > top) {
            best = Some((candidate, score));
        }
    }
    best.map(|(el, _)| el)
        .or_else(|| doc.query_first(&doc.site().roots))
        .or_else(|| reference.parent().and_then(ElementRef::wrap))
}

/// Container the turns are collected from.
pub fn resolve_collection_root(doc: &LiveDocument) -> Option<ElementRef<'_>> {
    let sampled: Vec<ElementRef<'_>> = match doc.site().message_turn.as_ref() {
        Some(sel) => {
            let likely = doc
                .select_all(sel)
                .into_iter()
                .filter(|node| is_likely_message_node(doc, *node))
                .collect();
            dedupe_message_nodes(doc, likely)
                .into_iter()
                .take(MAX_SAMPLED_TURNS)
                .collect()
        }
        None => Vec::new(),
    };
    match sampled.first() {
        Some(first) => find_conversation_root(doc, *first, &sampled),
        None => doc
            .query_first(&doc.site().roots)
            .or_else(|| doc.main())
            .or_else(|| doc.body()),
    }
}

fn hint_role(hint: &str) -> Option<Role> {
    if USER_WORD.is_match(hint) {
        Some(Role::User)
    } else if ASSISTANT_WORD.is_match(hint) {
        Some(Role::Assistant)
    } else {
        None
    }
}

fn role_from_metadata(node: ElementRef<'_>) -> Option<Role> {
    let mut hints = Vec::new();
    let mut collect = |el: ElementRef<'_>| {
        let value = el.value();
        for name in ["data-message-author-role", "data-author-role", "data-role", "data-testid", "class"] {
            if let Some(v) = value.attr(name) {
                let v = v.trim().to_lowercase();
                if !v.is_empty() {
                    hints.push(v);
                }
            }
        }
    };
    collect(node);
    if let Some(carrier) = select_first(node, METADATA_CARRIER.as_ref()) {
        collect(carrier);
    }
    hints.iter().find_map(|hint| hint_role(hint))
}

/// Speaker of a message node. Always resolves to user or assistant.
pub fn detect_node_role(doc: &LiveDocument, node: ElementRef<'_>) -> Role {
    let name = node.value().name();
    if name == "user-query" {
        return Role::User;
    }
    if name == "model-response" {
        return Role::Assistant;
    }
    let key = doc.adapter().key;
    if key == SiteKey::Claude {
        if matches(node, CLAUDE_USER.as_ref()) {
            return Role::User;
        }
        if matches(node, CLAUDE_ASSISTANT.as_ref()) {
            return Role::Assistant;
        }
    }

    let site = doc.site();
    let structural = role_from_metadata(node).unwrap_or_else(|| {
        let assistant = site.role_assistant.as_ref();
        let user = site.role_user.as_ref();
        if matches(node, assistant)
            || has_descendant(node, assistant)
            || has_descendant(node, ASSISTANT_CONTENT_HINT.as_ref())
        {
            Role::Assistant
        } else if matches(node, user) || has_descendant(node, user) {
            Role::User
        } else {
            Role::Unknown
        }
    });
    if structural != Role::Unknown {
        return structural;
    }

    let hint = if key == SiteKey::Grok {
        GROK_ASSISTANT_HINT.as_ref()
    } else {
        PROSE_HINT.as_ref()
    };
    if has_descendant(node, hint) {
        Role::Assistant
    } else {
        Role::User
    }
}

fn first_of<'a>(node: ElementRef<'a>, selectors: &[&str]) -> Option<ElementRef<'a>> {
    selectors
        .iter()
        .filter_map(|s| dom::compile(s))
        .find_map(|sel| node.select(&sel).next())
}

fn resolve_content_node<'a>(doc: &LiveDocument, node: ElementRef<'a>, role: Role) -> ElementRef<'a> {
    let site = doc.site();
    let selector = if role == Role::User {
        site.user_content.as_ref()
    } else {
        site.ai_content.as_ref()
    };
    if let Some(found) = select_first(node, selector) {
        return found;
    }
    let assistant = role == Role::Assistant;
    let narrowed = match doc.adapter().key {
        SiteKey::ChatGpt if role == Role::User => first_of(node, &[r#"[data-message-author-role="user"]"#]),
        SiteKey::Gemini if assistant => first_of(node, &["message-content"]),
        SiteKey::Gemini => first_of(node, &["div.query-content", ".query-content", ".query-text"]),
        SiteKey::Grok if assistant => first_of(
            node,
            &[
                ".assistant-message .markdown",
                ".ai-message .markdown",
                r#"[data-role="assistant"] .markdown"#,
                ".markdown",
            ],
        ),
        SiteKey::Grok => first_of(node, &[".user-message .markdown", r#"[data-role="user"] .markdown"#, ".markdown"]),
        _ => None,
    };
    narrowed.unwrap_or(node)
}

fn parse_message(doc: &LiveDocument, node: ElementRef<'_>, counter: &mut OccurrenceCounter) -> Option<Turn> {
    let role = detect_node_role(doc, node);
    let content = resolve_content_node(doc, node, role);
    let base = doc.base_url();

    let mut visual = FragmentElement::from_live(doc, content);
    visual.bake_canvases(doc);
    visual.replace_buttons_with_spans();
    visual.remove_where(&mut |el| el.has_class("sr-only") || matches!(el.name.as_str(), "script" | "style"));
    visual.for_each_mut(&mut |el| {
        if el.name == "img" {
            if let Some(src) = el.attr("src").map(|s| dom::normalize_url(base, s)) {
                el.set_attr("src", src);
            }
        }
    });
    let html = visual.inner_html();

    let mut formulas = Vec::new();
    let mut text_clone = FragmentElement::from_live(doc, content);
    annotate_images(&mut text_clone);
    normalize_clone(&mut text_clone, &mut formulas);

    let text = text_clone.text_content().trim().to_string();
    let markdown = collapse_blank_lines(to_markdown(&text_clone, base).trim());

    let source = FragmentElement::from_live(doc, content);
    let images = merge_image_sources(extract_images(doc, &text_clone), extract_images(doc, &source));
    let attachments = extract_attachments(doc, &text_clone);

    if text.is_empty() && images.is_empty() && attachments.is_empty() {
        return None;
    }

    let signature = base_signature(&SignatureInput {
        site: doc.adapter().key.id(),
        role,
        text: &text,
        markdown: &markdown,
        html: &html,
        images: &images,
        attachments: &attachments,
    });
    let id = counter.next_id(&signature);
    doc.stamp(node.id(), &id);

    Some(Turn {
        id,
        role,
        node: node.id(),
        preview: preview_of(&text),
        markdown_resolved: markdown.clone(),
        markdown,
        html,
        images,
        attachments,
        formulas,
        text,
    })
}
