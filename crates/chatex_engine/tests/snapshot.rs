use chatex_engine::snapshot::{
    apply_image_map, build_export_snapshot_root, build_full_html_document, enhance_dark_code_contrast,
    known_image_map, page_shell, pending_remote_images,
};
use chatex_engine::{
    collect_conversation_turns, FragmentElement, FragmentNode, ImageCache, LiveDocument, SiteKey, Turn,
};
use pretty_assertions::assert_eq;
use url::Url;

const PAGE: &str = r#"<html><head><title>Plots - ChatGPT</title><script>track()</script></head><body class="dark"><main><div data-testid="conversation-main">
<article data-testid="conversation-turn-1"><h5 class="sr-only">You said:</h5><div data-message-author-role="user"><div class="whitespace-pre-wrap">Draw me a plot</div></div></article>
<article data-testid="conversation-turn-2"><h6 class="sr-only">ChatGPT said:</h6><div data-message-author-role="assistant"><div class="markdown prose">
  <p>Here is your plot</p>
  <img src="/files/plot.png" srcset="/files/plot@2x.png 2x" alt="plot">
  <img src="/icons/tiny.png" width="16" height="16">
  <span class="citation"><img src="https://cdn.example.com/thumb.png"></span>
  <img src="https://www.google.com/s2/favicons?domain=example.com">
  <img src="data:image/gif;base64,R0lG">
</div></div></article>
<article data-testid="conversation-turn-3"><h5 class="sr-only">You said:</h5><div data-message-author-role="user"><div class="whitespace-pre-wrap">Make it blue</div></div></article>
<div class="ced-panel">Export panel</div>
<form data-type="unified-composer"><textarea placeholder="Ask anything"></textarea></form>
</div></main></body></html>"#;

fn load() -> (LiveDocument, Vec<Turn>) {
    let doc = LiveDocument::parse(PAGE, Url::parse("https://chatgpt.com/c/plots").unwrap());
    let turns = collect_conversation_turns(&doc).turns;
    (doc, turns)
}

#[test]
fn snapshot_drops_overlay_and_composer_but_keeps_every_turn() {
    let (doc, turns) = load();
    assert_eq!(turns.len(), 3);

    let snapshot = build_export_snapshot_root(&doc, &turns, true).unwrap();
    let html = snapshot.root.outer_html();

    for text in ["Draw me a plot", "Here is your plot", "Make it blue"] {
        assert!(html.contains(text), "missing {text}");
    }
    assert!(!html.contains("Export panel"));
    assert!(!html.contains("<textarea"));
    assert!(!html.contains("<form"));
    for turn in &turns {
        assert!(html.contains(&format!("data-ced-message-id=\"{}\"", turn.id)));
    }
}

#[test]
fn unselected_turns_are_left_out_when_asked() {
    let (doc, turns) = load();
    let selection = vec![turns[0].clone(), turns[2].clone()];

    let snapshot = build_export_snapshot_root(&doc, &selection, false).unwrap();
    let html = snapshot.root.outer_html();

    assert!(html.contains("Draw me a plot"));
    assert!(html.contains("Make it blue"));
    assert!(!html.contains("Here is your plot"));
}

#[test]
fn known_images_replace_sources_and_srcset() {
    let (doc, mut turns) = load();
    turns[1].images[0].data_url = Some("data:image/png;base64,AAAA".to_string());
    let mut root = build_export_snapshot_root(&doc, &turns, true).unwrap().root;
    let cache = ImageCache::new();

    let map = known_image_map(&turns, &cache, doc.base_url());
    let applied = apply_image_map(&mut root, &map, doc.base_url());

    assert_eq!(applied, 1);
    let html = root.outer_html();
    assert!(html.contains(r#"src="data:image/png;base64,AAAA""#));
    assert!(!html.contains("srcset"));
    assert!(pending_remote_images(&doc, &root, &map).is_empty());
}

#[test]
fn cached_entries_are_known_under_their_normalized_key() {
    let (doc, turns) = load();
    let cache = ImageCache::new();
    cache.insert("/files/plot.png", "", "data:image/png;base64,BBBB");

    let map = known_image_map(&turns, &cache, doc.base_url());

    assert_eq!(
        map.get("https://chatgpt.com/files/plot.png").map(String::as_str),
        Some("data:image/png;base64,BBBB")
    );
}

#[test]
fn pending_images_skip_icons_citations_and_denylisted_hosts() {
    let (doc, turns) = load();
    let root = build_export_snapshot_root(&doc, &turns, true).unwrap().root;

    let pending = pending_remote_images(&doc, &root, &Default::default());

    assert_eq!(pending, vec!["https://chatgpt.com/files/plot.png".to_string()]);
}

#[test]
fn standalone_document_reuses_the_page_shell() {
    let (doc, turns) = load();
    let root = build_export_snapshot_root(&doc, &turns, true).unwrap().root;

    let shell = page_shell(&doc, "Plots & charts");
    let document = build_full_html_document(&shell, &root);

    assert!(document.starts_with("<!DOCTYPE html>"));
    assert!(document.contains(r#"<base href="https://chatgpt.com/">"#));
    assert!(document.contains("<title>Plots &amp; charts</title>"));
    assert!(document.contains(r#"<body class="dark">"#));
    assert!(!document.contains("track()"));
    assert_eq!(shell.background, "#ffffff");
}

fn code_block(style: &str) -> FragmentElement {
    let mut pre = FragmentElement::new("pre");
    pre.set_attr("style", style);
    pre.children.push(FragmentNode::Text("fn main() {}".to_string()));
    let mut root = FragmentElement::new("div");
    root.children.push(FragmentNode::Element(pre));
    root
}

fn first_child_style(root: &FragmentElement) -> String {
    root.child_elements()
        .next()
        .and_then(|el| el.attr("style"))
        .unwrap_or_default()
        .to_string()
}

#[test]
fn dark_claude_code_blocks_get_readable_colors() {
    let mut root = code_block("color: #333333; background-color: transparent");

    enhance_dark_code_contrast(&mut root, SiteKey::Claude, "#1f1e1d");

    let style = first_child_style(&root);
    assert!(style.contains("color: #e6edf3 !important"));
    assert!(style.contains("background: #111827 !important"));
}

#[test]
fn contrast_pass_leaves_light_pages_and_other_sites_alone() {
    let original = "color: #333333; background-color: transparent";

    let mut light = code_block(original);
    enhance_dark_code_contrast(&mut light, SiteKey::Claude, "#ffffff");
    assert_eq!(first_child_style(&light), original);

    let mut other = code_block(original);
    enhance_dark_code_contrast(&mut other, SiteKey::ChatGpt, "#1f1e1d");
    assert_eq!(first_child_style(&other), original);
}
