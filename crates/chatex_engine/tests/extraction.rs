use chatex_engine::{collect_conversation_turns, detect_conversation_title, LiveDocument, ParseMode, Role};
use pretty_assertions::assert_eq;
use scraper::Selector;
use url::Url;

fn chatgpt(body: &str) -> LiveDocument {
    let markup = format!(
        r#"<html><head><title>Borrow checker - ChatGPT</title></head><body><main><div data-testid="conversation-main">{body}</div></main></body></html>"#
    );
    LiveDocument::parse(&markup, Url::parse("https://chatgpt.com/c/abc").unwrap())
}

fn user_turn(n: usize, text: &str) -> String {
    format!(
        r#"<article data-testid="conversation-turn-{n}"><h5 class="sr-only">You said:</h5><div data-message-author-role="user"><div class="whitespace-pre-wrap">{text}</div></div></article>"#
    )
}

fn assistant_turn(n: usize, inner: &str) -> String {
    format!(
        r#"<article data-testid="conversation-turn-{n}"><h6 class="sr-only">ChatGPT said:</h6><div data-message-author-role="assistant"><div class="markdown prose">{inner}</div></div></article>"#
    )
}

#[test]
fn turns_come_out_in_document_order_with_roles() {
    let doc = chatgpt(&format!(
        "{}{}",
        user_turn(1, "Why does this not compile?"),
        assistant_turn(2, "<p>The borrow ends too late.</p>")
    ));
    let extraction = collect_conversation_turns(&doc);

    assert_eq!(extraction.mode, ParseMode::Normal);
    let summary: Vec<(Role, &str)> = extraction.turns.iter().map(|t| (t.role, t.text.as_str())).collect();
    assert_eq!(
        summary,
        vec![
            (Role::User, "Why does this not compile?"),
            (Role::Assistant, "The borrow ends too late."),
        ]
    );
    for turn in &extraction.turns {
        assert_eq!(doc.stamp_of(turn.node).as_deref(), Some(turn.id.as_str()));
    }
}

#[test]
fn extraction_is_idempotent_on_an_unchanged_page() {
    let doc = chatgpt(&format!(
        "{}{}{}",
        user_turn(1, "First question here"),
        assistant_turn(2, "<p>First answer</p>"),
        user_turn(3, "Second question here")
    ));
    let first: Vec<String> = collect_conversation_turns(&doc).turns.into_iter().map(|t| t.id).collect();
    let second: Vec<String> = collect_conversation_turns(&doc).turns.into_iter().map(|t| t.id).collect();

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
}

#[test]
fn nested_matches_yield_one_turn_from_the_inner_node() {
    let doc = chatgpt(
        r#"<div data-testid="conversation-turn-1"><article><div data-message-author-role="user"><p>Only once please</p></div></article></div>"#,
    );
    let extraction = collect_conversation_turns(&doc);

    assert_eq!(extraction.turns.len(), 1);
    let article = Selector::parse("article").unwrap();
    let inner = doc.html().select(&article).next().unwrap();
    assert_eq!(extraction.turns[0].node, inner.id());
}

#[test]
fn identical_turns_differ_only_by_occurrence_index() {
    let doc = chatgpt(&format!(
        "{}{}{}",
        user_turn(1, "Same question again"),
        assistant_turn(2, "<p>Some reply</p>"),
        user_turn(3, "Same question again")
    ));
    let turns = collect_conversation_turns(&doc).turns;
    let (first_base, first_slot) = turns[0].id.rsplit_once('-').unwrap();
    let (second_base, second_slot) = turns[2].id.rsplit_once('-').unwrap();

    assert_eq!(first_base, second_base);
    assert_eq!((first_slot, second_slot), ("0", "1"));
    assert_ne!(turns[0].id, turns[1].id);
}

#[test]
fn hidden_and_tiny_nodes_are_skipped() {
    let doc = chatgpt(&format!(
        r#"{}<article data-testid="conversation-turn-2" style="display: none"><div data-message-author-role="assistant"><p>Invisible reply</p></div></article><article data-testid="conversation-turn-3"><div data-message-author-role="user">ok</div></article>"#,
        user_turn(1, "Visible question")
    ));
    let turns = collect_conversation_turns(&doc).turns;

    assert_eq!(turns.len(), 1);
    assert_eq!(turns[0].text, "Visible question");
}

#[test]
fn unrecognized_page_degrades_to_one_synthetic_turn() {
    let doc = chatgpt("<div><p>Plain exported notes without markers.</p></div>");
    let extraction = collect_conversation_turns(&doc);

    assert_eq!(extraction.mode, ParseMode::Fallback);
    assert_eq!(extraction.turns.len(), 1);
    let turn = &extraction.turns[0];
    assert!(turn.id.starts_with("ced-fallback-"));
    assert_eq!(turn.role, Role::Assistant);
    assert_eq!(turn.text, "Plain exported notes without markers.");
}

#[test]
fn gemini_custom_elements_carry_the_role() {
    let markup = r#"<html><head><title>Gemini - Lifetimes</title></head><body><main><div id="chat-history">
        <user-query><div class="query-content">Explain lifetimes please</div></user-query>
        <model-response><message-content><p>Lifetimes name <strong>regions</strong> of code.</p></message-content></model-response>
        </div></main></body></html>"#;
    let doc = LiveDocument::parse(markup, Url::parse("https://gemini.google.com/app/1").unwrap());
    let turns = collect_conversation_turns(&doc).turns;

    assert_eq!(turns.len(), 2);
    assert_eq!(turns[0].role, Role::User);
    assert_eq!(turns[0].text, "Explain lifetimes please");
    assert_eq!(turns[1].role, Role::Assistant);
    assert_eq!(turns[1].markdown, "Lifetimes name **regions** of code\\.");
    assert_eq!(detect_conversation_title(&doc), "Lifetimes");
}

#[test]
fn markdown_keeps_emphasis_and_escapes_prose() {
    let doc = chatgpt(&assistant_turn(1, "<p><strong>bold</strong> and 2*3</p>"));
    let turns = collect_conversation_turns(&doc).turns;

    assert_eq!(turns[0].markdown, r"**bold** and 2\*3");
    assert_eq!(turns[0].markdown_resolved, turns[0].markdown);
}

#[test]
fn images_become_placeholder_tokens() {
    let doc = chatgpt(&assistant_turn(
        1,
        r#"<p>Here is the chart</p><img src="/files/chart.png" alt="chart"><img src="/icons/x.png" width="16" height="16">"#,
    ));
    let turn = &collect_conversation_turns(&doc).turns[0];

    assert!(turn.markdown.contains("![chart](__CED_IMAGE_0__)"));
    assert_eq!(turn.images.len(), 1);
    assert_eq!(turn.images[0].src, "https://chatgpt.com/files/chart.png");
    assert_eq!(turn.images[0].index, Some(0));
}

fn page(url: &str, root: &str, body: &str) -> LiveDocument {
    let markup = format!(r#"<html><body><main><div {root}>{body}</div></main></body></html>"#);
    LiveDocument::parse(&markup, Url::parse(url).unwrap())
}

fn roles_and_text(doc: &LiveDocument) -> Vec<(Role, String)> {
    collect_conversation_turns(doc)
        .turns
        .into_iter()
        .map(|turn| (turn.role, turn.text))
        .collect()
}

#[test]
fn widened_selectors_recover_turns_without_turn_wrappers() {
    // No article or conversation-turn wrapper, so only the fallback list matches.
    let doc = chatgpt(
        r#"<div data-message-author-role="user"><p>Is a Vec growable?</p></div><div data-message-author-role="assistant"><div class="markdown"><p>Yes, it reallocates.</p></div></div>"#,
    );
    let extraction = collect_conversation_turns(&doc);

    assert_eq!(extraction.mode, ParseMode::Fallback);
    let summary: Vec<(Role, &str)> = extraction.turns.iter().map(|t| (t.role, t.text.as_str())).collect();
    assert_eq!(
        summary,
        vec![(Role::User, "Is a Vec growable?"), (Role::Assistant, "Yes, it reallocates.")]
    );
    assert!(extraction.turns.iter().all(|t| !t.id.starts_with("ced-fallback-")));
}

#[test]
fn role_metadata_is_read_from_a_descendant() {
    // The user turn renders markdown, which alone would read as an assistant.
    let doc = page(
        "https://grok.com/chat/1",
        r#"data-testid="conversation""#,
        r#"<div class="message"><span data-testid="human-avatar"></span><div class="markdown">Does Rust have a GC?</div></div><div class="message"><span data-testid="bot-avatar"></span><p>No, ownership frees memory.</p></div>"#,
    );

    assert_eq!(
        roles_and_text(&doc),
        vec![
            (Role::User, "Does Rust have a GC?".to_string()),
            (Role::Assistant, "No, ownership frees memory.".to_string()),
        ]
    );
}

#[test]
fn claude_font_classes_decide_the_speaker() {
    let doc = page(
        "https://claude.ai/chat/1",
        r#"data-testid="conversation""#,
        r#"<div class="font-user-message"><p>Can I borrow twice?</p></div><div class="font-claude-message"><div class="prose"><p>Only one mutable borrow at a time.</p></div></div>"#,
    );

    assert_eq!(
        roles_and_text(&doc),
        vec![
            (Role::User, "Can I borrow twice?".to_string()),
            (Role::Assistant, "Only one mutable borrow at a time.".to_string()),
        ]
    );
}

#[test]
fn unmarked_turns_fall_back_to_the_prose_heuristic() {
    let body = r#"<article><p>What is a trait object?</p></article><article><div class="prose"><p>A pointer plus a vtable.</p></div></article>"#;
    let chatgpt_doc = page("https://chatgpt.com/c/1", r#"data-testid="conversation-main""#, body);
    let roles: Vec<Role> = roles_and_text(&chatgpt_doc).into_iter().map(|(role, _)| role).collect();
    assert_eq!(roles, vec![Role::User, Role::Assistant]);

    // Grok's hint list has no `.prose`, so both unmarked turns read as the user.
    let grok_doc = page("https://grok.com/chat/1", r#"data-testid="conversation""#, body);
    let roles: Vec<Role> = roles_and_text(&grok_doc).into_iter().map(|(role, _)| role).collect();
    assert_eq!(roles, vec![Role::User, Role::User]);
}
