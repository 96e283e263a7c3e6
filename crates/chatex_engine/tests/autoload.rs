use std::cell::{Cell, RefCell};
use std::time::Duration;

use chatex_engine::autoload::{RecordingActions, SurfaceError, FORWARD_SWEEP_MAX_PASSES};
use chatex_engine::{
    AutoLoadTiming, AutoLoader, CollapsedBlockExpander, LiveDocument, ScrollStrategy, ScrollSurface, SiteKey,
    StaticSurface,
};
use pretty_assertions::assert_eq;
use scraper::Selector;
use url::Url;

/// Grows by `step` every time the bottom is reached, up to `max_height`,
/// and reveals `count_step` more messages on every visit to the top.
struct LazySurface {
    client_height: f64,
    height: Cell<f64>,
    max_height: f64,
    step: f64,
    top: Cell<f64>,
    deepest: Cell<f64>,
    messages: Cell<usize>,
    max_messages: usize,
    count_step: usize,
    count_reads: Cell<usize>,
    behavior: RefCell<String>,
    behaviors_seen: RefCell<Vec<String>>,
    fail_scrolls: bool,
}

impl LazySurface {
    fn new(client_height: f64, height: f64, max_height: f64) -> Self {
        Self {
            client_height,
            height: Cell::new(height),
            max_height,
            step: 500.0,
            top: Cell::new(0.0),
            deepest: Cell::new(0.0),
            messages: Cell::new(0),
            max_messages: 0,
            count_step: 0,
            count_reads: Cell::new(0),
            behavior: RefCell::new("smooth".to_string()),
            behaviors_seen: RefCell::new(Vec::new()),
            fail_scrolls: false,
        }
    }

    fn with_history(mut self, max_messages: usize, count_step: usize) -> Self {
        self.max_messages = max_messages;
        self.count_step = count_step;
        self
    }
}

impl ScrollSurface for LazySurface {
    fn client_height(&self) -> f64 {
        self.client_height
    }

    fn scroll_top(&self) -> f64 {
        self.top.get()
    }

    fn scroll_height(&self) -> f64 {
        self.height.get()
    }

    fn set_scroll_top(&self, top: f64) -> Result<(), SurfaceError> {
        if self.fail_scrolls {
            return Err(SurfaceError::Detached);
        }
        let top = top.clamp(0.0, self.height.get());
        self.top.set(top);
        self.deepest.set(self.deepest.get().max(top));
        if top >= self.height.get() && self.height.get() < self.max_height {
            self.height.set((self.height.get() + self.step).min(self.max_height));
        }
        if top == 0.0 {
            let next = (self.messages.get() + self.count_step).min(self.max_messages);
            self.messages.set(next);
        }
        Ok(())
    }

    fn scroll_behavior(&self) -> String {
        self.behavior.borrow().clone()
    }

    fn set_scroll_behavior(&self, behavior: &str) {
        self.behaviors_seen.borrow_mut().push(behavior.to_string());
        *self.behavior.borrow_mut() = behavior.to_string();
    }

    fn message_count(&self) -> usize {
        self.count_reads.set(self.count_reads.get() + 1);
        self.messages.get()
    }
}

#[tokio::test]
async fn forward_sweep_follows_a_growing_page_and_returns_to_the_top() {
    let surface = LazySurface::new(500.0, 1000.0, 3000.0);
    let loader = AutoLoader::for_site(SiteKey::ChatGpt, AutoLoadTiming::immediate());

    loader.load(&surface).await.unwrap();

    assert_eq!(surface.deepest.get(), 3000.0);
    assert_eq!(surface.scroll_height(), 3000.0);
    assert_eq!(surface.scroll_top(), 0.0);
    assert_eq!(surface.scroll_behavior(), "smooth");
    assert_eq!(*surface.behaviors_seen.borrow(), vec!["auto".to_string(), "smooth".to_string()]);
}

#[tokio::test]
async fn forward_sweep_gives_up_on_a_page_that_never_stops_growing() {
    let surface = LazySurface::new(500.0, 1000.0, f64::INFINITY);
    let loader = AutoLoader::for_site(SiteKey::ChatGpt, AutoLoadTiming::immediate());

    tokio::time::timeout(Duration::from_secs(5), loader.load(&surface))
        .await
        .expect("sweep returns")
        .unwrap();

    assert_eq!(surface.deepest.get(), 500.0 * FORWARD_SWEEP_MAX_PASSES as f64);
    assert_eq!(surface.scroll_top(), 0.0);
    assert_eq!(surface.scroll_behavior(), "smooth");
}

#[tokio::test]
async fn top_probe_stops_once_the_message_count_settles() {
    let surface = LazySurface::new(600.0, 2000.0, 2000.0).with_history(40, 10);
    let loader = AutoLoader::for_site(SiteKey::Gemini, AutoLoadTiming::immediate());

    loader.load(&surface).await.unwrap();

    // 10, 20, 30, 40, then three stable reads.
    assert_eq!(surface.count_reads.get(), 7);
    assert_eq!(surface.messages.get(), 40);
    assert_eq!(surface.scroll_top(), surface.scroll_height());
}

#[tokio::test]
async fn claude_ends_at_the_top_and_grok_at_the_bottom() {
    let claude = LazySurface::new(400.0, 1600.0, 1600.0).with_history(4, 2);
    AutoLoader::for_site(SiteKey::Claude, AutoLoadTiming::immediate())
        .load(&claude)
        .await
        .unwrap();
    assert_eq!(claude.deepest.get(), 1600.0);
    assert_eq!(claude.scroll_top(), 0.0);

    let grok = LazySurface::new(400.0, 1600.0, 1600.0).with_history(4, 2);
    AutoLoader::new(ScrollStrategy::GrokLike, AutoLoadTiming::immediate())
        .load(&grok)
        .await
        .unwrap();
    assert_eq!(grok.scroll_top(), 1600.0);
}

#[tokio::test]
async fn scroll_behavior_is_restored_when_scrolling_fails() {
    let mut surface = LazySurface::new(500.0, 1000.0, 1000.0);
    surface.fail_scrolls = true;
    let loader = AutoLoader::for_site(SiteKey::ChatGpt, AutoLoadTiming::immediate());

    let err = loader.load(&surface).await.unwrap_err();

    assert!(matches!(err, SurfaceError::Detached));
    assert_eq!(surface.scroll_behavior(), "smooth");
}

#[tokio::test]
async fn static_surface_from_a_captured_page_loads_without_error() {
    let doc = LiveDocument::parse(
        r#"<html><body><main data-ced-rect="0,0,1200,2400"><div data-testid="conversation-main" data-ced-rect="0,0,1200,2400"><article>first turn</article><article>second turn</article></div></main></body></html>"#,
        Url::parse("https://chatgpt.com/c/1").unwrap(),
    );
    let surface = StaticSurface::for_document(&doc);

    assert_eq!(surface.message_count(), 2);
    assert_eq!(surface.scroll_height(), 2400.0);
    assert_eq!(surface.client_height(), 800.0);

    AutoLoader::for_site(doc.adapter().key, AutoLoadTiming::immediate())
        .load(&surface)
        .await
        .unwrap();
    assert_eq!(surface.scroll_top(), 0.0);
}

const CLAUDE_PAGE: &str = r#"<html><body><main><div data-testid="conversation">
<div class="font-claude-message" data-ced-rect="0,0,600,400">
  <p>Here is the script you asked for.</p>
  <details><summary>main.rs</summary><pre><code>fn main() {}</code></pre></details>
  <details open><summary>notes.md</summary><pre>done</pre></details>
  <details><summary>Thinking</summary><p>plain words</p></details>
  <div class="code-block"><button data-ced-rect="10,40,90,24">Show code</button></div>
  <div class="code-block"><button data-ced-rect="10,80,90,24" aria-expanded="true">Show code</button></div>
  <div class="attachment"><button data-ced-rect="10,120,4,4">Expand</button></div>
  <div class="file-card"><button>View file</button></div>
  <button data-ced-rect="10,160,20,20" aria-label="Copy">Copy</button>
</div>
<form class="composer"><div class="file-picker"><button data-ced-rect="0,900,90,24">Show file</button></div></form>
</div></main></body></html>"#;

#[tokio::test]
async fn claude_collapsed_file_blocks_are_opened_once() {
    let doc = LiveDocument::parse(CLAUDE_PAGE, Url::parse("https://claude.ai/chat/1").unwrap());
    let actions = RecordingActions::new();

    let expanded = CollapsedBlockExpander::new(AutoLoadTiming::immediate())
        .expand(&doc, &actions)
        .await;

    let closed_code = doc
        .html()
        .select(&Selector::parse("details:not([open])").unwrap())
        .next()
        .unwrap()
        .id();
    let show_code = doc
        .html()
        .select(&Selector::parse("div.code-block button").unwrap())
        .next()
        .unwrap()
        .id();
    assert_eq!(expanded, 2);
    assert_eq!(actions.opened(), vec![closed_code]);
    assert_eq!(actions.clicked(), vec![show_code]);
}

#[tokio::test]
async fn other_sites_are_never_expanded() {
    let doc = LiveDocument::parse(CLAUDE_PAGE, Url::parse("https://chatgpt.com/c/1").unwrap());
    let actions = RecordingActions::new();

    let expanded = CollapsedBlockExpander::new(AutoLoadTiming::immediate())
        .expand(&doc, &actions)
        .await;

    assert_eq!(expanded, 0);
    assert!(actions.opened().is_empty());
    assert!(actions.clicked().is_empty());
}
