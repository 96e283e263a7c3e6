//! Scrolls lazily-loaded conversations until every turn is in the page,
//! and opens Claude's collapsed file and code blocks.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::sync::LazyLock;
use std::time::Duration;

use chatex_logging::{chatex_debug, chatex_info};
use ego_tree::NodeId;
use regex::Regex;
use scraper::{ElementRef, Selector};
use thiserror::Error;

use crate::dom::{self, closest, collapsed_text, has_descendant, matches, LiveDocument};
use crate::extract::{dedupe_message_nodes, is_likely_message_node, resolve_collection_root};
use crate::site::{ScrollStrategy, SiteKey};

const DEFAULT_VIEWPORT: f64 = 800.0;
const GEMINI_MAX_ATTEMPTS: usize = 40;
const GEMINI_STABLE_AFTER: usize = 3;
const SWEEP_MAX_PASSES: usize = 18;
pub const FORWARD_SWEEP_MAX_PASSES: usize = 40;
const SWEEP_SETTLED_PX: f64 = 8.0;
pub const MAX_EXPANSION_PASSES: usize = 6;

#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("scroll container detached")]
    Detached,
    #[error("scroll failed: {0}")]
    Scroll(String),
}

/// The page's scroll container.
pub trait ScrollSurface {
    fn client_height(&self) -> f64;
    fn scroll_top(&self) -> f64;
    fn scroll_height(&self) -> f64;
    fn set_scroll_top(&self, top: f64) -> Result<(), SurfaceError>;
    fn scroll_behavior(&self) -> String;
    fn set_scroll_behavior(&self, behavior: &str);
    /// Message turn nodes currently in the page.
    fn message_count(&self) -> usize;
}

/// A captured page: fixed height, no lazy loading.
#[derive(Debug)]
pub struct StaticSurface {
    client_height: f64,
    scroll_height: f64,
    messages: usize,
    top: Cell<f64>,
    behavior: RefCell<String>,
}

impl StaticSurface {
    pub fn new(client_height: f64, scroll_height: f64, messages: usize) -> Self {
        Self {
            client_height,
            scroll_height,
            messages,
            top: Cell::new(0.0),
            behavior: RefCell::new(String::new()),
        }
    }

    /// Surface over the document's scroll container, sized from the probe.
    pub fn for_document(doc: &LiveDocument) -> Self {
        let site = doc.site();
        let target = doc
            .query_first(&site.scroll_containers)
            .or_else(|| doc.main())
            .or_else(|| doc.body())
            .unwrap_or_else(|| doc.root_element());
        let height = doc.probe().rect(target).map(|r| r.height).unwrap_or(0.0);
        let messages = site
            .message_turn
            .as_ref()
            .map(|sel| doc.select_all(sel).len())
            .unwrap_or(0);
        Self::new(DEFAULT_VIEWPORT.min(height.max(1.0)), height, messages)
    }
}

impl ScrollSurface for StaticSurface {
    fn client_height(&self) -> f64 {
        self.client_height
    }

    fn scroll_top(&self) -> f64 {
        self.top.get()
    }

    fn scroll_height(&self) -> f64 {
        self.scroll_height
    }

    fn set_scroll_top(&self, top: f64) -> Result<(), SurfaceError> {
        self.top.set(top.clamp(0.0, self.scroll_height.max(0.0)));
        Ok(())
    }

    fn scroll_behavior(&self) -> String {
        self.behavior.borrow().clone()
    }

    fn set_scroll_behavior(&self, behavior: &str) {
        *self.behavior.borrow_mut() = behavior.to_string();
    }

    fn message_count(&self) -> usize {
        self.messages
    }
}

/// Delays between scroll steps.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoLoadTiming {
    pub sweep_step: Duration,
    pub grok_sweep_step: Duration,
    pub top_probe: Duration,
    pub settle: Duration,
    pub final_settle: Duration,
    pub expansion_pass: Duration,
}

impl Default for AutoLoadTiming {
    fn default() -> Self {
        Self {
            sweep_step: Duration::from_millis(180),
            grok_sweep_step: Duration::from_millis(200),
            top_probe: Duration::from_millis(350),
            settle: Duration::from_millis(300),
            final_settle: Duration::from_millis(260),
            expansion_pass: Duration::from_millis(240),
        }
    }
}

impl AutoLoadTiming {
    /// No waiting, for captured pages and tests.
    pub fn immediate() -> Self {
        Self {
            sweep_step: Duration::ZERO,
            grok_sweep_step: Duration::ZERO,
            top_probe: Duration::ZERO,
            settle: Duration::ZERO,
            final_settle: Duration::ZERO,
            expansion_pass: Duration::ZERO,
        }
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

pub struct AutoLoader {
    strategy: ScrollStrategy,
    timing: AutoLoadTiming,
}

impl AutoLoader {
    pub fn new(strategy: ScrollStrategy, timing: AutoLoadTiming) -> Self {
        Self { strategy, timing }
    }

    pub fn for_site(site: SiteKey, timing: AutoLoadTiming) -> Self {
        Self::new(site.adapter().scroll_strategy, timing)
    }

    /// Runs the site's strategy. Scroll behavior is forced to `auto` for
    /// the duration and restored afterwards, also on error.
    pub async fn load(&self, surface: &dyn ScrollSurface) -> Result<(), SurfaceError> {
        let original = surface.scroll_behavior();
        surface.set_scroll_behavior("auto");
        chatex_debug!("Auto-loading conversation with {:?}", self.strategy);
        let result = match self.strategy {
            ScrollStrategy::ChatGptLike => self.forward_sweep(surface).await,
            ScrollStrategy::GeminiLike => self.top_probe(surface).await,
            ScrollStrategy::ClaudeLike => self.up_then_down(surface, self.timing.sweep_step, false).await,
            ScrollStrategy::GrokLike => self.up_then_down(surface, self.timing.grok_sweep_step, true).await,
        };
        surface.set_scroll_behavior(&original);
        result
    }

    async fn forward_sweep(&self, surface: &dyn ScrollSurface) -> Result<(), SurfaceError> {
        let viewport = viewport_of(surface);
        let mut current = 0.0;
        let mut last_height = surface.scroll_height();
        let mut passes = 0;
        while current < last_height {
            if passes == FORWARD_SWEEP_MAX_PASSES {
                chatex_debug!("Forward sweep stopped after {} passes at {}px", passes, current);
                break;
            }
            passes += 1;
            current = (current + viewport).min(last_height);
            surface.set_scroll_top(current)?;
            pause(self.timing.sweep_step).await;
            let height = surface.scroll_height();
            if height > last_height {
                last_height = height;
            }
        }
        surface.set_scroll_top(0.0)?;
        pause(self.timing.settle).await;
        Ok(())
    }

    async fn top_probe(&self, surface: &dyn ScrollSurface) -> Result<(), SurfaceError> {
        let mut last_count: Option<usize> = None;
        let mut stable = 0;
        for _ in 0..GEMINI_MAX_ATTEMPTS {
            surface.set_scroll_top(0.0)?;
            pause(self.timing.top_probe).await;
            let count = surface.message_count();
            if last_count == Some(count) {
                stable += 1;
                if stable >= GEMINI_STABLE_AFTER {
                    break;
                }
            } else {
                stable = 0;
                last_count = Some(count);
            }
        }
        surface.set_scroll_top(surface.scroll_height())?;
        pause(self.timing.settle).await;
        Ok(())
    }

    /// Top probing for history, then a bounded downward sweep for lazy
    /// blocks. Claude ends at the top, Grok at the bottom.
    async fn up_then_down(&self, surface: &dyn ScrollSurface, step: Duration, end_at_bottom: bool) -> Result<(), SurfaceError> {
        self.top_probe(surface).await?;
        let viewport = viewport_of(surface);
        let mut current = surface.scroll_top();
        for _ in 0..SWEEP_MAX_PASSES {
            current = (current + viewport).min(surface.scroll_height());
            surface.set_scroll_top(current)?;
            pause(step).await;
            if (surface.scroll_height() - current).abs() < SWEEP_SETTLED_PX {
                break;
            }
        }
        let end = if end_at_bottom { surface.scroll_height() } else { 0.0 };
        surface.set_scroll_top(end)?;
        pause(self.timing.final_settle).await;
        Ok(())
    }
}

fn viewport_of(surface: &dyn ScrollSurface) -> f64 {
    let viewport = surface.client_height();
    if viewport.is_finite() && viewport > 0.0 {
        viewport
    } else {
        DEFAULT_VIEWPORT
    }
}

/// Interactions the expander needs from the page.
pub trait PageActions {
    fn open_details(&self, node: NodeId);
    fn click(&self, node: NodeId);
}

/// Records requested interactions without touching a page.
#[derive(Debug, Default)]
pub struct RecordingActions {
    opened: RefCell<Vec<NodeId>>,
    clicked: RefCell<Vec<NodeId>>,
}

impl RecordingActions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<NodeId> {
        self.opened.borrow().clone()
    }

    pub fn clicked(&self) -> Vec<NodeId> {
        self.clicked.borrow().clone()
    }
}

impl PageActions for RecordingActions {
    fn open_details(&self, node: NodeId) {
        self.opened.borrow_mut().push(node);
    }

    fn click(&self, node: NodeId) {
        self.clicked.borrow_mut().push(node);
    }
}

static FILE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(file|artifact|attachment|source|snippet|code|diff|patch|json|yaml|toml|xml|csv|tsv|txt|md|markdown|log|pdf|png|jpg|jpeg|gif|svg|py|js|ts|java|cpp|c\+\+|rb|go|rs|sh|bash|zsh|ps1|文件|附件|代码|源码|展开代码|查看代码|显示文件)")
        .expect("static regex")
});
static ACTION_BAR_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(copy|share|edit|retry|regenerate|thumb|feedback|menu|report|like|dislike|favorite|bookmark|new chat|历史|复制|分享|重试|重新生成|反馈|菜单)")
        .expect("static regex")
});
static EXPAND_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(expand|show more|view more|see more|open|open file|show file|view file|view code|show code|show source|more details|更多|展开|显示更多|查看更多|展开代码|查看代码|显示文件)")
        .expect("static regex")
});
static COLLAPSE_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(collapse|hide|show less|收起|隐藏|折叠)").expect("static regex"));
static MESSAGE_WORDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(message|chat|conversation|font-user-message|font-claude-message|assistant|user)").expect("static regex")
});
static CHROME_WORDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(sidebar|composer|input|history|toolbar|menu|header|footer|nav)").expect("static regex"));

static CHROME_ANCESTOR: LazyLock<Option<Selector>> = LazyLock::new(|| {
    dom::compile(r#"aside, nav, footer, form, [data-testid*="sidebar"], [class*="sidebar"], [data-testid*="composer"], [class*="composer"], [class*="chat-input"], [data-testid*="chat-input"], [data-testid*="message-input"]"#)
});
static CLOSED_DETAILS: LazyLock<Option<Selector>> = LazyLock::new(|| dom::compile("details:not([open])"));
static CODE_CONTENT: LazyLock<Option<Selector>> =
    LazyLock::new(|| dom::compile(r#"pre, code, [data-testid*="file"], [data-testid*="artifact"]"#));
static CONTROLS: LazyLock<Option<Selector>> = LazyLock::new(|| dom::compile(r#"button, [role="button"], summary"#));
static FILE_CONTEXT: LazyLock<Option<Selector>> = LazyLock::new(|| {
    dom::compile(r#"details, [data-testid*="artifact"], [data-testid*="attachment"], [data-testid*="file"], [data-testid*="code"], [class*="artifact"], [class*="attachment"], [class*="file"], [class*="code"], pre, code"#)
});

fn attr<'a>(el: ElementRef<'a>, name: &str) -> &'a str {
    el.value().attr(name).unwrap_or_default()
}

fn hint_of(el: ElementRef<'_>, attrs: &[&str], text_limit: Option<usize>) -> String {
    let mut parts: Vec<String> = attrs.iter().map(|name| attr(el, name).to_string()).collect();
    if let Some(limit) = text_limit {
        let text = collapsed_text(el);
        parts.push(if limit == usize::MAX { text } else { text.chars().take(limit).collect() });
    }
    parts.join(" ").to_lowercase()
}

fn looks_like_file_container(el: ElementRef<'_>) -> bool {
    FILE_WORDS.is_match(&hint_of(el, &["data-testid", "aria-label", "title", "class"], Some(240)))
}

fn is_action_bar_control(el: ElementRef<'_>) -> bool {
    ACTION_BAR_WORDS.is_match(&hint_of(el, &["data-testid", "aria-label", "title"], Some(usize::MAX)))
}

fn looks_like_file_expand_control(el: ElementRef<'_>) -> bool {
    let expanded = attr(el, "aria-expanded").to_ascii_lowercase();
    if expanded == "true" {
        return false;
    }
    let mut hint = collapsed_text(el).to_lowercase();
    hint.push(' ');
    hint.push_str(&hint_of(el, &["aria-label", "title", "data-testid", "class"], None));
    if COLLAPSE_WORDS.is_match(&hint) {
        return false;
    }
    let in_file_context =
        FILE_CONTEXT.as_ref().is_some_and(|sel| closest(el, sel).is_some()) || looks_like_file_container(el);
    if !in_file_context {
        return false;
    }
    expanded == "false" || EXPAND_WORDS.is_match(&hint)
}

fn is_claude_message_candidate(doc: &LiveDocument, node: ElementRef<'_>) -> bool {
    if CHROME_ANCESTOR.as_ref().is_some_and(|sel| closest(node, sel).is_some()) {
        return false;
    }
    let site = doc.site();
    let roles = [site.role_user.as_ref(), site.role_assistant.as_ref()];
    if roles.iter().any(|sel| matches(node, *sel) || has_descendant(node, *sel)) {
        return true;
    }
    let hint = hint_of(node, &["data-testid", "data-author-role", "data-role", "class"], None);
    MESSAGE_WORDS.is_match(&hint) && !CHROME_WORDS.is_match(&hint)
}

fn is_disabled_button(el: ElementRef<'_>) -> bool {
    el.value().name() == "button" && el.value().attr("disabled").is_some()
}

/// Opens Claude's collapsed file and code blocks inside message nodes.
pub struct CollapsedBlockExpander {
    timing: AutoLoadTiming,
}

impl CollapsedBlockExpander {
    pub fn new(timing: AutoLoadTiming) -> Self {
        Self { timing }
    }

    /// Returns the number of blocks opened plus controls activated. Other
    /// sites return 0 without touching the page.
    pub async fn expand(&self, doc: &LiveDocument, actions: &dyn PageActions) -> usize {
        if !doc.adapter().expands_collapsed_blocks {
            return 0;
        }
        let Some(root) = resolve_collection_root(doc).or_else(|| doc.main()).or_else(|| doc.body()) else {
            return 0;
        };
        let Some(turn_selector) = doc.site().message_turn.as_ref() else {
            return 0;
        };
        let candidates: Vec<ElementRef<'_>> = root.select(turn_selector).collect();
        let messages: Vec<ElementRef<'_>> = dedupe_message_nodes(doc, candidates)
            .into_iter()
            .filter(|node| is_likely_message_node(doc, *node) && is_claude_message_candidate(doc, *node))
            .collect();
        if messages.is_empty() {
            return 0;
        }

        let (Some(closed), Some(controls)) = (CLOSED_DETAILS.as_ref(), CONTROLS.as_ref()) else {
            return 0;
        };

        let mut expanded = 0;
        let mut opened: HashSet<NodeId> = HashSet::new();
        let mut clicked_keys: HashSet<String> = HashSet::new();
        for _ in 0..MAX_EXPANSION_PASSES {
            let mut pass_count = 0;
            for message in &messages {
                for details in message.select(closed) {
                    if opened.contains(&details.id()) {
                        continue;
                    }
                    if !looks_like_file_container(details) && !has_descendant(details, CODE_CONTENT.as_ref()) {
                        continue;
                    }
                    opened.insert(details.id());
                    actions.open_details(details.id());
                    pass_count += 1;
                }
            }
            for message in &messages {
                for control in message.select(controls) {
                    if doc.in_overlay(control)
                        || attr(control, "aria-expanded").eq_ignore_ascii_case("true")
                        || is_disabled_button(control)
                        || is_action_bar_control(control)
                        || !looks_like_file_expand_control(control)
                    {
                        continue;
                    }
                    let Some(rect) = doc.probe().rect(control) else {
                        continue;
                    };
                    if rect.width < 8.0 || rect.height < 8.0 {
                        continue;
                    }
                    let text: String = collapsed_text(control).chars().take(80).collect();
                    let key = format!(
                        "{}|{}|{}|{}|{}",
                        attr(control, "data-testid"),
                        attr(control, "aria-label"),
                        text,
                        rect.top.round(),
                        rect.left.round()
                    );
                    if !clicked_keys.insert(key) {
                        continue;
                    }
                    actions.click(control.id());
                    pass_count += 1;
                }
            }
            if pass_count == 0 {
                break;
            }
            expanded += pass_count;
            pause(self.timing.expansion_pass).await;
        }
        if expanded > 0 {
            chatex_info!("Expanded {} collapsed block(s)", expanded);
        }
        expanded
    }
}
