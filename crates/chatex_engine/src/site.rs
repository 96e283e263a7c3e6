//! Per-site configuration rows. Adding a site means adding a row here.

use url::Url;

use crate::Role;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SiteKey {
    ChatGpt,
    Gemini,
    Claude,
    Grok,
}

impl SiteKey {
    pub const ALL: [SiteKey; 4] = [SiteKey::ChatGpt, SiteKey::Gemini, SiteKey::Claude, SiteKey::Grok];

    /// Maps a host name to its site. Unknown hosts use the ChatGPT row.
    pub fn detect(host: &str) -> Self {
        let host = host.to_ascii_lowercase();
        if host == "claude.ai" || host.ends_with(".claude.ai") {
            SiteKey::Claude
        } else if host == "grok.com" || host.ends_with(".grok.com") {
            SiteKey::Grok
        } else if host == "gemini.google.com" {
            SiteKey::Gemini
        } else {
            SiteKey::ChatGpt
        }
    }

    pub fn from_url(url: &Url) -> Self {
        Self::detect(url.host_str().unwrap_or_default())
    }

    pub fn id(&self) -> &'static str {
        match self {
            SiteKey::ChatGpt => "chatgpt",
            SiteKey::Gemini => "gemini",
            SiteKey::Claude => "claude",
            SiteKey::Grok => "grok",
        }
    }

    pub fn from_id(value: &str) -> Option<Self> {
        let value = value.trim();
        SiteKey::ALL
            .into_iter()
            .find(|site| site.id().eq_ignore_ascii_case(value))
    }

    pub fn adapter(&self) -> &'static SiteAdapter {
        match self {
            SiteKey::ChatGpt => &CHATGPT,
            SiteKey::Gemini => &GEMINI,
            SiteKey::Claude => &CLAUDE,
            SiteKey::Grok => &GROK,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollStrategy {
    ChatGptLike,
    GeminiLike,
    ClaudeLike,
    GrokLike,
}

#[derive(Debug)]
pub struct SelectorSet {
    pub message_turn: &'static str,
    pub role_user: &'static str,
    pub role_assistant: &'static str,
    pub ai_content: &'static str,
    pub user_content: &'static str,
}

#[derive(Debug)]
pub struct SiteAdapter {
    pub key: SiteKey,
    pub selectors: SelectorSet,
    pub root_selectors: &'static [&'static str],
    pub scroll_container_selectors: &'static [&'static str],
    pub user_label: &'static str,
    pub assistant_label: &'static str,
    pub default_title: &'static str,
    /// Case-insensitive pattern removed from the document title.
    pub title_strip_pattern: &'static str,
    pub active_title_selector: Option<&'static str>,
    pub scroll_strategy: ScrollStrategy,
    pub export_base_name: &'static str,
    pub fallback_selectors: &'static [&'static str],
    pub expands_collapsed_blocks: bool,
    pub has_workspace_tab: bool,
}

impl SiteAdapter {
    pub fn role_label(&self, role: Role) -> &'static str {
        match role {
            Role::Assistant => self.assistant_label,
            Role::User | Role::Unknown => self.user_label,
        }
    }
}

static CHATGPT: SiteAdapter = SiteAdapter {
    key: SiteKey::ChatGpt,
    selectors: SelectorSet {
        message_turn: r#"[data-testid^="conversation-turn-"], article"#,
        role_user: r#"[data-message-author-role="user"]"#,
        role_assistant: r#"[data-message-author-role="assistant"]"#,
        ai_content: r#".markdown, .prose, [data-message-author-role="assistant"] .text-message"#,
        user_content: r#"[data-message-author-role="user"]"#,
    },
    root_selectors: &[
        r#"[data-testid="conversation-main"]"#,
        r#"[data-testid="conversation-container"]"#,
        "main",
    ],
    scroll_container_selectors: &[
        "main .overflow-y-auto",
        r#"[data-testid="conversation-main"]"#,
        "main",
    ],
    user_label: "You",
    assistant_label: "ChatGPT",
    default_title: "ChatGPT Conversation",
    title_strip_pattern: r"\s*-\s*ChatGPT.*",
    active_title_selector: None,
    scroll_strategy: ScrollStrategy::ChatGptLike,
    export_base_name: "chatgpt-export",
    fallback_selectors: &[
        r#"[data-testid^="conversation-turn-"]"#,
        "[data-message-author-role]",
        "article",
    ],
    expands_collapsed_blocks: false,
    has_workspace_tab: true,
};

static GEMINI: SiteAdapter = SiteAdapter {
    key: SiteKey::Gemini,
    selectors: SelectorSet {
        message_turn: "user-query, model-response",
        role_user: "user-query",
        role_assistant: "model-response",
        ai_content: "message-content, .markdown",
        user_content: "div.query-content, .query-content, .query-text",
    },
    root_selectors: &[
        r#"[data-test-id="chat-history-container"]"#,
        "#chat-history",
        ".chat-history",
        "main",
    ],
    scroll_container_selectors: &[
        r#"[data-test-id="chat-history-container"]"#,
        "#chat-history",
        ".chat-history-scroll-container",
        "main",
    ],
    user_label: "You",
    assistant_label: "Gemini",
    default_title: "Gemini Conversation",
    title_strip_pattern: r"^Gemini\s*-\s*",
    active_title_selector: Some(r#"div[data-test-id="conversation"].selected .conversation-title"#),
    scroll_strategy: ScrollStrategy::GeminiLike,
    export_base_name: "gemini-export",
    fallback_selectors: &[
        "user-query",
        "model-response",
        r#"[data-test-id*="message"]"#,
        ".conversation-turn",
    ],
    expands_collapsed_blocks: false,
    has_workspace_tab: false,
};

static CLAUDE: SiteAdapter = SiteAdapter {
    key: SiteKey::Claude,
    selectors: SelectorSet {
        message_turn: r#"[data-testid="user-message"], [data-testid*="assistant-message"], [data-testid*="chat-message"], [data-author-role], [data-message-author-role], div.font-user-message, div.font-claude-message, [data-test-render-count] > div, article"#,
        role_user: r#"[data-testid="user-message"], [data-testid*="user-message"], div.font-user-message, [data-author-role="user"], [data-role="user"], [data-message-author-role="user"], .user-message"#,
        role_assistant: r#"[data-testid*="assistant-message"], div.font-claude-message, [data-testid*="claude"], [data-author-role="assistant"], [data-role="assistant"], [data-message-author-role="assistant"], .assistant-message"#,
        ai_content: r#"div.font-claude-message, [data-testid*="assistant-message"] [data-testid*="content"], [data-testid*="assistant-message"] .markdown, [data-testid*="assistant-message"] .prose, [data-author-role="assistant"] .markdown, [data-role="assistant"] .markdown, .assistant-message .markdown, .assistant-message, .response-content-markdown, .prose, .markdown"#,
        user_content: r#"[data-testid="user-message"], [data-testid*="user-message"] [data-testid*="content"], div.font-user-message, [data-author-role="user"] [data-testid*="content"], [data-role="user"] [data-testid*="content"], [data-testid*="user"] [data-testid*="content"], .whitespace-pre-wrap, [data-author-role="user"], [data-role="user"], .user-message"#,
    },
    root_selectors: &[
        "main [data-test-render-count]",
        r#"main [data-testid="conversation"]"#,
        r#"main [data-testid="chat-messages"]"#,
        r#"main [data-testid*="conversation"]"#,
        "[data-test-render-count]",
        r#"[data-testid="conversation"]"#,
        r#"[data-testid="chat-messages"]"#,
        r#"[data-testid*="conversation"]"#,
        "main",
    ],
    scroll_container_selectors: &[
        "main [data-test-render-count]",
        r#"[data-testid="chat-messages"]"#,
        r#"[data-testid*="scroll"]"#,
        "main",
    ],
    user_label: "You",
    assistant_label: "Claude",
    default_title: "Claude Conversation",
    title_strip_pattern: r"\s*[-|]\s*Claude.*",
    active_title_selector: Some(r#"[data-testid="chat-title-button"] .truncate, button[data-testid="chat-title-button"] .truncate, [data-testid*="conversation"][aria-current="page"] [data-testid*="title"]"#),
    scroll_strategy: ScrollStrategy::ClaudeLike,
    export_base_name: "claude-export",
    fallback_selectors: &[
        r#"[data-testid="user-message"]"#,
        r#"[data-testid*="assistant-message"]"#,
        "div.font-claude-message",
        "div.font-user-message",
        "[data-test-render-count] > div",
        "main [data-test-render-count] > *",
        "[data-author-role]",
        "[data-message-author-role]",
        "article",
    ],
    expands_collapsed_blocks: true,
    has_workspace_tab: false,
};

static GROK: SiteAdapter = SiteAdapter {
    key: SiteKey::Grok,
    selectors: SelectorSet {
        message_turn: r#"[data-testid*="message"], [data-role], [data-message-author-role], article, .message"#,
        role_user: r#"[data-role="user"], [data-message-author-role="user"], [data-testid*="user"], .message.user, .user-message"#,
        role_assistant: r#"[data-role="assistant"], [data-message-author-role="assistant"], [data-testid*="assistant"], [data-testid*="bot"], .message.assistant, .assistant-message, .ai-message"#,
        ai_content: r#"[data-role="assistant"] .markdown, [data-message-author-role="assistant"] .markdown, [data-testid*="assistant"] .markdown, .assistant-message .markdown, .ai-message .markdown, .assistant-message, .ai-message, .markdown"#,
        user_content: r#"[data-role="user"] .markdown, [data-message-author-role="user"] .markdown, [data-testid*="user"] .markdown, .user-message .markdown, .user-message, [data-role="user"]"#,
    },
    root_selectors: &[
        r#"[data-testid="conversation"]"#,
        r#"[data-testid="chat-history"]"#,
        r#"[data-testid*="conversation"]"#,
        "main",
    ],
    scroll_container_selectors: &[
        r#"[data-testid="chat-history"]"#,
        r#"[data-testid*="scroll"]"#,
        "main",
    ],
    user_label: "You",
    assistant_label: "Grok",
    default_title: "Grok Conversation",
    title_strip_pattern: r"\s*[-|]\s*Grok.*",
    active_title_selector: Some(r#"[data-testid*="conversation"][aria-current="page"] [data-testid*="title"]"#),
    scroll_strategy: ScrollStrategy::GrokLike,
    export_base_name: "grok-export",
    fallback_selectors: &[
        "[data-role]",
        "[data-message-author-role]",
        r#"[data-testid*="message"]"#,
        ".message",
        "article",
    ],
    expands_collapsed_blocks: false,
    has_workspace_tab: false,
};
