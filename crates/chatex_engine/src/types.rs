use std::fmt;

use ego_tree::NodeId;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseMode {
    #[default]
    Normal,
    Fallback,
}

impl ParseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ParseMode::Normal => "normal",
            ParseMode::Fallback => "fallback",
        }
    }
}

/// An `<img>` found inside a turn. `index` ties it to the placeholder token
/// in the turn's markdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageDescriptor {
    pub src: String,
    pub alt: String,
    pub width: u32,
    pub height: u32,
    pub index: Option<usize>,
    pub data_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub href: String,
    pub text: String,
}

/// One extracted conversation turn.
///
/// `node` points back into the [`crate::LiveDocument`] the turn was read from;
/// the document keeps the id stamp for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub id: String,
    pub role: Role,
    pub node: NodeId,
    pub text: String,
    pub markdown: String,
    pub markdown_resolved: String,
    pub html: String,
    pub images: Vec<ImageDescriptor>,
    pub attachments: Vec<Attachment>,
    pub formulas: Vec<String>,
    pub preview: String,
}

pub(crate) fn preview_of(text: &str) -> String {
    text.chars().take(100).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportPhase {
    Preparing,
    ResolvingImages,
    Rendering,
    Packaging,
    Downloading,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExportEvent {
    Phase { run: u64, phase: ExportPhase },
    ImagesResolved { run: u64, resolved: usize, failed: usize },
    RenderFallback { run: u64, rasterizer: String, message: String },
}

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ExportEvent);
}

pub struct ChannelProgressSink {
    tx: std::sync::mpsc::Sender<ExportEvent>,
}

impl ChannelProgressSink {
    pub fn new(tx: std::sync::mpsc::Sender<ExportEvent>) -> Self {
        Self { tx }
    }
}

impl ProgressSink for ChannelProgressSink {
    fn emit(&self, event: ExportEvent) {
        let _ = self.tx.send(event);
    }
}

/// Progress sink that drops every event.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: ExportEvent) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutput {
    pub bytes: Vec<u8>,
    pub metadata: FetchMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchMetadata {
    pub original_url: String,
    pub final_url: String,
    pub redirect_count: usize,
    pub content_type: Option<String>,
    pub byte_len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    pub kind: FailureKind,
    pub message: String,
}

impl FetchError {
    pub(crate) fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureKind {
    InvalidUrl,
    UnsupportedScheme,
    HttpStatus(u16),
    Timeout,
    RedirectLimitExceeded,
    TooLarge { max_bytes: u64, actual: Option<u64> },
    UnsupportedContentType { content_type: String },
    Network,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::InvalidUrl => write!(f, "invalid url"),
            FailureKind::UnsupportedScheme => write!(f, "unsupported scheme"),
            FailureKind::HttpStatus(code) => write!(f, "http status {code}"),
            FailureKind::Timeout => write!(f, "timeout"),
            FailureKind::RedirectLimitExceeded => write!(f, "redirect limit exceeded"),
            FailureKind::TooLarge { max_bytes, actual } => {
                write!(f, "response too large (max {max_bytes}, actual {actual:?})")
            }
            FailureKind::UnsupportedContentType { content_type } => {
                write!(f, "unsupported content type {content_type}")
            }
            FailureKind::Network => write!(f, "network error"),
        }
    }
}
