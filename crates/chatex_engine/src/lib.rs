//! Chatex engine: page model, turn extraction, image resolution and export
//! pipeline.
pub mod autoload;
mod cache;
pub mod color;
mod decode;
mod dom;
mod export;
mod extract;
mod fetch;
mod filename;
mod fragment;
pub mod markdown;
mod media;
pub mod pdf;
mod persist;
mod probe;
mod proxy;
mod raster;
pub mod relay;
pub mod render;
mod resolve;
pub mod signature;
mod site;
pub mod snapshot;
mod title;
mod types;

pub use autoload::{AutoLoadTiming, AutoLoader, CollapsedBlockExpander, PageActions, ScrollSurface, StaticSurface};
pub use cache::ImageCache;
pub use decode::{decode_page, DecodeError, DecodedPage};
pub use dom::{collapsed_text, inner_text, normalize_url, CompiledSite, LiveDocument, MESSAGE_ID_ATTR};
pub use export::{
    format_csv, format_excel, format_json, format_markdown, format_text, prepare_export, Clock, ExportEngine,
    ExportError, ExportFormat, ExportOptions, ExportOutcome, ExportRequest, PreparedExport, VisualPlan,
};
pub use extract::{
    collect_conversation_turns, dedupe_message_nodes, detect_node_role, find_conversation_root,
    is_likely_message_node, resolve_collection_root, Extraction,
};
pub use fetch::{to_data_url, CredentialMode, FetchSettings, Fetcher, ReqwestFetcher};
pub use filename::{export_file_name, sanitize_title};
pub use fragment::{escape_attr, escape_html, escape_text, FragmentElement, FragmentNode};
pub use media::{extract_attachments, extract_images, merge_image_sources};
pub use persist::{ensure_output_dir, AtomicFileWriter, PersistError};
pub use probe::{MarkupProbe, PageProbe, Rect, BACKGROUND_ATTR, CANVAS_ATTR, DPR_ATTR, RECT_ATTR, VIEWPORT_ATTR};
pub use proxy::{FetcherProxy, ImageProxy, NoProxy, ProxyError};
pub use raster::{encode_png, CapturedRasterizer, RasterError, Rasterizer, UnavailableRasterizer};
pub use relay::{Artifact, ChunkedRelay, Delivered, DirectorySink, DownloadSink, MemorySink, RelayError};
pub use render::{RenderJob, RenderPipeline, RenderTarget};
pub use resolve::{should_skip_inlining, ImageResolver, ResolveReport, MAX_CONCURRENT_IMAGE_FETCHES};
pub use site::{ScrollStrategy, SelectorSet, SiteAdapter, SiteKey};
pub use title::detect_conversation_title;
pub use types::{
    Attachment, ChannelProgressSink, ExportEvent, ExportPhase, FailureKind, FetchError, FetchMetadata, FetchOutput,
    ImageDescriptor, NullProgressSink, ParseMode, ProgressSink, Role, Turn,
};
