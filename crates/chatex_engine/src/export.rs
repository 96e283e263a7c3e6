//! Export orchestration: selection, per-format serialization, the visual
//! render path and delivery.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chatex_logging::{chatex_debug, chatex_error, chatex_info};
use serde::Serialize;
use thiserror::Error;
use url::Url;

pub use chatex_core::ExportFormat;

use crate::cache::ImageCache;
use crate::color::{color_to_rgb, is_dark_color};
use crate::dom::LiveDocument;
use crate::filename::export_file_name;
use crate::fragment::{escape_html, FragmentElement};
use crate::pdf::{build_pdf, PdfError};
use crate::raster::{encode_png, RasterError};
use crate::relay::{Artifact, Delivered, DownloadSink, RelayError};
use crate::render::{
    clamp_render_width, collect_link_rects, prepare_snapshot_for_render, render_height, render_scale, LinkRect,
    RenderJob, RenderPipeline, RenderTarget,
};
use crate::resolve::{ImageResolver, ResolveReport};
use crate::site::{SiteAdapter, SiteKey};
use crate::snapshot::{
    apply_image_map, build_export_snapshot_root, build_full_html_document, enhance_dark_code_contrast,
    known_image_map, page_shell, pending_remote_images, PageShell,
};
use crate::{ExportEvent, ExportPhase, ProgressSink, Role, Turn};

const TEXT_SEPARATOR: &str = "\n----------------\n\n";
const UTF8_BOM: &str = "\u{feff}";

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("select at least one message")]
    NoSelection,
    #[error("no exportable conversation container found")]
    NothingToRender,
    #[error("an export is already running")]
    Busy,
    #[error("render failed: {0}")]
    Raster(#[from] RasterError),
    #[error("pdf failed: {0}")]
    Pdf(#[from] PdfError),
    #[error("download failed: {0}")]
    Relay(#[from] RelayError),
    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Clock = Arc<dyn Fn() -> String + Send + Sync>;

#[derive(Clone)]
pub struct ExportOptions {
    /// Visual formats show the whole conversation, not just the selection.
    pub include_all_turns_in_visual: bool,
    /// ISO-8601 timestamp for the JSON `date` field.
    pub exported_utc: Clock,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_all_turns_in_visual: true,
            exported_utc: Arc::new(String::new),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    pub format: ExportFormat,
    pub file_name: Option<String>,
    pub selected_ids: Vec<String>,
    pub title: String,
}

pub fn format_text(turns: &[Turn], adapter: &SiteAdapter) -> String {
    turns
        .iter()
        .map(|t| format!("{}:\n\n{}\n", adapter.role_label(t.role), t.text))
        .collect::<Vec<_>>()
        .join(TEXT_SEPARATOR)
}

pub fn format_markdown(turns: &[Turn], title: &str, adapter: &SiteAdapter) -> String {
    let heading = if title.trim().is_empty() { "Conversation" } else { title };
    let mut out = format!("# {heading}\n\n");
    for turn in turns {
        out.push_str(&format!("### {}\n\n", adapter.role_label(turn.role)));
        out.push_str(&turn.markdown_resolved);
        out.push_str("\n\n");
        if !turn.attachments.is_empty() {
            let list: Vec<String> = turn
                .attachments
                .iter()
                .map(|a| format!("- [{}]({})", a.text, a.href))
                .collect();
            out.push_str(&format!("**Attachments**:\n{}\n\n", list.join("\n")));
        }
        out.push_str("---\n\n");
    }
    out
}

#[derive(Serialize)]
struct JsonExport<'a> {
    title: &'a str,
    date: String,
    turns: Vec<JsonTurn<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonTurn<'a> {
    role: Role,
    role_name: &'a str,
    text: &'a str,
    markdown: &'a str,
    html: &'a str,
}

pub fn format_json(turns: &[Turn], title: &str, date: String, adapter: &SiteAdapter) -> Result<String, serde_json::Error> {
    let export = JsonExport {
        title,
        date,
        turns: turns
            .iter()
            .map(|t| JsonTurn {
                role: t.role,
                role_name: adapter.role_label(t.role),
                text: &t.text,
                markdown: &t.markdown_resolved,
                html: &t.html,
            })
            .collect(),
    };
    serde_json::to_string_pretty(&export)
}

fn table_rows<'a>(turns: &'a [Turn], adapter: &SiteAdapter) -> Vec<[&'a str; 2]> {
    let mut rows = vec![["Role", "Content"]];
    rows.extend(turns.iter().map(|t| [adapter.role_label(t.role), t.text.as_str()]));
    rows
}

pub fn format_csv(turns: &[Turn], adapter: &SiteAdapter) -> String {
    table_rows(turns, adapter)
        .iter()
        .map(|row| {
            row.iter()
                .map(|cell| format!("\"{}\"", cell.replace('"', "\"\"")))
                .collect::<Vec<_>>()
                .join(",")
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn format_excel(turns: &[Turn], adapter: &SiteAdapter) -> String {
    let body: String = table_rows(turns, adapter)
        .iter()
        .map(|row| {
            let cells: String = row.iter().map(|c| format!("<td>{}</td>", escape_html(c))).collect();
            format!("<tr>{cells}</tr>")
        })
        .collect();
    format!("<html><head><meta charset=\"UTF-8\"></head><body><table>{body}</table></body></html>")
}

/// Snapshot state for a visual export, detached from the live document.
#[derive(Debug, Clone)]
pub struct VisualPlan {
    pub root: FragmentElement,
    pub pending_images: Vec<String>,
    pub shell: PageShell,
    pub links: Vec<LinkRect>,
    pub width: u32,
    pub height: u32,
    pub content_width_px: f64,
    pub scale: f64,
    pub site: SiteKey,
    pub base: Url,
}

/// Everything an export needs, owned.
#[derive(Debug, Clone)]
pub struct PreparedExport {
    pub format: ExportFormat,
    pub file_name: String,
    pub title: String,
    pub adapter: &'static SiteAdapter,
    pub selection: Vec<Turn>,
    pub visual: Option<VisualPlan>,
}

/// Reads everything the export needs from the live page.
///
/// `turns` is the whole extracted conversation; the selection is the
/// subset named by `request.selected_ids`, in conversation order.
pub fn prepare_export(
    doc: &LiveDocument,
    turns: &[Turn],
    request: &ExportRequest,
    cache: &ImageCache,
    options: &ExportOptions,
) -> Result<PreparedExport, ExportError> {
    let selected: HashSet<&str> = request.selected_ids.iter().map(String::as_str).collect();
    let selection: Vec<Turn> = turns.iter().filter(|t| selected.contains(t.id.as_str())).cloned().collect();
    if selection.is_empty() {
        return Err(ExportError::NoSelection);
    }
    let adapter = doc.adapter();
    let file_name = export_file_name(
        request.file_name.as_deref(),
        Some(request.title.as_str()),
        adapter,
        request.format.extension(),
    );

    let visual = if request.format.is_visual() {
        Some(plan_visual(doc, turns, &selection, request, cache, options)?)
    } else {
        None
    };

    Ok(PreparedExport {
        format: request.format,
        file_name,
        title: request.title.clone(),
        adapter,
        selection,
        visual,
    })
}

fn plan_visual(
    doc: &LiveDocument,
    turns: &[Turn],
    selection: &[Turn],
    request: &ExportRequest,
    cache: &ImageCache,
    options: &ExportOptions,
) -> Result<VisualPlan, ExportError> {
    let include_all = options.include_all_turns_in_visual;
    let visual_turns = if include_all && !turns.is_empty() { turns } else { selection };
    let snapshot = build_export_snapshot_root(doc, visual_turns, include_all).ok_or(ExportError::NothingToRender)?;
    let mut root = snapshot.root;
    let base = doc.base_url().clone();
    let known = known_image_map(visual_turns, cache, &base);
    apply_image_map(&mut root, &known, &base);
    let pending_images = pending_remote_images(doc, &root, &known);

    let source = doc.element(snapshot.source_root).ok_or(ExportError::NothingToRender)?;
    let probe = doc.probe();
    let rect = probe.rect(source);
    let measured = rect
        .map(|r| r.width)
        .filter(|w| *w > 0.0)
        .unwrap_or(probe.viewport_width() - 40.0);
    let width = clamp_render_width(measured);
    let height = render_height(rect.map(|r| r.height).unwrap_or(0.0), visual_turns.len());
    let target = if request.format == ExportFormat::Pdf { RenderTarget::Pdf } else { RenderTarget::Screenshot };
    let scale = render_scale(target, probe.device_pixel_ratio(), width, height);
    let title = match request.title.trim() {
        "" => doc.adapter().default_title,
        title => title,
    };

    Ok(VisualPlan {
        root,
        pending_images,
        shell: page_shell(doc, title),
        links: collect_link_rects(doc, source),
        width,
        height,
        content_width_px: f64::from(width),
        scale,
        site: doc.adapter().key,
        base,
    })
}

/// Result of a delivered export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportOutcome {
    pub run: u64,
    pub format: ExportFormat,
    pub delivered: Delivered,
    pub images: ResolveReport,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
        chatex_logging::set_export_run(0);
    }
}

/// Runs one export at a time. A request made while another is in flight
/// fails with [`ExportError::Busy`] without side effects.
pub struct ExportEngine {
    resolver: ImageResolver,
    pipeline: RenderPipeline,
    sink: Arc<dyn DownloadSink>,
    progress: Arc<dyn ProgressSink>,
    options: ExportOptions,
    busy: AtomicBool,
    runs: AtomicU64,
}

impl ExportEngine {
    pub fn new(
        resolver: ImageResolver,
        pipeline: RenderPipeline,
        sink: Arc<dyn DownloadSink>,
        progress: Arc<dyn ProgressSink>,
        options: ExportOptions,
    ) -> Self {
        Self {
            resolver,
            pipeline,
            sink,
            progress,
            options,
            busy: AtomicBool::new(false),
            runs: AtomicU64::new(0),
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn resolver(&self) -> &ImageResolver {
        &self.resolver
    }

    pub async fn export(&self, doc: &LiveDocument, turns: &[Turn], request: ExportRequest) -> Result<ExportOutcome, ExportError> {
        if self.busy.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(ExportError::Busy);
        }
        let _guard = BusyGuard(&self.busy);
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        chatex_logging::set_export_run(run);
        chatex_info!(
            "Export run {}: {} of {} selected turn(s)",
            run,
            request.format.id(),
            request.selected_ids.len()
        );

        self.phase(run, ExportPhase::Preparing);
        let result = match prepare_export(doc, turns, &request, self.resolver.cache(), &self.options) {
            Ok(prepared) => self.run_prepared(run, prepared).await,
            Err(err) => Err(err),
        };
        match &result {
            Ok(outcome) => chatex_info!("Export run {} delivered {}", run, outcome.delivered.file_name),
            Err(err) => chatex_error!("Export run {} failed: {}", run, err),
        }
        result
    }

    async fn run_prepared(&self, run: u64, prepared: PreparedExport) -> Result<ExportOutcome, ExportError> {
        let PreparedExport {
            format,
            file_name,
            title,
            adapter,
            mut selection,
            visual,
        } = prepared;

        let mut images = ResolveReport::default();
        if format.resolves_images() {
            self.phase(run, ExportPhase::ResolvingImages);
            images = self.resolver.resolve_turns(&mut selection).await;
            self.report_images(run, images);
        }

        let bytes = match visual {
            Some(mut plan) => {
                self.phase(run, ExportPhase::ResolvingImages);
                images = self.hydrate(&mut plan).await;
                self.report_images(run, images);
                self.phase(run, ExportPhase::Rendering);
                self.render_visual(run, format, plan).await?
            }
            None => {
                self.phase(run, ExportPhase::Packaging);
                self.serialize(format, &selection, &title, adapter)?
            }
        };

        self.phase(run, ExportPhase::Downloading);
        let delivered = self.sink.deliver(Artifact {
            file_name,
            mime: format.mime().to_string(),
            bytes,
        })?;
        Ok(ExportOutcome {
            run,
            format,
            delivered,
            images,
        })
    }

    fn serialize(&self, format: ExportFormat, turns: &[Turn], title: &str, adapter: &SiteAdapter) -> Result<Vec<u8>, ExportError> {
        let content = match format {
            ExportFormat::Markdown => format_markdown(turns, title, adapter),
            ExportFormat::Json => format_json(turns, title, (self.options.exported_utc)(), adapter)?,
            ExportFormat::Csv => format_csv(turns, adapter),
            ExportFormat::Excel => format_excel(turns, adapter),
            _ => format_text(turns, adapter),
        };
        Ok(content.into_bytes())
    }

    /// Fetches the snapshot's remaining remote images, then applies every
    /// data URL now in the cache.
    async fn hydrate(&self, plan: &mut VisualPlan) -> ResolveReport {
        let pending = std::mem::take(&mut plan.pending_images);
        let total = pending.len();
        let fetched = self.resolver.resolve_urls(pending).await;
        apply_image_map(&mut plan.root, &fetched, &plan.base);
        let cached: HashMap<String, String> = self.resolver.cache().entries().into_iter().collect();
        apply_image_map(&mut plan.root, &cached, &plan.base);
        ResolveReport {
            resolved: fetched.len(),
            failed: total - fetched.len(),
        }
    }

    async fn render_visual(&self, run: u64, format: ExportFormat, mut plan: VisualPlan) -> Result<Vec<u8>, ExportError> {
        let background = plan.shell.background.clone();
        if !format.is_raster() {
            enhance_dark_code_contrast(&mut plan.root, plan.site, &background);
            let html = build_full_html_document(&plan.shell, &plan.root);
            self.phase(run, ExportPhase::Packaging);
            let html = if format == ExportFormat::Word { format!("{UTF8_BOM}{html}") } else { html };
            return Ok(html.into_bytes());
        }

        prepare_snapshot_for_render(&mut plan.root);
        enhance_dark_code_contrast(&mut plan.root, plan.site, &background);
        let job = RenderJob {
            html: build_full_html_document(&plan.shell, &plan.root),
            width: plan.width,
            height: plan.height,
            scale: plan.scale,
            background: background.clone(),
            target: if format == ExportFormat::Pdf { RenderTarget::Pdf } else { RenderTarget::Screenshot },
        };
        chatex_debug!("Rendering {}x{} at scale {}", job.width, job.height, job.scale);
        let canvas = self.pipeline.render(&job, run, self.progress.as_ref()).await;

        self.phase(run, ExportPhase::Packaging);
        if format == ExportFormat::Screenshot {
            return Ok(encode_png(&canvas)?);
        }
        let rgb = color_to_rgb(&background, [255, 255, 255]);
        Ok(build_pdf(&canvas, &plan.links, plan.content_width_px, rgb, is_dark_color(rgb))?)
    }

    fn phase(&self, run: u64, phase: ExportPhase) {
        self.progress.emit(ExportEvent::Phase { run, phase });
    }

    fn report_images(&self, run: u64, report: ResolveReport) {
        self.progress.emit(ExportEvent::ImagesResolved {
            run,
            resolved: report.resolved,
            failed: report.failed,
        });
    }
}
