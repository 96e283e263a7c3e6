use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{mpsc, Arc};

use chatex_core::{Effect, ExportFormat, ExportPhase, Msg, RefreshToken, Settings, TurnRole, TurnRow};
use chatex_engine::{
    collect_conversation_turns, detect_conversation_title, AutoLoadTiming, AutoLoader, CapturedRasterizer,
    ChannelProgressSink, ChunkedRelay, CollapsedBlockExpander, Delivered, DirectorySink, DownloadSink, ExportEngine,
    ExportEvent, ExportOptions, ExportRequest, FetchSettings, Fetcher, FetcherProxy, ImageCache, ImageResolver,
    LiveDocument, PageActions, Rasterizer, RenderPipeline, ReqwestFetcher, Role, StaticSurface, Turn,
    UnavailableRasterizer,
};
use chatex_logging::{chatex_debug, chatex_info, chatex_warn};
use chrono::Utc;
use ego_tree::NodeId;

use super::persistence;

/// How the runner reaches the outside world.
pub struct RunnerConfig {
    pub output_dir: PathBuf,
    pub cookie_header: Option<String>,
    /// PNG of the rendered page for raster formats.
    pub capture: Option<Vec<u8>>,
    pub chunked: bool,
    /// Overrides the stored export name.
    pub file_name: Option<String>,
    pub timing: AutoLoadTiming,
}

impl RunnerConfig {
    pub fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            cookie_header: None,
            capture: None,
            chunked: false,
            file_name: None,
            timing: AutoLoadTiming::default(),
        }
    }
}

struct Collected {
    turns: Vec<Turn>,
    title: String,
}

/// The loaded page and the engine bound to its address.
struct PageSession {
    doc: LiveDocument,
    engine: ExportEngine,
    events: mpsc::Receiver<ExportEvent>,
}

impl PageSession {
    fn new(doc: LiveDocument, config: &RunnerConfig) -> Self {
        let base = doc.base_url().clone();
        let fetcher: Arc<dyn Fetcher> = Arc::new(ReqwestFetcher::new(FetchSettings {
            cookie_header: config.cookie_header.clone(),
            referer: Some(base.to_string()),
            ..FetchSettings::default()
        }));
        let resolver = ImageResolver::new(
            fetcher.clone(),
            Arc::new(FetcherProxy::new(fetcher)),
            Arc::new(ImageCache::new()),
            base,
        );

        let primary: Arc<dyn Rasterizer> = match &config.capture {
            Some(png) => Arc::new(CapturedRasterizer::new(png.clone())),
            None => Arc::new(UnavailableRasterizer::new("capture")),
        };
        let secondary: Arc<dyn Rasterizer> = Arc::new(UnavailableRasterizer::new("foreign-object"));

        let directory: Arc<dyn DownloadSink> = Arc::new(DirectorySink::new(config.output_dir.clone()));
        let sink: Arc<dyn DownloadSink> = if config.chunked {
            Arc::new(ChunkedRelay::new(directory))
        } else {
            directory
        };

        let (tx, events) = mpsc::channel();
        let options = ExportOptions {
            exported_utc: Arc::new(|| Utc::now().to_rfc3339()),
            ..ExportOptions::default()
        };
        let engine = ExportEngine::new(
            resolver,
            RenderPipeline::new(primary, secondary),
            sink,
            Arc::new(ChannelProgressSink::new(tx)),
            options,
        );

        Self { doc, engine, events }
    }
}

/// Executes core effects against the engine and returns the messages they
/// produce. Turn data stays here; the core only sees rows.
pub struct EffectRunner {
    page: Option<PageSession>,
    pending: HashMap<RefreshToken, Collected>,
    current: Collected,
    output_dir: PathBuf,
    file_name: Option<String>,
    timing: AutoLoadTiming,
    last_export: Option<Delivered>,
}

impl EffectRunner {
    pub fn new(doc: Option<LiveDocument>, config: RunnerConfig) -> Self {
        let page = doc.map(|doc| PageSession::new(doc, &config));
        Self {
            page,
            pending: HashMap::new(),
            current: Collected {
                turns: Vec::new(),
                title: String::new(),
            },
            output_dir: config.output_dir,
            file_name: config.file_name,
            timing: config.timing,
            last_export: None,
        }
    }

    pub fn turns(&self) -> &[Turn] {
        &self.current.turns
    }

    pub fn last_export(&self) -> Option<&Delivered> {
        self.last_export.as_ref()
    }

    pub async fn run(&mut self, effect: Effect) -> Vec<Msg> {
        match effect {
            Effect::CollectTurns { token } => self.collect(token).into_iter().collect(),
            Effect::CommitCollected { token } => {
                if let Some(collected) = self.pending.remove(&token) {
                    self.current = collected;
                }
                // Older generations can never commit now.
                self.pending.retain(|pending, _| *pending > token);
                Vec::new()
            }
            Effect::PreparePage {
                auto_load,
                expand_collapsed,
            } => {
                self.prepare(auto_load, expand_collapsed).await;
                vec![Msg::PagePrepared]
            }
            Effect::RunExport {
                format,
                file_name,
                selected_ids,
            } => self.export(format, file_name, selected_ids).await,
            Effect::PersistSettings(settings) => {
                self.persist(&settings);
                Vec::new()
            }
        }
    }

    fn collect(&mut self, token: RefreshToken) -> Option<Msg> {
        let doc = &self.page.as_ref()?.doc;
        let extraction = collect_conversation_turns(doc);
        let title = detect_conversation_title(doc);
        chatex_debug!(
            "Collected {} turn(s) for refresh {} ({})",
            extraction.turns.len(),
            token,
            extraction.mode.as_str()
        );
        let rows = extraction.turns.iter().map(turn_row).collect();
        let parse_mode = extraction.mode.as_str().to_string();
        self.pending.insert(
            token,
            Collected {
                turns: extraction.turns,
                title: title.clone(),
            },
        );
        Some(Msg::TurnsCollected {
            token,
            rows,
            title,
            parse_mode,
        })
    }

    async fn prepare(&self, auto_load: bool, expand_collapsed: bool) {
        let Some(PageSession { doc, .. }) = self.page.as_ref() else {
            return;
        };
        if auto_load {
            let surface = StaticSurface::for_document(doc);
            if let Err(err) = AutoLoader::for_site(doc.adapter().key, self.timing.clone())
                .load(&surface)
                .await
            {
                chatex_warn!("Auto-load stopped early: {}", err);
            }
        }
        if expand_collapsed {
            let expanded = CollapsedBlockExpander::new(self.timing.clone())
                .expand(doc, &SavedPageActions)
                .await;
            chatex_debug!("Expanded {} collapsed block(s)", expanded);
        }
    }

    async fn export(
        &mut self,
        format: ExportFormat,
        file_name: Option<String>,
        selected_ids: Vec<String>,
    ) -> Vec<Msg> {
        let Some(page) = self.page.as_ref() else {
            return vec![Msg::ExportFinished {
                result: Err("no conversation page loaded".to_string()),
            }];
        };
        let request = ExportRequest {
            format,
            file_name: self.file_name.clone().or(file_name),
            selected_ids,
            title: self.current.title.clone(),
        };

        let result = page.engine.export(&page.doc, &self.current.turns, request).await;

        let mut msgs: Vec<Msg> = page.events.try_iter().filter_map(progress_msg).collect();
        let result = match result {
            Ok(outcome) => {
                chatex_info!(
                    "Export run {} wrote {} ({} bytes, {} image(s) inlined, {} failed)",
                    outcome.run,
                    outcome.delivered.file_name,
                    outcome.delivered.byte_len,
                    outcome.images.resolved,
                    outcome.images.failed
                );
                self.last_export = Some(outcome.delivered.clone());
                Ok(outcome.delivered.file_name)
            }
            Err(err) => {
                chatex_warn!("Export failed: {}", err);
                Err(err.to_string())
            }
        };
        msgs.push(Msg::ExportFinished { result });
        msgs
    }

    fn persist(&self, settings: &Settings) {
        if let Some(path) = persistence::save_settings(&self.output_dir, settings) {
            chatex_info!("Saved settings to {:?}", path);
        }
    }
}

fn turn_row(turn: &Turn) -> TurnRow {
    TurnRow {
        id: turn.id.clone(),
        role: match turn.role {
            Role::User => TurnRole::User,
            Role::Assistant => TurnRole::Assistant,
            Role::Unknown => TurnRole::Unknown,
        },
        preview: turn.preview.clone(),
    }
}

fn progress_msg(event: ExportEvent) -> Option<Msg> {
    match event {
        ExportEvent::Phase { phase, .. } => Some(Msg::ExportProgress(map_phase(phase))),
        ExportEvent::ImagesResolved { resolved, failed, .. } => {
            chatex_debug!("Images resolved={} failed={}", resolved, failed);
            None
        }
        ExportEvent::RenderFallback {
            rasterizer, message, ..
        } => {
            chatex_debug!("Rasterizer {} gave up: {}", rasterizer, message);
            None
        }
    }
}

fn map_phase(phase: chatex_engine::ExportPhase) -> ExportPhase {
    match phase {
        chatex_engine::ExportPhase::Preparing => ExportPhase::Preparing,
        chatex_engine::ExportPhase::ResolvingImages => ExportPhase::ResolvingImages,
        chatex_engine::ExportPhase::Rendering => ExportPhase::Rendering,
        chatex_engine::ExportPhase::Packaging => ExportPhase::Packaging,
        chatex_engine::ExportPhase::Downloading => ExportPhase::Downloading,
    }
}

/// A saved page has no live widgets; requested interactions are only logged.
struct SavedPageActions;

impl PageActions for SavedPageActions {
    fn open_details(&self, node: NodeId) {
        chatex_debug!("Would open collapsed block {:?}", node);
    }

    fn click(&self, node: NodeId) {
        chatex_debug!("Would click expander {:?}", node);
    }
}
