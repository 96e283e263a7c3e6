use std::collections::{BTreeSet, VecDeque};
use std::fs;
use std::path::Path;

use anyhow::{anyhow, bail, Context};
use chatex_core::{
    parse_control_message, update, AppState, ControlAck, ControlError, Msg, Notice, NoticeLevel,
    SiteCapabilities,
};
use chatex_engine::{decode_page, AutoLoadTiming, LiveDocument, SiteKey};
use chatex_logging::{chatex_info, chatex_warn};
use clap::Parser;
use url::Url;

use super::cli::{Cli, Command, ControlArgs, ExportArgs, PageArgs, SettingsArgs};
use super::effects::{EffectRunner, RunnerConfig};
use super::{logging, persistence};

pub fn run_app() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::initialize(cli.log.into(), cli.verbose);

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting runtime")?;
    let out = cli.out;
    runtime.block_on(async move {
        match cli.command {
            Command::Export(args) => export(&out, args).await,
            Command::List(args) => list(&out, &args).await,
            Command::Settings(args) => settings(&out, args).await,
            Command::Control(args) => control(&out, args).await,
        }
    })
}

/// Core state plus the runner that carries out its effects.
struct Session {
    state: AppState,
    runner: EffectRunner,
}

impl Session {
    fn new(out: &Path, capabilities: SiteCapabilities, doc: Option<LiveDocument>, config: RunnerConfig) -> Self {
        let settings = persistence::load_settings(out);
        Self {
            state: AppState::with_settings(settings, capabilities),
            runner: EffectRunner::new(doc, config),
        }
    }

    /// Feeds `msg` through `update` and runs effects until nothing is left.
    async fn dispatch(&mut self, msg: Msg) {
        let mut inbox = VecDeque::from([msg]);
        while let Some(msg) = inbox.pop_front() {
            let state = std::mem::take(&mut self.state);
            let (state, effects) = update(state, msg);
            self.state = state;
            for effect in effects {
                inbox.extend(self.runner.run(effect).await);
            }
        }
    }

    /// Leaves exactly the 1-based turn numbers in `wanted` selected.
    async fn select_only(&mut self, wanted: &[usize]) -> anyhow::Result<()> {
        let rows = self.state.view().turns;
        if let Some(bad) = wanted.iter().find(|n| **n == 0 || **n > rows.len()) {
            bail!("turn {bad} does not exist; the page has {} turn(s)", rows.len());
        }
        let wanted: BTreeSet<usize> = wanted.iter().copied().collect();
        for (index, row) in rows.into_iter().enumerate() {
            if row.selected != wanted.contains(&(index + 1)) {
                self.dispatch(Msg::TurnToggled { id: row.id }).await;
            }
        }
        Ok(())
    }

    fn take_notices(&mut self) -> Vec<Notice> {
        self.state.take_notices()
    }
}

fn load_page(args: &PageArgs) -> anyhow::Result<LiveDocument> {
    let bytes = fs::read(&args.page).with_context(|| format!("reading {}", args.page.display()))?;
    let decoded = decode_page(&bytes, args.content_type.as_deref())?;
    let url = Url::parse(&args.url).with_context(|| format!("parsing page address {}", args.url))?;
    let mut doc = LiveDocument::parse(&decoded.markup, url);
    if let Some(site) = &args.site {
        let key = SiteKey::from_id(site).ok_or_else(|| anyhow!("unknown site `{site}`"))?;
        doc = doc.with_site(key);
    }
    chatex_info!(
        "Loaded {} ({} bytes, {}) as {}",
        args.page.display(),
        bytes.len(),
        decoded.encoding_label,
        doc.adapter().key.id()
    );
    Ok(doc)
}

fn capabilities_of(doc: &LiveDocument) -> SiteCapabilities {
    SiteCapabilities {
        workspace_tab: doc.adapter().has_workspace_tab,
        collapsed_blocks: doc.adapter().expands_collapsed_blocks,
    }
}

fn page_session(out: &Path, doc: LiveDocument, config: RunnerConfig) -> Session {
    let capabilities = capabilities_of(&doc);
    Session::new(out, capabilities, Some(doc), config)
}

fn saved_page_config(out: &Path) -> RunnerConfig {
    RunnerConfig {
        // Saved markup never grows, so there is nothing to wait for.
        timing: AutoLoadTiming::immediate(),
        ..RunnerConfig::new(out.to_path_buf())
    }
}

fn report(notices: &[Notice]) {
    for notice in notices {
        match notice.level {
            NoticeLevel::Info => println!("{}", notice.text),
            NoticeLevel::Error => eprintln!("{}", notice.text),
        }
    }
}

async fn export(out: &Path, args: ExportArgs) -> anyhow::Result<()> {
    let doc = load_page(&args.page)?;
    let capture = args
        .capture
        .as_ref()
        .map(|path| fs::read(path).with_context(|| format!("reading capture {}", path.display())))
        .transpose()?;
    let config = RunnerConfig {
        cookie_header: args.cookie,
        capture,
        chunked: args.chunked,
        file_name: args.name,
        ..saved_page_config(out)
    };
    let mut session = page_session(out, doc, config);

    session.dispatch(Msg::RefreshRequested).await;
    if !args.only.is_empty() {
        session.select_only(&args.only).await?;
    }
    session
        .dispatch(Msg::ExportRequested {
            format: args.format.map(Into::into),
        })
        .await;

    let notices = session.take_notices();
    report(&notices);
    match session.runner.last_export() {
        Some(delivered) => {
            if let Some(path) = &delivered.path {
                println!("{}", path.display());
            }
            Ok(())
        }
        None => {
            let reason = notices
                .last()
                .map(|notice| notice.text.clone())
                .unwrap_or_else(|| "nothing was exported".to_string());
            Err(anyhow!(reason))
        }
    }
}

async fn list(out: &Path, args: &PageArgs) -> anyhow::Result<()> {
    let doc = load_page(args)?;
    let mut session = page_session(out, doc, saved_page_config(out));
    session.dispatch(Msg::RefreshRequested).await;

    let view = session.state.view();
    println!("{} ({} parse)", view.page_title, view.parse_mode);
    for (index, (row, turn)) in view.turns.iter().zip(session.runner.turns()).enumerate() {
        let extras = match (turn.images.len(), turn.attachments.len()) {
            (0, 0) => String::new(),
            (images, attachments) => format!("  [{images} image(s), {attachments} attachment(s)]"),
        };
        println!(
            "{:>3}  {:<9} {}  {}{}",
            index + 1,
            role_label(row.role),
            row.id,
            row.preview.replace('\n', " "),
            extras
        );
    }
    Ok(())
}

fn role_label(role: chatex_core::TurnRole) -> &'static str {
    match role {
        chatex_core::TurnRole::User => "user",
        chatex_core::TurnRole::Assistant => "assistant",
        chatex_core::TurnRole::Unknown => "unknown",
    }
}

async fn settings(out: &Path, args: SettingsArgs) -> anyhow::Result<()> {
    let capabilities = SiteCapabilities {
        workspace_tab: args.workspace,
        ..SiteCapabilities::default()
    };
    let mut session = Session::new(out, capabilities, None, RunnerConfig::new(out.to_path_buf()));
    if !args.set.is_empty() {
        session
            .dispatch(Msg::SettingsPatched(args.set.into_iter().collect()))
            .await;
    }

    let text = ron::ser::to_string_pretty(session.state.settings(), ron::ser::PrettyConfig::new())
        .context("formatting settings")?;
    println!("{text}");
    Ok(())
}

async fn control(out: &Path, args: ControlArgs) -> anyhow::Result<()> {
    let message = match parse_control_message(&args.message) {
        Ok(message) => message,
        Err(ControlError::UnknownType(kind)) => {
            // Left unacknowledged for other listeners.
            chatex_warn!("Ignoring control message of type {}", kind);
            return Ok(());
        }
        Err(err) => {
            println!("{}", serde_json::to_string(&ControlAck::failed(&err))?);
            return Ok(());
        }
    };

    let mut session = match args.page_args() {
        Some(page) => {
            let doc = load_page(&page)?;
            let mut session = page_session(out, doc, saved_page_config(out));
            session.dispatch(Msg::RefreshRequested).await;
            session
        }
        None => Session::new(out, SiteCapabilities::default(), None, RunnerConfig::new(out.to_path_buf())),
    };
    println!("{}", serde_json::to_string(&ControlAck::ok())?);

    session.dispatch(Msg::Control(message)).await;
    report(&session.take_notices());
    if let Some(path) = session.runner.last_export().and_then(|d| d.path.as_ref()) {
        println!("{}", path.display());
    }
    Ok(())
}
