use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::view_model::{AppViewModel, TurnRowView};
use crate::{ExportFormat, Settings};

/// Monotonic refresh generation. Only the latest issued token may commit.
pub type RefreshToken = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Unknown,
}

/// The slice of a turn the panel needs: identity, role and a preview line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRow {
    pub id: String,
    pub role: TurnRole,
    pub preview: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportPhase {
    #[default]
    Idle,
    Preparing,
    ResolvingImages,
    Rendering,
    Packaging,
    Downloading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            text: text.into(),
        }
    }
}

/// What the host page supports beyond the common export flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SiteCapabilities {
    /// The panel offers a workspace tab.
    pub workspace_tab: bool,
    /// Turns can hide code and file blocks behind expand controls.
    pub collapsed_blocks: bool,
}

/// An export waiting on a pre-export refresh before its job can be built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingExport {
    pub format: ExportFormat,
    pub had_all_selected: bool,
    pub awaiting: Option<RefreshToken>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppState {
    turns: Vec<TurnRow>,
    selected: BTreeSet<String>,
    page_title: String,
    parse_mode: String,
    issued_token: RefreshToken,
    applied_token: RefreshToken,
    phase: ExportPhase,
    pending_export: Option<PendingExport>,
    panel_open: bool,
    capabilities: SiteCapabilities,
    settings: Settings,
    notices: Vec<Notice>,
    dirty: bool,
}

impl AppState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: Settings, capabilities: SiteCapabilities) -> Self {
        Self {
            settings,
            capabilities,
            ..Self::default()
        }
    }

    pub fn view(&self) -> AppViewModel {
        AppViewModel {
            turns: self
                .turns
                .iter()
                .map(|turn| TurnRowView {
                    id: turn.id.clone(),
                    role: turn.role,
                    preview: turn.preview.clone(),
                    selected: self.selected.contains(&turn.id),
                })
                .collect(),
            selected_count: self.selected.len(),
            all_selected: self.all_selected(),
            page_title: self.page_title.clone(),
            parse_mode: self.parse_mode.clone(),
            exporting: self.is_exporting(),
            phase: self.phase,
            panel_open: self.panel_open,
            format: self.settings.format,
            file_name: self.settings.file_name.clone(),
            last_notice: self.notices.last().cloned(),
            dirty: self.dirty,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn is_exporting(&self) -> bool {
        self.phase != ExportPhase::Idle || self.pending_export.is_some()
    }

    pub fn latest_token(&self) -> RefreshToken {
        self.issued_token
    }

    pub fn applied_token(&self) -> RefreshToken {
        self.applied_token
    }

    /// Ids of selected turns in display order.
    pub fn selected_ids(&self) -> Vec<String> {
        self.turns
            .iter()
            .filter(|turn| self.selected.contains(&turn.id))
            .map(|turn| turn.id.clone())
            .collect()
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }

    pub fn consume_dirty(&mut self) -> bool {
        std::mem::take(&mut self.dirty)
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn all_selected(&self) -> bool {
        !self.turns.is_empty() && self.turns.iter().all(|t| self.selected.contains(&t.id))
    }

    pub(crate) fn issue_token(&mut self) -> RefreshToken {
        self.issued_token += 1;
        self.issued_token
    }

    /// Replaces the turn list and reconciles the selection by id.
    ///
    /// An empty or complete previous selection selects every new turn.
    /// Otherwise surviving ids stay selected; if none survive, all are.
    pub(crate) fn commit_turns(
        &mut self,
        token: RefreshToken,
        rows: Vec<TurnRow>,
        title: String,
        parse_mode: String,
    ) {
        let select_all = self.selected.is_empty() || self.all_selected();
        let next: BTreeSet<String> = if select_all {
            rows.iter().map(|row| row.id.clone()).collect()
        } else {
            let kept: BTreeSet<String> = rows
                .iter()
                .filter(|row| self.selected.contains(&row.id))
                .map(|row| row.id.clone())
                .collect();
            if kept.is_empty() {
                rows.iter().map(|row| row.id.clone()).collect()
            } else {
                kept
            }
        };
        self.turns = rows;
        self.selected = next;
        self.page_title = title;
        self.parse_mode = parse_mode;
        self.applied_token = token;
        self.mark_dirty();
    }

    pub(crate) fn select_all(&mut self) {
        self.selected = self.turns.iter().map(|t| t.id.clone()).collect();
    }

    pub(crate) fn toggle_all(&mut self) {
        if self.all_selected() {
            self.selected.clear();
        } else {
            self.select_all();
        }
        self.mark_dirty();
    }

    pub(crate) fn toggle_turn(&mut self, id: &str) -> bool {
        if !self.turns.iter().any(|t| t.id == id) {
            return false;
        }
        if !self.selected.remove(id) {
            self.selected.insert(id.to_string());
        }
        self.mark_dirty();
        true
    }

    pub(crate) fn has_selection(&self) -> bool {
        !self.selected.is_empty()
    }

    pub(crate) fn set_phase(&mut self, phase: ExportPhase) {
        if self.phase != phase {
            self.phase = phase;
            self.mark_dirty();
        }
    }

    pub(crate) fn pending_export(&self) -> Option<&PendingExport> {
        self.pending_export.as_ref()
    }

    pub(crate) fn set_pending_export(&mut self, pending: Option<PendingExport>) {
        self.pending_export = pending;
        self.mark_dirty();
    }

    pub(crate) fn push_notice(&mut self, notice: Notice) {
        self.notices.push(notice);
        self.mark_dirty();
    }

    pub(crate) fn set_panel_open(&mut self, open: bool) {
        if self.panel_open != open {
            self.panel_open = open;
            self.mark_dirty();
        }
    }

    pub(crate) fn panel_open(&self) -> bool {
        self.panel_open
    }

    pub(crate) fn settings_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub(crate) fn capabilities(&self) -> SiteCapabilities {
        self.capabilities
    }
}
