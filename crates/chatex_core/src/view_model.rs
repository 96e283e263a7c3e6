use crate::{ExportFormat, ExportPhase, Notice, TurnRole};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AppViewModel {
    pub turns: Vec<TurnRowView>,
    pub selected_count: usize,
    pub all_selected: bool,
    pub page_title: String,
    pub parse_mode: String,
    pub exporting: bool,
    pub phase: ExportPhase,
    pub panel_open: bool,
    pub format: ExportFormat,
    pub file_name: String,
    pub last_notice: Option<Notice>,
    pub dirty: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnRowView {
    pub id: String,
    pub role: TurnRole,
    pub preview: String,
    pub selected: bool,
}
