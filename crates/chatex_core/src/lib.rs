//! Chatex core: pure state machine and view-model helpers.
mod control;
mod effect;
mod format;
mod msg;
mod settings;
mod state;
mod update;
mod view_model;

pub use control::{parse_control_message, ControlAck, ControlError, ControlMessage};
pub use effect::Effect;
pub use format::ExportFormat;
pub use msg::Msg;
pub use settings::{
    FormulaCopyFormat, PanelSide, PanelTab, Settings, SettingsPatch, SETTING_DOCK,
    SETTING_FILE_NAME, SETTING_FOLDER_SPACING, SETTING_FORMAT, SETTING_FORMULA_COPY_FORMAT,
    SETTING_MARKDOWN_PATCHER, SETTING_PANEL_TAB, SETTING_SIDEBAR_AUTOHIDE, SETTING_SNOW_EFFECT,
    SETTING_TIMELINE, SETTING_TITLE_UPDATER, SETTING_TITLE_UPDATER_FOLDER,
};
pub use state::{
    AppState, ExportPhase, Notice, NoticeLevel, RefreshToken, SiteCapabilities, TurnRole, TurnRow,
};
pub use update::{update, NOTHING_TO_EXPORT_NOTICE, NO_SELECTION_NOTICE};
pub use view_model::{AppViewModel, TurnRowView};
