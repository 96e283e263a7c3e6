use crate::{ControlMessage, ExportFormat, ExportPhase, RefreshToken, SettingsPatch, TurnRow};

#[derive(Debug, Clone, PartialEq)]
pub enum Msg {
    /// Toolbar action or control message toggled the panel.
    TogglePanel,
    /// Inbound message from the extension host.
    Control(ControlMessage),
    /// Page mutated or the user asked to rescan the conversation.
    RefreshRequested,
    /// Extraction finished for the given refresh generation.
    TurnsCollected {
        token: RefreshToken,
        rows: Vec<TurnRow>,
        title: String,
        parse_mode: String,
    },
    /// User clicked a turn's checkbox.
    TurnToggled { id: String },
    /// User clicked Select all / Select none.
    SelectAllClicked,
    /// User clicked Export. `None` uses the persisted format.
    ExportRequested { format: Option<ExportFormat> },
    /// The live page was scrolled and expanded ahead of a visual export.
    PagePrepared,
    /// Export pipeline moved to a new phase.
    ExportProgress(ExportPhase),
    /// Export pipeline finished with the written file name or an error text.
    ExportFinished { result: Result<String, String> },
    /// Settings changed from the panel.
    SettingsPatched(SettingsPatch),
    /// UI/render tick to coalesce rendering.
    Tick,
    /// Fallback for placeholder wiring.
    NoOp,
}
