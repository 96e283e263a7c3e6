use crate::{ExportFormat, RefreshToken, Settings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Run extraction and report back with `Msg::TurnsCollected`.
    CollectTurns { token: RefreshToken },
    /// The result collected under `token` was accepted; make it current.
    CommitCollected { token: RefreshToken },
    /// Scroll lazily rendered turns into existence and expand collapsed blocks,
    /// then report `Msg::PagePrepared`.
    PreparePage {
        auto_load: bool,
        expand_collapsed: bool,
    },
    /// Build and deliver the artifact for the given selection.
    RunExport {
        format: ExportFormat,
        file_name: Option<String>,
        selected_ids: Vec<String>,
    },
    PersistSettings(Settings),
}
