use crate::state::PendingExport;
use crate::{AppState, ControlMessage, Effect, ExportFormat, ExportPhase, Msg, Notice};

pub const NO_SELECTION_NOTICE: &str = "Please select at least one message";
pub const NOTHING_TO_EXPORT_NOTICE: &str = "No messages available to export";

/// Pure update function: applies a message to state and returns any effects.
pub fn update(mut state: AppState, msg: Msg) -> (AppState, Vec<Effect>) {
    let effects = match msg {
        Msg::TogglePanel => {
            let open = !state.panel_open();
            state.set_panel_open(open);
            Vec::new()
        }
        Msg::Control(control) => return apply_control(state, control),
        Msg::RefreshRequested => {
            let token = state.issue_token();
            vec![Effect::CollectTurns { token }]
        }
        Msg::TurnsCollected {
            token,
            rows,
            title,
            parse_mode,
        } => {
            // A newer refresh was issued after this one started.
            if token != state.latest_token() {
                return (state, Vec::new());
            }
            state.commit_turns(token, rows, title, parse_mode);
            let mut effects = vec![Effect::CommitCollected { token }];
            let ready = state
                .pending_export()
                .and_then(|pending| pending.awaiting)
                .is_some_and(|awaiting| awaiting <= token);
            if ready {
                effects.extend(start_pending_export(&mut state));
            }
            effects
        }
        Msg::TurnToggled { id } => {
            state.toggle_turn(&id);
            Vec::new()
        }
        Msg::SelectAllClicked => {
            state.toggle_all();
            Vec::new()
        }
        Msg::ExportRequested { format } => {
            let format = format.unwrap_or(state.settings().format);
            request_export(&mut state, format)
        }
        Msg::PagePrepared => match state.pending_export().cloned() {
            Some(pending) if pending.awaiting.is_none() => {
                let token = state.issue_token();
                state.set_pending_export(Some(PendingExport {
                    awaiting: Some(token),
                    ..pending
                }));
                vec![Effect::CollectTurns { token }]
            }
            _ => Vec::new(),
        },
        Msg::ExportProgress(phase) => {
            if state.is_exporting() && phase != ExportPhase::Idle {
                state.set_phase(phase);
            }
            Vec::new()
        }
        Msg::ExportFinished { result } => {
            if !state.is_exporting() {
                return (state, Vec::new());
            }
            state.set_phase(ExportPhase::Idle);
            state.set_pending_export(None);
            match result {
                Ok(file_name) => state.push_notice(Notice::info(format!("Exported {file_name}"))),
                Err(message) => state.push_notice(Notice::error(format!("Export failed: {message}"))),
            }
            Vec::new()
        }
        Msg::SettingsPatched(patch) => {
            let workspace = state.capabilities().workspace_tab;
            let changed = state.settings_mut().apply_patch(&patch, workspace);
            if changed.is_empty() {
                Vec::new()
            } else {
                state.mark_dirty();
                vec![Effect::PersistSettings(state.settings().clone())]
            }
        }
        Msg::Tick | Msg::NoOp => Vec::new(),
    };

    (state, effects)
}

fn apply_control(mut state: AppState, control: ControlMessage) -> (AppState, Vec<Effect>) {
    match control {
        ControlMessage::TogglePanel => update(state, Msg::TogglePanel),
        ControlMessage::ExportNow => {
            state.set_panel_open(true);
            update(state, Msg::ExportRequested { format: None })
        }
        ControlMessage::ApplySettingsPatch(patch) => update(state, Msg::SettingsPatched(patch)),
    }
}

fn request_export(state: &mut AppState, format: ExportFormat) -> Vec<Effect> {
    // Only one export may run; a second request is dropped.
    if state.is_exporting() {
        return Vec::new();
    }
    if !state.has_selection() {
        state.push_notice(Notice::info(NO_SELECTION_NOTICE));
        return Vec::new();
    }
    state.set_phase(ExportPhase::Preparing);
    let auto_load = format.is_visual();
    let expand_collapsed = state.capabilities().collapsed_blocks;
    if auto_load || expand_collapsed {
        state.set_pending_export(Some(PendingExport {
            format,
            had_all_selected: state.all_selected(),
            awaiting: None,
        }));
        return vec![Effect::PreparePage {
            auto_load,
            expand_collapsed,
        }];
    }
    vec![run_export(state, format)]
}

fn start_pending_export(state: &mut AppState) -> Vec<Effect> {
    let Some(pending) = state.pending_export().cloned() else {
        return Vec::new();
    };
    state.set_pending_export(None);
    if pending.had_all_selected {
        state.select_all();
    }
    if !state.has_selection() {
        state.set_phase(ExportPhase::Idle);
        state.push_notice(Notice::error(NOTHING_TO_EXPORT_NOTICE));
        return Vec::new();
    }
    vec![run_export(state, pending.format)]
}

fn run_export(state: &AppState, format: ExportFormat) -> Effect {
    Effect::RunExport {
        format,
        file_name: state.settings().export_name().map(str::to_string),
        selected_ids: state.selected_ids(),
    }
}
