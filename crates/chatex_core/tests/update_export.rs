use std::sync::Once;

use chatex_core::{
    update, AppState, Effect, ExportFormat, ExportPhase, Msg, NoticeLevel, Settings,
    SiteCapabilities, TurnRole, TurnRow, NOTHING_TO_EXPORT_NOTICE,
};
use pretty_assertions::assert_eq;

fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(chatex_logging::initialize_for_tests);
}

fn rows(ids: &[&str]) -> Vec<TurnRow> {
    ids.iter()
        .map(|id| TurnRow {
            id: id.to_string(),
            role: TurnRole::User,
            preview: String::new(),
        })
        .collect()
}

fn loaded(ids: &[&str]) -> AppState {
    let (state, _) = update(AppState::new(), Msg::RefreshRequested);
    let token = state.latest_token();
    let (state, _) = update(
        state,
        Msg::TurnsCollected {
            token,
            rows: rows(ids),
            title: "T".into(),
            parse_mode: "normal".into(),
        },
    );
    state
}

#[test]
fn export_with_nothing_selected_only_notifies() {
    init_logging();
    let state = loaded(&["a-1"]);
    let (state, _) = update(state, Msg::SelectAllClicked);

    let (mut state, effects) = update(
        state,
        Msg::ExportRequested {
            format: Some(ExportFormat::Markdown),
        },
    );

    assert!(effects.is_empty());
    assert!(!state.is_exporting());
    let notices = state.take_notices();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].text.contains("select at least one message"));
}

#[test]
fn text_export_runs_immediately_with_selection_in_order() {
    init_logging();
    let state = loaded(&["a-1", "b-1", "c-1"]);
    let (state, _) = update(state, Msg::TurnToggled { id: "b-1".into() });

    let (state, effects) = update(
        state,
        Msg::ExportRequested {
            format: Some(ExportFormat::Text),
        },
    );

    assert_eq!(
        effects,
        vec![Effect::RunExport {
            format: ExportFormat::Text,
            file_name: None,
            selected_ids: vec!["a-1".into(), "c-1".into()],
        }]
    );
    assert!(state.is_exporting());
    assert_eq!(state.view().phase, ExportPhase::Preparing);
}

#[test]
fn second_export_request_is_dropped_while_running() {
    init_logging();
    let state = loaded(&["a-1"]);
    let (state, _) = update(state, Msg::ExportRequested { format: None });
    let (state, effects) = update(state, Msg::ExportRequested { format: None });
    assert!(effects.is_empty());

    let (state, _) = update(state, Msg::ExportProgress(ExportPhase::Downloading));
    assert_eq!(state.view().phase, ExportPhase::Downloading);

    let (mut state, _) = update(
        state,
        Msg::ExportFinished {
            result: Ok("chat.txt".into()),
        },
    );
    assert!(!state.is_exporting());
    assert_eq!(state.take_notices()[0].level, NoticeLevel::Info);

    let (_state, effects) = update(state, Msg::ExportRequested { format: None });
    assert_eq!(effects.len(), 1);
}

#[test]
fn failed_export_releases_flag_with_error_notice() {
    init_logging();
    let state = loaded(&["a-1"]);
    let (state, _) = update(state, Msg::ExportRequested { format: None });
    let (mut state, _) = update(
        state,
        Msg::ExportFinished {
            result: Err("relay closed".into()),
        },
    );
    assert!(!state.is_exporting());
    let notice = state.take_notices().pop().unwrap();
    assert_eq!(notice.level, NoticeLevel::Error);
    assert!(notice.text.contains("relay closed"));
}

#[test]
fn visual_export_prepares_page_and_refreshes_first() {
    init_logging();
    let state = loaded(&["a-1", "b-1"]);
    let (state, effects) = update(
        state,
        Msg::ExportRequested {
            format: Some(ExportFormat::Pdf),
        },
    );
    assert_eq!(
        effects,
        vec![Effect::PreparePage {
            auto_load: true,
            expand_collapsed: false,
        }]
    );
    assert!(state.is_exporting());

    let (state, effects) = update(state, Msg::PagePrepared);
    let token = state.latest_token();
    assert_eq!(effects, vec![Effect::CollectTurns { token }]);

    // Auto-loading surfaced an older turn; the full selection follows it.
    let (state, effects) = update(
        state,
        Msg::TurnsCollected {
            token,
            rows: rows(&["z-1", "a-1", "b-1"]),
            title: "T".into(),
            parse_mode: "normal".into(),
        },
    );
    assert_eq!(
        effects,
        vec![
            Effect::CommitCollected { token },
            Effect::RunExport {
                format: ExportFormat::Pdf,
                file_name: None,
                selected_ids: vec!["z-1".into(), "a-1".into(), "b-1".into()],
            },
        ]
    );
    assert!(state.is_exporting());
}

#[test]
fn visual_export_aborts_when_refresh_finds_nothing() {
    init_logging();
    let state = loaded(&["a-1"]);
    let (state, _) = update(
        state,
        Msg::ExportRequested {
            format: Some(ExportFormat::Screenshot),
        },
    );
    let (state, _) = update(state, Msg::PagePrepared);
    let token = state.latest_token();
    let (mut state, effects) = update(
        state,
        Msg::TurnsCollected {
            token,
            rows: Vec::new(),
            title: "T".into(),
            parse_mode: "fallback".into(),
        },
    );
    assert_eq!(effects, vec![Effect::CommitCollected { token }]);
    assert!(!state.is_exporting());
    assert_eq!(state.take_notices()[0].text, NOTHING_TO_EXPORT_NOTICE);
}

#[test]
fn export_uses_persisted_format_and_file_name() {
    init_logging();
    let settings = Settings {
        format: ExportFormat::Csv,
        file_name: "  my chat ".into(),
        ..Settings::default()
    };
    let (state, _) = update(
        AppState::with_settings(settings, SiteCapabilities::default()),
        Msg::RefreshRequested,
    );
    let (state, _) = update(
        state,
        Msg::TurnsCollected {
            token: 1,
            rows: rows(&["a-1"]),
            title: "T".into(),
            parse_mode: "normal".into(),
        },
    );
    let (_state, effects) = update(state, Msg::ExportRequested { format: None });
    assert_eq!(
        effects,
        vec![Effect::RunExport {
            format: ExportFormat::Csv,
            file_name: Some("my chat".into()),
            selected_ids: vec!["a-1".into()],
        }]
    );
}

#[test]
fn collapsed_block_sites_prepare_before_text_exports() {
    init_logging();
    let caps = SiteCapabilities {
        workspace_tab: false,
        collapsed_blocks: true,
    };
    let (state, _) = update(
        AppState::with_settings(Settings::default(), caps),
        Msg::RefreshRequested,
    );
    let (state, _) = update(
        state,
        Msg::TurnsCollected {
            token: 1,
            rows: rows(&["a-1"]),
            title: "T".into(),
            parse_mode: "normal".into(),
        },
    );
    let (_state, effects) = update(
        state,
        Msg::ExportRequested {
            format: Some(ExportFormat::Markdown),
        },
    );
    assert_eq!(
        effects,
        vec![Effect::PreparePage {
            auto_load: false,
            expand_collapsed: true,
        }]
    );
}
