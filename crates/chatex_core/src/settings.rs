use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ExportFormat;

pub const SETTING_FORMAT: &str = "ced-format";
pub const SETTING_DOCK: &str = "ced-dock";
pub const SETTING_FILE_NAME: &str = "ced-filename";
pub const SETTING_PANEL_TAB: &str = "ced-panel-tab";
pub const SETTING_FORMULA_COPY_FORMAT: &str = "ced-formula-copy-format";
pub const SETTING_TIMELINE: &str = "ced-timeline-enabled";
pub const SETTING_TITLE_UPDATER: &str = "ced-title-updater-enabled";
pub const SETTING_TITLE_UPDATER_FOLDER: &str = "ced-title-updater-include-folder";
pub const SETTING_SIDEBAR_AUTOHIDE: &str = "ced-sidebar-autohide-enabled";
pub const SETTING_FOLDER_SPACING: &str = "ced-folder-spacing";
pub const SETTING_MARKDOWN_PATCHER: &str = "ced-markdown-patcher-enabled";
pub const SETTING_SNOW_EFFECT: &str = "ced-snow-effect-enabled";

/// Flat key/value patch as delivered by the settings page.
pub type SettingsPatch = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PanelSide {
    Left,
    #[default]
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PanelTab {
    #[default]
    Export,
    Workspace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FormulaCopyFormat {
    #[default]
    Latex,
    Mathml,
    NoDollar,
}

impl FormulaCopyFormat {
    fn from_value(value: &Value) -> Self {
        match value.as_str() {
            Some("mathml") => FormulaCopyFormat::Mathml,
            Some("no-dollar") => FormulaCopyFormat::NoDollar,
            _ => FormulaCopyFormat::Latex,
        }
    }
}

/// Persisted user preferences. Only `format` and `file_name` feed the export
/// pipeline; the remaining toggles belong to auxiliary page features and are
/// stored so a round trip through the settings page is lossless.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub format: ExportFormat,
    pub dock: PanelSide,
    pub file_name: String,
    pub panel_tab: PanelTab,
    pub formula_copy_format: FormulaCopyFormat,
    pub timeline_enabled: bool,
    pub title_updater_enabled: bool,
    pub title_updater_include_folder: bool,
    pub sidebar_autohide_enabled: bool,
    pub folder_spacing: u8,
    pub markdown_patcher_enabled: bool,
    pub snow_effect_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            format: ExportFormat::Text,
            dock: PanelSide::Right,
            file_name: String::new(),
            panel_tab: PanelTab::Export,
            formula_copy_format: FormulaCopyFormat::Latex,
            timeline_enabled: true,
            title_updater_enabled: true,
            title_updater_include_folder: true,
            sidebar_autohide_enabled: false,
            folder_spacing: 2,
            markdown_patcher_enabled: true,
            snow_effect_enabled: true,
        }
    }
}

impl Settings {
    /// Applies every recognised key in `patch`, normalising each value the
    /// same way stored values are normalised on load. Returns the keys whose
    /// value actually changed. Unknown keys are ignored.
    ///
    /// `workspace_tab_available` is false on sites without a workspace tab;
    /// there the panel tab always normalises to `export`.
    pub fn apply_patch(
        &mut self,
        patch: &SettingsPatch,
        workspace_tab_available: bool,
    ) -> Vec<&'static str> {
        let mut changed = Vec::new();
        for (key, value) in patch {
            let key: &'static str = match key.as_str() {
                SETTING_FORMAT => {
                    let next = value
                        .as_str()
                        .and_then(ExportFormat::from_id)
                        .unwrap_or(ExportFormat::Text);
                    set_if_changed(&mut self.format, next, SETTING_FORMAT, &mut changed);
                    continue;
                }
                SETTING_FILE_NAME => {
                    let next = value.as_str().unwrap_or_default().trim().to_string();
                    set_if_changed(&mut self.file_name, next, SETTING_FILE_NAME, &mut changed);
                    continue;
                }
                SETTING_DOCK => {
                    let next = if value.as_str() == Some("left") {
                        PanelSide::Left
                    } else {
                        PanelSide::Right
                    };
                    set_if_changed(&mut self.dock, next, SETTING_DOCK, &mut changed);
                    continue;
                }
                SETTING_PANEL_TAB => {
                    let next = if value.as_str() == Some("workspace") && workspace_tab_available {
                        PanelTab::Workspace
                    } else {
                        PanelTab::Export
                    };
                    set_if_changed(&mut self.panel_tab, next, SETTING_PANEL_TAB, &mut changed);
                    continue;
                }
                SETTING_FORMULA_COPY_FORMAT => {
                    let next = FormulaCopyFormat::from_value(value);
                    set_if_changed(
                        &mut self.formula_copy_format,
                        next,
                        SETTING_FORMULA_COPY_FORMAT,
                        &mut changed,
                    );
                    continue;
                }
                SETTING_FOLDER_SPACING => {
                    let next = normalize_folder_spacing(value);
                    set_if_changed(
                        &mut self.folder_spacing,
                        next,
                        SETTING_FOLDER_SPACING,
                        &mut changed,
                    );
                    continue;
                }
                SETTING_TIMELINE => SETTING_TIMELINE,
                SETTING_TITLE_UPDATER => SETTING_TITLE_UPDATER,
                SETTING_TITLE_UPDATER_FOLDER => SETTING_TITLE_UPDATER_FOLDER,
                SETTING_SIDEBAR_AUTOHIDE => SETTING_SIDEBAR_AUTOHIDE,
                SETTING_MARKDOWN_PATCHER => SETTING_MARKDOWN_PATCHER,
                SETTING_SNOW_EFFECT => SETTING_SNOW_EFFECT,
                _ => continue,
            };
            // Toggles default on unless explicitly false; auto-hide defaults
            // off unless explicitly true.
            let next = if key == SETTING_SIDEBAR_AUTOHIDE {
                value.as_bool() == Some(true)
            } else {
                value.as_bool() != Some(false)
            };
            let slot = match key {
                SETTING_TIMELINE => &mut self.timeline_enabled,
                SETTING_TITLE_UPDATER => &mut self.title_updater_enabled,
                SETTING_TITLE_UPDATER_FOLDER => &mut self.title_updater_include_folder,
                SETTING_SIDEBAR_AUTOHIDE => &mut self.sidebar_autohide_enabled,
                SETTING_MARKDOWN_PATCHER => &mut self.markdown_patcher_enabled,
                _ => &mut self.snow_effect_enabled,
            };
            set_if_changed(slot, next, key, &mut changed);
        }
        changed
    }

    /// The user-chosen export name, if any.
    pub fn export_name(&self) -> Option<&str> {
        let trimmed = self.file_name.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }
}

fn set_if_changed<T: PartialEq>(
    slot: &mut T,
    next: T,
    key: &'static str,
    changed: &mut Vec<&'static str>,
) {
    if *slot != next {
        *slot = next;
        changed.push(key);
    }
}

fn normalize_folder_spacing(value: &Value) -> u8 {
    let numeric = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match numeric {
        Some(n) if n.is_finite() => n.round().clamp(0.0, 16.0) as u8,
        _ => 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patch(entries: &[(&str, Value)]) -> SettingsPatch {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn unknown_format_normalizes_to_text() {
        let mut settings = Settings {
            format: ExportFormat::Pdf,
            ..Settings::default()
        };
        let changed = settings.apply_patch(&patch(&[(SETTING_FORMAT, json!("hide"))]), true);
        assert_eq!(settings.format, ExportFormat::Text);
        assert_eq!(changed, vec![SETTING_FORMAT]);
    }

    #[test]
    fn folder_spacing_is_clamped_and_rounded() {
        let mut settings = Settings::default();
        settings.apply_patch(&patch(&[(SETTING_FOLDER_SPACING, json!(40))]), true);
        assert_eq!(settings.folder_spacing, 16);
        settings.apply_patch(&patch(&[(SETTING_FOLDER_SPACING, json!("3.6"))]), true);
        assert_eq!(settings.folder_spacing, 4);
        settings.apply_patch(&patch(&[(SETTING_FOLDER_SPACING, json!(null))]), true);
        assert_eq!(settings.folder_spacing, 2);
    }

    #[test]
    fn workspace_tab_requires_site_support() {
        let mut settings = Settings::default();
        settings.apply_patch(&patch(&[(SETTING_PANEL_TAB, json!("workspace"))]), false);
        assert_eq!(settings.panel_tab, PanelTab::Export);
        settings.apply_patch(&patch(&[(SETTING_PANEL_TAB, json!("workspace"))]), true);
        assert_eq!(settings.panel_tab, PanelTab::Workspace);
    }

    #[test]
    fn toggles_follow_their_defaults() {
        let mut settings = Settings::default();
        let changed = settings.apply_patch(
            &patch(&[
                (SETTING_TIMELINE, json!("yes")),
                (SETTING_SIDEBAR_AUTOHIDE, json!("yes")),
                (SETTING_SNOW_EFFECT, json!(false)),
            ]),
            true,
        );
        assert!(settings.timeline_enabled);
        assert!(!settings.sidebar_autohide_enabled);
        assert!(!settings.snow_effect_enabled);
        assert_eq!(changed, vec![SETTING_SNOW_EFFECT]);
    }
}
