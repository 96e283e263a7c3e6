use std::fs;
use std::path::{Path, PathBuf};

use chatex_core::Settings;
use chatex_engine::{ensure_output_dir, AtomicFileWriter};
use chatex_logging::{chatex_error, chatex_info, chatex_warn};

pub(crate) const SETTINGS_FILENAME: &str = ".chatex_settings.ron";

/// Loads stored preferences; anything unreadable falls back to defaults.
pub(crate) fn load_settings(output_dir: &Path) -> Settings {
    let path = output_dir.join(SETTINGS_FILENAME);
    let content = match fs::read_to_string(&path) {
        Ok(text) => text,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Settings::default();
        }
        Err(err) => {
            chatex_warn!("Failed to read settings from {:?}: {}", path, err);
            return Settings::default();
        }
    };

    match ron::from_str::<Settings>(&content) {
        Ok(settings) => {
            chatex_info!("Loaded settings from {:?}", path);
            settings
        }
        Err(err) => {
            chatex_warn!("Failed to parse settings from {:?}: {}", path, err);
            Settings::default()
        }
    }
}

pub(crate) fn save_settings(output_dir: &Path, settings: &Settings) -> Option<PathBuf> {
    if let Err(err) = ensure_output_dir(output_dir) {
        chatex_error!("Failed to ensure output dir {:?}: {}", output_dir, err);
        return None;
    }

    let content = match ron::ser::to_string_pretty(settings, ron::ser::PrettyConfig::new()) {
        Ok(text) => text,
        Err(err) => {
            chatex_error!("Failed to serialize settings: {}", err);
            return None;
        }
    };

    let writer = AtomicFileWriter::new(PathBuf::from(output_dir));
    match writer.write(SETTINGS_FILENAME, content.as_bytes()) {
        Ok(path) => Some(path),
        Err(err) => {
            chatex_error!("Failed to write settings to {:?}: {}", output_dir, err);
            None
        }
    }
}
