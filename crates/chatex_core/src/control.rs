use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::SettingsPatch;

/// Messages the extension host sends into the page.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    TogglePanel,
    ExportNow,
    ApplySettingsPatch(SettingsPatch),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ControlError {
    #[error("invalid message")]
    Malformed,
    #[error("unknown message type {0}")]
    UnknownType(String),
    #[error("invalid patch")]
    InvalidPatch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlAck {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl ControlAck {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    pub fn failed(error: &ControlError) -> Self {
        Self {
            ok: false,
            error: Some(error.to_string()),
        }
    }
}

/// Parses a JSON control message of the form `{"type": "CED_...", ...}`.
///
/// Unknown types are reported separately so callers can leave them
/// unacknowledged for other listeners.
pub fn parse_control_message(raw: &str) -> Result<ControlMessage, ControlError> {
    let value: Value = serde_json::from_str(raw).map_err(|_| ControlError::Malformed)?;
    let object = value.as_object().ok_or(ControlError::Malformed)?;
    let kind = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or(ControlError::Malformed)?;
    match kind {
        "CED_TOGGLE_PANEL" => Ok(ControlMessage::TogglePanel),
        "CED_EXPORT_NOW" => Ok(ControlMessage::ExportNow),
        "CED_APPLY_SETTINGS_PATCH" => match object.get("patch") {
            Some(Value::Object(patch)) => Ok(ControlMessage::ApplySettingsPatch(
                patch
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            )),
            _ => Err(ControlError::InvalidPatch),
        },
        other => Err(ControlError::UnknownType(other.to_string())),
    }
}
