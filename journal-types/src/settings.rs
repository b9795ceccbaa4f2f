//! The singleton settings record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Settings always live at this primary key.
pub const SETTINGS_ID: i64 = 1;

pub const DEFAULT_CURSOR_COLOR: &str = "#3b82f6";
pub const DEFAULT_TEXT_COLOR: &str = "#171717";
pub const DEFAULT_CLEANUP_PROMPT: &str = "Make me sound like a pirate.";

/// User preferences, stored as a single row.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub lock_enabled: bool,
    pub cursor_color: String,
    pub text_color: String,
    pub cleanup_enabled: bool,
    pub cleanup_prompt: String,
    pub selected_model: Option<String>,
    /// Last local write; `None` until the record is first saved.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            lock_enabled: false,
            cursor_color: DEFAULT_CURSOR_COLOR.to_string(),
            text_color: DEFAULT_TEXT_COLOR.to_string(),
            cleanup_enabled: false,
            cleanup_prompt: DEFAULT_CLEANUP_PROMPT.to_string(),
            selected_model: None,
            updated_at: None,
        }
    }
}

impl Settings {
    /// Merges the set fields of `patch` into `self`.
    pub fn apply(&mut self, patch: &SettingsPatch) {
        if let Some(v) = patch.lock_enabled {
            self.lock_enabled = v;
        }
        if let Some(v) = &patch.cursor_color {
            self.cursor_color = v.clone();
        }
        if let Some(v) = &patch.text_color {
            self.text_color = v.clone();
        }
        if let Some(v) = patch.cleanup_enabled {
            self.cleanup_enabled = v;
        }
        if let Some(v) = &patch.cleanup_prompt {
            self.cleanup_prompt = v.clone();
        }
        if let Some(v) = &patch.selected_model {
            self.selected_model = v.clone();
        }
    }
}

/// Partial update. `None` leaves the stored field untouched; for
/// `selected_model`, `Some(None)` clears it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettingsPatch {
    pub lock_enabled: Option<bool>,
    pub cursor_color: Option<String>,
    pub text_color: Option<String>,
    pub cleanup_enabled: Option<bool>,
    pub cleanup_prompt: Option<String>,
    pub selected_model: Option<Option<String>>,
}

impl SettingsPatch {
    pub fn lock_enabled(enabled: bool) -> Self {
        Self {
            lock_enabled: Some(enabled),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Settings as seen by a consumer that loads them asynchronously.
///
/// Keeps "not loaded yet" distinct from "loaded and equal to the defaults".
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum SettingsState {
    #[default]
    Uninitialized,
    Loaded(Settings),
}

impl SettingsState {
    pub fn is_loaded(&self) -> bool {
        matches!(self, SettingsState::Loaded(_))
    }

    pub fn get(&self) -> Option<&Settings> {
        match self {
            SettingsState::Loaded(s) => Some(s),
            SettingsState::Uninitialized => None,
        }
    }

    pub fn lock_enabled(&self) -> Option<bool> {
        self.get().map(|s| s.lock_enabled)
    }
}
