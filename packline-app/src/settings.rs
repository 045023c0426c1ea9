//! Persistent application settings (JSON file in the data directory).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Input device for voice commands; `None` selects the system default.
    pub preferred_input_device: Option<String>,
    /// Master switch for voice input. Off means manual controls only.
    pub listen_enabled: bool,
    /// Phrase announced when the run is fully packed.
    pub completion_phrase: String,
    /// RMS threshold below which captured audio counts as silence.
    pub silence_rms: f32,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            preferred_input_device: None,
            listen_enabled: true,
            completion_phrase: "All items packed.".into(),
            silence_rms: 0.012,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.preferred_input_device = self
            .preferred_input_device
            .as_ref()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty());
        let phrase = self.completion_phrase.trim();
        self.completion_phrase = if phrase.is_empty() {
            AppSettings::default().completion_phrase
        } else {
            phrase.to_string()
        };
        self.silence_rms = self.silence_rms.clamp(0.001, 0.5);
    }
}

pub fn default_settings_path() -> PathBuf {
    std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local")
                .join("share")
        })
        .join("packline")
        .join("settings.json")
}

pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_settings(&dir.path().join("settings.json"));
        assert!(settings.listen_enabled);
        assert_eq!(settings.completion_phrase, "All items packed.");
    }

    #[test]
    fn settings_round_trip_through_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("settings.json");

        let mut settings = AppSettings::default();
        settings.preferred_input_device = Some("USB Headset".into());
        settings.listen_enabled = false;
        save_settings(&path, &settings).expect("save");

        let loaded = load_settings(&path);
        assert_eq!(loaded.preferred_input_device.as_deref(), Some("USB Headset"));
        assert!(!loaded.listen_enabled);
    }

    #[test]
    fn normalize_repairs_blank_and_out_of_range_values() {
        let mut settings = AppSettings {
            preferred_input_device: Some("   ".into()),
            completion_phrase: "".into(),
            silence_rms: 9.0,
            ..Default::default()
        };
        settings.normalize();
        assert!(settings.preferred_input_device.is_none());
        assert_eq!(settings.completion_phrase, "All items packed.");
        assert!(settings.silence_rms <= 0.5);
    }
}
