// Persisted application settings.

use crate::downloader::models::QualityTier;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

fn default_retry_attempts() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Where downloads land. Defaults to the platform download directory.
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    /// Explicit ffmpeg location, wins over autodetection.
    #[serde(default)]
    pub ffmpeg_path: Option<String>,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default)]
    pub subtitles: bool,
    /// Tier picked for the most recent download, preselected on startup.
    #[serde(default)]
    pub last_tier: Option<QualityTier>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            output_dir: None,
            ffmpeg_path: None,
            retry_attempts: default_retry_attempts(),
            subtitles: false,
            last_tier: None,
        }
    }
}

impl AppConfig {
    pub fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("tubefetch").join("settings.json"))
    }

    /// Effective output directory, falling back to Downloads then cwd.
    pub fn effective_output_dir(&self) -> PathBuf {
        self.output_dir
            .clone()
            .or_else(dirs::download_dir)
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    log::warn!("settings file unreadable, using defaults: {e}");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save_to(&self, path: &Path) -> Result<(), String> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create {}: {e}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize settings: {e}"))?;
        std::fs::write(path, json)
            .map_err(|e| format!("Failed to write {}: {e}", path.display()))
    }

    pub fn load() -> Self {
        match Self::settings_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    pub fn save(&self) -> Result<(), String> {
        match Self::settings_path() {
            Some(path) => self.save_to(&path),
            None => Err("No configuration directory available".to_string()),
        }
    }
}
