//! Engine configuration
//!
//! Read from an optional JSON file; every field has a default so a partial
//! file (or none at all) is fine.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::audio::device::AudioConfig;
use crate::error::{EngineError, Result};

const APP_DIR_NAME: &str = "NoiseTherapy";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub audio: AudioConfig,
    /// Output device name; None for the system default
    pub device_name: Option<String>,
    /// Where presets are stored; None for the platform data directory
    pub storage_dir: Option<PathBuf>,
    /// Default log filter when RUST_LOG is not set
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            device_name: None,
            storage_dir: None,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        serde_json::from_str(&content)
            .map_err(|e| EngineError::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Default config file location
    pub fn default_path() -> PathBuf {
        app_dir().join("config.json")
    }

    /// Resolved preset storage directory
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(app_dir)
    }
}

/// Per-user application directory (falls back to the working directory)
fn app_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
