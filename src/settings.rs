//! Persisted runtime settings
//!
//! A small JSON file holding the stream knobs an operator may change between
//! sessions. Loading never fails: a missing or unreadable file falls back to
//! the defaults, and missing keys keep their default values.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::client::PublisherConfig;
use crate::error::Result;

/// File name used inside a settings directory
pub const SETTINGS_FILE_NAME: &str = "rtc_runtime_config.json";

/// Runtime stream settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    /// Frames per second
    pub frame_rate: u32,
    /// Encoded frame width
    pub frame_width: u32,
    /// Encoded frame height
    pub frame_height: u32,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            frame_rate: 30,
            frame_width: 1280,
            frame_height: 720,
        }
    }
}

impl RuntimeSettings {
    /// Load settings from `path`, falling back to defaults
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => {
                tracing::debug!(path = %path.display(), "No runtime settings file; using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load runtime settings");
                Self::default()
            }
        }
    }

    /// Load settings from `path`; `Ok(None)` if the file does not exist
    pub fn try_load(path: &Path) -> Result<Option<Self>> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Write settings to `path` as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        tracing::info!(path = %path.display(), "Runtime settings saved");
        Ok(())
    }

    /// Copy the settings into a publisher config
    pub fn apply_to(&self, config: &mut PublisherConfig) {
        config.fps = f64::from(self.frame_rate);
        config.frame_width = self.frame_width;
        config.frame_height = self.frame_height;
    }
}
