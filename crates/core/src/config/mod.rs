use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{Result, StageCount, WindowSize};

/// Settings persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AppConfig {
    pub num_stages: StageCount,
    pub window_size: WindowSize,
}

impl AppConfig {
    /// Loads the configuration stored at `path`.
    ///
    /// Never fails: a missing or unreadable file yields the defaults, and each
    /// field that is absent or invalid is replaced by its own default.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "no saved configuration; using defaults");
                Self::default()
            }
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "cannot read configuration; using defaults");
                Self::default()
            }
        }
    }

    /// Parses a JSON document field by field.
    pub fn parse(text: &str) -> Self {
        let document: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(%err, "configuration is not valid JSON; using defaults");
                return Self::default();
            }
        };

        Self {
            num_stages: field_or_default(&document, "num_stages"),
            window_size: field_or_default(&document, "window_size"),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text)?;
        Ok(())
    }
}

fn field_or_default<T>(document: &serde_json::Value, key: &str) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(value) = document.get(key) else {
        return T::default();
    };
    match serde_json::from_value(value.clone()) {
        Ok(parsed) => parsed,
        Err(err) => {
            tracing::warn!(key, %value, %err, "invalid configuration value; using default");
            T::default()
        }
    }
}

/// Destination for accepted settings changes.
pub trait ConfigStore {
    fn save(&mut self, config: &AppConfig) -> Result<()>;
}

/// Stores the configuration as a JSON file.
#[derive(Debug, Clone)]
pub struct FileConfigStore {
    path: PathBuf,
}

impl FileConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> AppConfig {
        AppConfig::load(&self.path)
    }
}

impl ConfigStore for FileConfigStore {
    fn save(&mut self, config: &AppConfig) -> Result<()> {
        config.save(&self.path)?;
        tracing::debug!(path = %self.path.display(), ?config, "configuration saved");
        Ok(())
    }
}

/// Configuration specific to the audio subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    pub sample_rate: u32,
    pub block_size: usize,
    pub channels: u16,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            block_size: 1024,
            channels: 1,
        }
    }
}

/// Configuration for the playback loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaybackConfig {
    pub target_fps: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { target_fps: 30 }
    }
}
