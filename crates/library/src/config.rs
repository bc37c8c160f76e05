use std::path::{Path, PathBuf};
use std::thread;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Settings shared by the `amt` commands; command line flags take precedence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Path to the library database
    pub database: Option<PathBuf>,
    /// Root directory of the media library walked by `update`
    pub library_root: Option<PathBuf>,
    /// Number of worker threads
    pub threads: usize,
    /// Maximum number of entries claimed by a single `transcode` run
    pub entries: usize,
    /// ffmpeg binary used for transcoding
    pub ffmpeg_bin: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);

        Self {
            database: None,
            library_root: None,
            threads: cpus,
            entries: cpus,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
        }
    }
}

impl Settings {
    /// Load settings from a file, or return defaults if path is None or the file doesn't exist
    ///
    /// Files ending in `.toml` are parsed as TOML, anything else as JSON. Fields missing from the
    /// file keep their defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path.filter(|p| p.exists()) else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display()))
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))
        }
    }
}
