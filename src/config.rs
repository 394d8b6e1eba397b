//! Persistent client configuration
//!
//! Stored as JSON at `<config_dir>/kodama-client/config.json`. Every field
//! has a default so older or hand-written files keep loading.

use kodama_client_core::{SessionConfig, DEFAULT_SEGMENT_QUEUE_LIMIT, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `server_url`
pub const URL_ENV: &str = "KODAMA_URL";

fn default_initial_ms() -> u64 {
    INITIAL_BACKOFF_MS
}

fn default_max_ms() -> u64 {
    MAX_BACKOFF_MS
}

fn default_queue_limit() -> usize {
    DEFAULT_SEGMENT_QUEUE_LIMIT
}

fn default_true() -> bool {
    true
}

/// Reconnection backoff
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    #[serde(default = "default_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_max_ms")]
    pub max_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_initial_ms(),
            max_ms: default_max_ms(),
        }
    }
}

/// Video recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoConfig {
    /// Segments allowed to wait behind an in-flight append
    #[serde(default = "default_queue_limit")]
    pub queue_limit: usize,
    /// Directory receiving `<source>-<timestamp>.mp4`, a new file on every
    /// video init (None = no recording)
    #[serde(default)]
    pub record_dir: Option<PathBuf>,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            queue_limit: default_queue_limit(),
            record_dir: None,
        }
    }
}

/// Audio playback
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Persistent client configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// WebSocket URL (None = derive from `origin`, then the local default)
    #[serde(default)]
    pub server_url: Option<String>,
    /// Page origin the socket URL is derived from
    #[serde(default)]
    pub origin: Option<String>,
    /// Only record and play this camera (None = record all, play the first heard)
    #[serde(default)]
    pub camera: Option<String>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub video: VideoConfig,
    #[serde(default)]
    pub audio: AudioConfig,
}

impl ClientConfig {
    /// Config file path: `<config_dir>/kodama-client/config.json`
    pub fn path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("kodama-client")
            .join("config.json")
    }

    /// Load from the default path, falling back to defaults on any error
    pub fn load() -> Self {
        Self::load_from(&Self::path())
    }

    /// Load from `path`, falling back to defaults on any error
    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded config from disk");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to parse config, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }

    /// Apply `KODAMA_URL` if set and non-empty
    pub fn apply_env(&mut self) {
        self.apply_url_override(std::env::var(URL_ENV).ok());
    }

    pub(crate) fn apply_url_override(&mut self, url: Option<String>) {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.server_url = Some(url);
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        let initial = self.reconnect.initial_ms.max(1);
        SessionConfig {
            initial_backoff: Duration::from_millis(initial),
            max_backoff: Duration::from_millis(self.reconnect.max_ms.max(initial)),
            origin: self.origin.clone(),
        }
    }
}
