//! Configuration loading and config file resolution
//!
//! The player is configured from a single TOML file. Every field has a
//! built-in default, so a missing file (or an empty one) yields a working
//! configuration.

use crate::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "AIRWAVE_CONFIG";

/// Top-level TOML configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub transcoder: TranscoderSection,
    pub playback: PlaybackSection,
    pub resolver: ResolverSection,
    pub radio: RadioSection,
    pub logging: LoggingSection,
}

/// `[transcoder]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TranscoderSection {
    /// Transcoder executable (looked up on PATH when not absolute)
    pub program: PathBuf,

    /// Arguments placed before the ffmpeg arguments, for running ffmpeg
    /// through a wrapper (`program = "nice"`, `program_args = ["-n", "10", "ffmpeg"]`)
    pub program_args: Vec<String>,

    /// Upper bound for ffmpeg's reconnect backoff
    pub reconnect_delay_max_secs: u32,

    /// Output buffer size handed to the transcoder (`-bufsize`)
    pub output_buffer_size: String,

    /// Transcoder `-loglevel`; must stay at `info` or above for start detection
    pub log_level: String,
}

impl Default for TranscoderSection {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            program_args: Vec::new(),
            reconnect_delay_max_secs: 5,
            output_buffer_size: "64k".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// `[playback]` section
///
/// Durations are in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSection {
    pub max_retries: u32,
    pub provider_timeout_ms: u64,
    pub graceful_shutdown_ms: u64,
    pub forced_shutdown_ms: u64,
    pub idle_terminate_yield_ms: u64,
    pub completion_grace_ms: u64,
    /// Bytes copied per pump iteration (3840 = 20ms of 48kHz stereo s16le)
    pub frame_bytes: usize,
}

impl Default for PlaybackSection {
    fn default() -> Self {
        Self {
            max_retries: 3,
            provider_timeout_ms: 15_000,
            graceful_shutdown_ms: 1_500,
            forced_shutdown_ms: 3_000,
            idle_terminate_yield_ms: 50,
            completion_grace_ms: 1_500,
            frame_bytes: 3_840,
        }
    }
}

/// `[resolver]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ResolverSection {
    /// yt-dlp executable; empty disables the provider
    pub yt_dlp_program: String,

    /// Extra yt-dlp arguments placed before the generated ones (`--cookies`, `--proxy`)
    pub yt_dlp_args: Vec<String>,
}

impl Default for ResolverSection {
    fn default() -> Self {
        Self {
            yt_dlp_program: "yt-dlp".to_string(),
            yt_dlp_args: Vec::new(),
        }
    }
}

/// `[radio]` section: static radio stations by name
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RadioSection {
    pub stations: BTreeMap<String, String>,
}

/// `[logging]` section
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl TomlConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Reject values the player cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.playback.frame_bytes == 0 || self.playback.frame_bytes % 4 != 0 {
            return Err(Error::Config(format!(
                "playback.frame_bytes must be a non-zero multiple of 4 (one stereo s16 frame), got {}",
                self.playback.frame_bytes
            )));
        }
        if self.playback.provider_timeout_ms == 0 {
            return Err(Error::Config(
                "playback.provider_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.transcoder.program.as_os_str().is_empty() {
            return Err(Error::Config("transcoder.program must not be empty".to_string()));
        }
        for (name, url) in &self.radio.stations {
            if url.trim().is_empty() {
                return Err(Error::Config(format!("radio station '{}' has an empty URL", name)));
            }
        }
        Ok(())
    }
}

/// Resolve and load configuration following priority order:
/// 1. Command-line argument (highest priority)
/// 2. `AIRWAVE_CONFIG` environment variable
/// 3. Platform config file (`<config_dir>/airwave/config.toml`) if it exists
/// 4. Built-in defaults
///
/// An explicitly named file (1 or 2) must exist; the platform file is optional.
pub fn load_config(cli_arg: Option<&Path>) -> Result<TomlConfig> {
    if let Some(path) = cli_arg {
        info!(path = %path.display(), "Loading config from command line path");
        return TomlConfig::from_file(path);
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            info!(path = %path, "Loading config from {}", CONFIG_ENV_VAR);
            return TomlConfig::from_file(Path::new(&path));
        }
    }

    if let Some(path) = default_config_path() {
        if path.exists() {
            info!(path = %path.display(), "Loading config from platform config dir");
            return TomlConfig::from_file(&path);
        }
        debug!(path = %path.display(), "No config file found, using defaults");
    }

    Ok(TomlConfig::default())
}

/// Platform default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("airwave").join("config.toml"))
}
