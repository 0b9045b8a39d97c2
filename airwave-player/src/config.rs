//! airwave-player runtime configuration
//!
//! Converts the bootstrap [`TomlConfig`] into typed settings for each
//! component. The `DEFAULT_*` constants are the built-in values used when the
//! TOML file leaves a field out.

use airwave_common::config::TomlConfig;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Forbidden-source retries allowed per request before it is dropped
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Per-provider resolution timeout
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(15);

/// Wait for the transcoder to exit after the graceful quit signal
pub const DEFAULT_GRACEFUL_SHUTDOWN: Duration = Duration::from_millis(1_500);

/// Wait for the process tree to die after a forced kill
pub const DEFAULT_FORCED_SHUTDOWN: Duration = Duration::from_millis(3_000);

/// Delay taken by a terminate call that finds no live process
pub const DEFAULT_IDLE_TERMINATE_YIELD: Duration = Duration::from_millis(50);

/// How long to wait for the exit signal after the PCM pipe reaches EOF
pub const DEFAULT_COMPLETION_GRACE: Duration = Duration::from_millis(1_500);

/// 20ms of 48kHz stereo s16le
pub const DEFAULT_FRAME_BYTES: usize = 3_840;

/// Output sample rate (Hz)
pub const OUTPUT_SAMPLE_RATE: u32 = 48_000;

/// Output channel count
pub const OUTPUT_CHANNELS: u32 = 2;

/// Settings for [`crate::playback::TranscoderProcess`]
#[derive(Debug, Clone)]
pub struct TranscoderSettings {
    pub program: PathBuf,
    /// Inserted before the generated ffmpeg arguments (wrappers like `nice`)
    pub program_args: Vec<String>,
    pub reconnect_delay_max_secs: u32,
    pub output_buffer_size: String,
    pub log_level: String,
    pub graceful_shutdown: Duration,
    pub forced_shutdown: Duration,
    pub idle_yield: Duration,
}

impl Default for TranscoderSettings {
    fn default() -> Self {
        Self {
            program: PathBuf::from("ffmpeg"),
            program_args: Vec::new(),
            reconnect_delay_max_secs: 5,
            output_buffer_size: "64k".to_string(),
            log_level: "info".to_string(),
            graceful_shutdown: DEFAULT_GRACEFUL_SHUTDOWN,
            forced_shutdown: DEFAULT_FORCED_SHUTDOWN,
            idle_yield: DEFAULT_IDLE_TERMINATE_YIELD,
        }
    }
}

/// Settings for [`crate::playback::PlaybackOrchestrator`]
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub max_retries: u32,
    pub frame_bytes: usize,
    pub completion_grace: Duration,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            frame_bytes: DEFAULT_FRAME_BYTES,
            completion_grace: DEFAULT_COMPLETION_GRACE,
        }
    }
}

/// Settings for [`crate::resolver::StreamResolver`] and its providers
#[derive(Debug, Clone)]
pub struct ResolverSettings {
    pub provider_timeout: Duration,
    /// `None` disables the yt-dlp provider
    pub yt_dlp_program: Option<String>,
    pub yt_dlp_args: Vec<String>,
    pub radio_stations: BTreeMap<String, String>,
}

impl Default for ResolverSettings {
    fn default() -> Self {
        Self {
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            yt_dlp_program: Some("yt-dlp".to_string()),
            yt_dlp_args: Vec::new(),
            radio_stations: BTreeMap::new(),
        }
    }
}

/// Complete player configuration
#[derive(Debug, Clone, Default)]
pub struct PlayerConfig {
    pub transcoder: TranscoderSettings,
    pub playback: PlaybackSettings,
    pub resolver: ResolverSettings,
}

impl PlayerConfig {
    /// Build typed settings from the TOML configuration
    pub fn from_toml(config: &TomlConfig) -> Self {
        let playback = &config.playback;
        let yt_dlp = config.resolver.yt_dlp_program.trim();

        Self {
            transcoder: TranscoderSettings {
                program: config.transcoder.program.clone(),
                program_args: config.transcoder.program_args.clone(),
                reconnect_delay_max_secs: config.transcoder.reconnect_delay_max_secs,
                output_buffer_size: config.transcoder.output_buffer_size.clone(),
                log_level: config.transcoder.log_level.clone(),
                graceful_shutdown: Duration::from_millis(playback.graceful_shutdown_ms),
                forced_shutdown: Duration::from_millis(playback.forced_shutdown_ms),
                idle_yield: Duration::from_millis(playback.idle_terminate_yield_ms),
            },
            playback: PlaybackSettings {
                max_retries: playback.max_retries,
                frame_bytes: playback.frame_bytes,
                completion_grace: Duration::from_millis(playback.completion_grace_ms),
            },
            resolver: ResolverSettings {
                provider_timeout: Duration::from_millis(playback.provider_timeout_ms),
                yt_dlp_program: (!yt_dlp.is_empty()).then(|| yt_dlp.to_string()),
                yt_dlp_args: config.resolver.yt_dlp_args.clone(),
                radio_stations: config.radio.stations.clone(),
            },
        }
    }
}
