//! Error types for airwave-player
//!
//! Per-request failures (resolution, process start) are turned into track
//! outcomes by the orchestrator; they only surface as `Err` from the
//! lower-level components.

use thiserror::Error;

/// Main error type for airwave-player
#[derive(Error, Debug)]
pub enum Error {
    /// Shared configuration / I/O errors
    #[error(transparent)]
    Common(#[from] airwave_common::Error),

    /// No provider could turn the identifier into a playable URL
    #[error("Resolution failed for '{identifier}': {reason}")]
    Resolution { identifier: String, reason: String },

    /// Transcoder process could not be started
    #[error("Transcoder start failed: {0}")]
    ProcessStart(String),

    /// Outgoing sink rejected audio (connection gone)
    #[error("Sink error: {0}")]
    Sink(String),

    /// Playback lock could not be acquired at all
    #[error("Playback lock unavailable: {0}")]
    PlaybackLock(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using airwave-player Error
pub type Result<T> = std::result::Result<T, Error>;
