//! # Airwave Player Library (airwave-player)
//!
//! Audio playback orchestration for a single outgoing real-time sink.
//!
//! **Purpose:** Take play requests from a FIFO queue, resolve each into a
//! fetchable URL, transcode it to 48kHz stereo s16le PCM with an external
//! ffmpeg process and pump the PCM into the sink, one track at a time.
//!
//! **Architecture:** tokio tasks; one playback session at a time guarded by a
//! single-slot semaphore; nested stop/skip cancellation scopes
//! (`tokio_util::sync::CancellationToken`).

pub mod config;
pub mod error;
pub mod playback;
pub mod resolver;
pub mod state;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use playback::{PlayRequest, PlaybackOrchestrator, PlaybackQueue, PlayerCommand};
pub use state::{PlayerAction, PlayerSnapshot};
