//! Playback pipeline
//!
//! Queue → resolver → transcoder process → outgoing sink, driven by the
//! [`PlaybackOrchestrator`].

pub mod orchestrator;
pub mod queue;
pub mod sink;
pub mod statistics;
pub mod transcoder;

pub use orchestrator::{PlaybackOrchestrator, PlayerCommand};
pub use queue::{PlayRequest, PlaybackQueue};
pub use sink::{OutgoingSink, PipeSink};
pub use statistics::{LoggingStatistics, PlayRecord, PlayStatistics};
pub use transcoder::{TranscodeStream, Transcoder, TranscoderProcess, TranscoderSignal};
