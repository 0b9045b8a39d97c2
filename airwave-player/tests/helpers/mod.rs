//! Test helper modules for airwave-player integration tests
//!
//! - FakeTranscoder: scripted stand-in for the ffmpeg process
//! - TestHarness: orchestrator wired to fakes, plus wait helpers

#![allow(dead_code)]

pub mod fake_transcoder;
pub mod harness;

pub use fake_transcoder::{FakeBehavior, FakeTranscoder};
pub use harness::{
    media_url, next_event, wait_until, CollectingSink, FakeProvider, RecordingStatistics,
    TestHarness,
};
