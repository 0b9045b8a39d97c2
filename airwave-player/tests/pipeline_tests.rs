//! End-to-end pipeline tests with a real transcoder process
//!
//! `sh -c` scripts stand in for ffmpeg: they print the stderr lines ffmpeg
//! would and write PCM to stdout.

#![cfg(unix)]

mod helpers;

use airwave_common::events::{DropReason, EventBus, PlayerEvent};
use airwave_player::config::{PlaybackSettings, TranscoderSettings};
use airwave_player::playback::{
    OutgoingSink, PlayRequest, PlayStatistics, PlaybackOrchestrator, PlaybackQueue, PlayerCommand,
    TranscoderProcess,
};
use airwave_player::resolver::{DirectUrlProvider, StreamProvider, StreamResolver};
use helpers::{next_event, wait_until, CollectingSink, RecordingStatistics};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

struct Pipeline {
    orchestrator: PlaybackOrchestrator,
    sink: Arc<CollectingSink>,
    statistics: Arc<RecordingStatistics>,
    events: broadcast::Receiver<PlayerEvent>,
}

fn pipeline(script: &str) -> Pipeline {
    let transcoder = TranscoderProcess::new(TranscoderSettings {
        program: "sh".into(),
        program_args: vec!["-c".to_string(), script.to_string(), "fake-ffmpeg".to_string()],
        graceful_shutdown: Duration::from_millis(300),
        forced_shutdown: Duration::from_millis(1_000),
        idle_yield: Duration::from_millis(10),
        ..TranscoderSettings::default()
    });
    let providers: Vec<Arc<dyn StreamProvider>> = vec![Arc::new(DirectUrlProvider)];
    let resolver = StreamResolver::new(providers, Duration::from_secs(1));
    let sink = Arc::new(CollectingSink::default());
    let statistics = Arc::new(RecordingStatistics::default());
    let bus = EventBus::new(1_000);
    let events = bus.subscribe();

    let orchestrator = PlaybackOrchestrator::new(
        PlaybackSettings {
            completion_grace: Duration::from_secs(2),
            ..PlaybackSettings::default()
        },
        Arc::new(PlaybackQueue::new()),
        Arc::new(resolver),
        Arc::new(transcoder),
        Arc::clone(&sink) as Arc<dyn OutgoingSink>,
        Arc::clone(&statistics) as Arc<dyn PlayStatistics>,
        bus,
    );

    Pipeline {
        orchestrator,
        sink,
        statistics,
        events,
    }
}

#[tokio::test]
async fn test_track_streams_to_sink_and_finishes() {
    let mut p = pipeline("echo \"Output #0, s16le, to 'pipe:1':\" >&2; head -c 19200 /dev/zero");
    let request = PlayRequest::new("tester", "https://media.test/song.ogg");
    p.orchestrator.enqueue(request.clone());

    p.orchestrator.dispatch(PlayerCommand::Play).await.unwrap();

    let finished = next_event(&mut p.events, |e| matches!(e, PlayerEvent::TrackFinished { .. })).await;
    assert_eq!(finished.request_id(), Some(request.id));
    next_event(&mut p.events, |e| matches!(e, PlayerEvent::PlaybackIdle { .. })).await;

    assert_eq!(p.sink.bytes(), 19_200);
    assert!(p.orchestrator.queue().is_empty());

    let statistics = Arc::clone(&p.statistics);
    wait_until("play record", move || statistics.records().len() == 1).await;
    assert_eq!(p.statistics.records()[0].title, "song.ogg");
}

#[tokio::test]
async fn test_forbidden_source_is_retried_then_dropped() {
    let mut p = pipeline("echo 'Server returned 403 Forbidden (access denied)' >&2; exit 1");
    let request = PlayRequest::new("tester", "https://media.test/blocked.ogg");
    p.orchestrator.enqueue(request.clone());

    p.orchestrator.play().await.unwrap();

    let mut retries = 0;
    let dropped = loop {
        let event = next_event(&mut p.events, |e| {
            matches!(
                e,
                PlayerEvent::TrackRetrying { .. } | PlayerEvent::TrackDropped { .. }
            )
        })
        .await;
        match event {
            PlayerEvent::TrackRetrying { .. } => retries += 1,
            other => break other,
        }
    };

    assert_eq!(retries, 3);
    match dropped {
        PlayerEvent::TrackDropped { request_id, reason, .. } => {
            assert_eq!(request_id, request.id);
            assert_eq!(reason, DropReason::RetriesExhausted);
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert_eq!(p.sink.bytes(), 0);
}

#[tokio::test]
async fn test_stop_terminates_running_transcoder() {
    let mut p = pipeline("echo \"Output #0, s16le, to 'pipe:1':\" >&2; head -c 3840 /dev/zero; read q; exit 0");
    p.orchestrator.enqueue(PlayRequest::new("tester", "https://media.test/long.ogg"));

    p.orchestrator.play().await.unwrap();
    next_event(&mut p.events, |e| matches!(e, PlayerEvent::NowPlaying { .. })).await;

    p.orchestrator.shutdown().await;

    assert_eq!(p.orchestrator.queue().len(), 1);
    assert!(p.sink.bytes() <= 3_840);
}
