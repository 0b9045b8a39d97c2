//! Orchestrator test harness

use super::fake_transcoder::{FakeBehavior, FakeTranscoder};
use airwave_common::events::{EventBus, PlayerEvent};
use airwave_player::config::PlaybackSettings;
use airwave_player::error::{Error, Result};
use airwave_player::playback::{
    OutgoingSink, PlayRecord, PlayRequest, PlayStatistics, PlaybackOrchestrator, PlaybackQueue,
    Transcoder,
};
use airwave_player::resolver::{ResolvedStream, StreamKind, StreamProvider, StreamResolver};
use airwave_player::PlayerAction;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound for any single wait in a test
pub const WAIT_LIMIT: Duration = Duration::from_secs(5);

/// URL the fake provider resolves `identifier` to
pub fn media_url(identifier: &str) -> String {
    format!("https://media.test/{}", identifier)
}

/// Resolves everything except identifiers starting with `missing`;
/// `radio:` identifiers resolve as radio streams
pub struct FakeProvider;

#[async_trait]
impl StreamProvider for FakeProvider {
    fn name(&self) -> &str {
        "fake"
    }

    async fn resolve(&self, identifier: &str) -> Result<ResolvedStream> {
        if identifier.starts_with("missing") {
            return Err(Error::Resolution {
                identifier: identifier.to_string(),
                reason: "no such track".to_string(),
            });
        }
        let kind = if identifier.starts_with("radio:") {
            StreamKind::Radio
        } else {
            StreamKind::Track
        };
        Ok(ResolvedStream {
            url: media_url(identifier),
            title: identifier.to_uppercase(),
            kind,
        })
    }
}

/// Counts delivered bytes; can be switched to failing
#[derive(Default)]
pub struct CollectingSink {
    bytes: AtomicUsize,
    failing: AtomicBool,
}

impl CollectingSink {
    pub fn bytes(&self) -> usize {
        self.bytes.load(Ordering::SeqCst)
    }

    pub fn fail(&self) {
        self.failing.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl OutgoingSink for CollectingSink {
    async fn send(&self, pcm: &[u8]) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Sink("connection closed".to_string()));
        }
        self.bytes.fetch_add(pcm.len(), Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingStatistics {
    records: Mutex<Vec<PlayRecord>>,
}

impl RecordingStatistics {
    pub fn records(&self) -> Vec<PlayRecord> {
        self.records.lock().unwrap().clone()
    }
}

#[async_trait]
impl PlayStatistics for RecordingStatistics {
    async fn record_play(&self, record: PlayRecord) -> Result<()> {
        self.records.lock().unwrap().push(record);
        Ok(())
    }
}

/// Orchestrator wired to fakes
pub struct TestHarness {
    pub orchestrator: PlaybackOrchestrator,
    pub transcoder: Arc<FakeTranscoder>,
    pub sink: Arc<CollectingSink>,
    pub statistics: Arc<RecordingStatistics>,
    pub disconnects: Arc<AtomicUsize>,
    pub events: broadcast::Receiver<PlayerEvent>,
}

impl TestHarness {
    pub fn new(default: FakeBehavior) -> Self {
        let transcoder = Arc::new(FakeTranscoder::new(default));
        let sink = Arc::new(CollectingSink::default());
        let statistics = Arc::new(RecordingStatistics::default());
        let bus = EventBus::new(1_000);
        let events = bus.subscribe();

        let settings = PlaybackSettings {
            max_retries: 3,
            frame_bytes: 3_840,
            completion_grace: Duration::from_millis(200),
        };
        let resolver = StreamResolver::new(vec![Arc::new(FakeProvider)], Duration::from_secs(1));

        let orchestrator = PlaybackOrchestrator::new(
            settings,
            Arc::new(PlaybackQueue::new()),
            Arc::new(resolver),
            Arc::clone(&transcoder) as Arc<dyn Transcoder>,
            Arc::clone(&sink) as Arc<dyn OutgoingSink>,
            Arc::clone(&statistics) as Arc<dyn PlayStatistics>,
            bus,
        );

        Self {
            orchestrator,
            transcoder,
            sink,
            statistics,
            disconnects: Arc::new(AtomicUsize::new(0)),
            events,
        }
    }

    pub fn enqueue(&self, identifier: &str) -> PlayRequest {
        let request = PlayRequest::new("tester", identifier);
        self.orchestrator.enqueue(request.clone());
        request
    }

    /// Register a disconnect callback that counts its invocations
    pub async fn register_disconnect(&self) {
        let disconnects = Arc::clone(&self.disconnects);
        self.orchestrator
            .register_disconnect(Box::new(move || {
                disconnects.fetch_add(1, Ordering::SeqCst);
            }))
            .await;
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }

    pub async fn wait_for_starts(&self, count: usize) {
        let transcoder = Arc::clone(&self.transcoder);
        wait_until(&format!("{} transcoder starts", count), move || {
            transcoder.start_count() >= count
        })
        .await;
    }

    pub async fn wait_for_idle(&self) {
        let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
        loop {
            if self.orchestrator.snapshot().await.action == PlayerAction::Idle {
                return;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!("player did not go idle within {:?}", WAIT_LIMIT);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Poll `condition` until it holds; panics after [`WAIT_LIMIT`]
pub async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    let deadline = tokio::time::Instant::now() + WAIT_LIMIT;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Next event satisfying `predicate`; panics after [`WAIT_LIMIT`]
pub async fn next_event<F>(events: &mut broadcast::Receiver<PlayerEvent>, predicate: F) -> PlayerEvent
where
    F: Fn(&PlayerEvent) -> bool,
{
    let found = tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("event bus closed"),
            }
        }
    })
    .await;
    found.unwrap_or_else(|_| panic!("expected event not received"))
}
