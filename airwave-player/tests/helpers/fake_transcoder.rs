//! Scripted transcoder
//!
//! Every `create_stream` call is recorded as a run. Runs hand out a duplex
//! pipe for PCM and a signal channel the test can drive with
//! [`FakeTranscoder::complete`]. Like the real process, a new run closes the
//! previous one first and cancellation closes a run asynchronously.

use airwave_player::error::{Error, Result};
use airwave_player::playback::{TranscodeStream, Transcoder, TranscoderSignal};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Bytes written by a run before it waits for the test
pub const CHUNK_BYTES: usize = 3_840;

/// What a run does once started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakeBehavior {
    /// Announce start, write one chunk, then wait for `complete`
    Manual,
    /// Announce start, write one chunk and exit normally
    Complete,
    /// Report a forbidden source and exit
    Forbidden,
    /// Fail to start
    FailStart,
}

struct Run {
    url: String,
    writer: Option<DuplexStream>,
    signals: Option<mpsc::UnboundedSender<TranscoderSignal>>,
    closed: CancellationToken,
}

impl Run {
    fn is_live(&self) -> bool {
        !self.closed.is_cancelled()
    }

    fn close(&mut self) {
        self.writer = None;
        self.signals = None;
        self.closed.cancel();
    }
}

pub struct FakeTranscoder {
    default: FakeBehavior,
    script: Mutex<HashMap<String, VecDeque<FakeBehavior>>>,
    runs: Arc<Mutex<Vec<Run>>>,
    attempts: AtomicUsize,
    terminate_calls: AtomicUsize,
    max_live: AtomicUsize,
}

impl FakeTranscoder {
    pub fn new(default: FakeBehavior) -> Self {
        Self {
            default,
            script: Mutex::new(HashMap::new()),
            runs: Arc::new(Mutex::new(Vec::new())),
            attempts: AtomicUsize::new(0),
            terminate_calls: AtomicUsize::new(0),
            max_live: AtomicUsize::new(0),
        }
    }

    /// Queue behaviors for the next runs of `url`; afterwards the default applies
    pub fn script(&self, url: &str, behaviors: &[FakeBehavior]) {
        self.script
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default()
            .extend(behaviors.iter().copied());
    }

    fn next_behavior(&self, url: &str) -> FakeBehavior {
        self.script
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(VecDeque::pop_front)
            .unwrap_or(self.default)
    }

    /// Successful starts, in order
    pub fn started_urls(&self) -> Vec<String> {
        self.runs.lock().unwrap().iter().map(|r| r.url.clone()).collect()
    }

    pub fn start_count(&self) -> usize {
        self.runs.lock().unwrap().len()
    }

    /// Every `create_stream` call, including failed starts
    pub fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn live_count(&self) -> usize {
        self.runs.lock().unwrap().iter().filter(|r| r.is_live()).count()
    }

    pub fn max_live(&self) -> usize {
        self.max_live.load(Ordering::SeqCst)
    }

    pub fn terminate_calls(&self) -> usize {
        self.terminate_calls.load(Ordering::SeqCst)
    }

    /// Let run `index` reach natural end of stream
    pub fn complete(&self, index: usize) {
        let mut runs = self.runs.lock().unwrap();
        let run = &mut runs[index];
        if let Some(signals) = &run.signals {
            let _ = signals.send(TranscoderSignal::StreamCompleted { exit_code: Some(0) });
        }
        run.close();
    }

    fn close_all(&self) {
        for run in self.runs.lock().unwrap().iter_mut() {
            run.close();
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn create_stream(
        &self,
        source_url: &str,
        cancel: CancellationToken,
    ) -> Result<TranscodeStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.close_all();

        let behavior = self.next_behavior(source_url);
        if behavior == FakeBehavior::FailStart {
            return Err(Error::ProcessStart(format!("scripted failure for {}", source_url)));
        }

        let (mut writer, reader) = tokio::io::duplex(64 * 1024);
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let closed = CancellationToken::new();

        match behavior {
            FakeBehavior::Forbidden => {
                let _ = signal_tx.send(TranscoderSignal::ForbiddenSourceDetected);
            }
            _ => {
                let _ = signal_tx.send(TranscoderSignal::ProcessStarted);
                writer.write_all(&[0u8; CHUNK_BYTES]).await?;
            }
        }

        let mut run = Run {
            url: source_url.to_string(),
            writer: Some(writer),
            signals: Some(signal_tx),
            closed: closed.clone(),
        };
        match behavior {
            FakeBehavior::Complete => {
                if let Some(signals) = &run.signals {
                    let _ = signals.send(TranscoderSignal::StreamCompleted { exit_code: Some(0) });
                }
                run.close();
            }
            FakeBehavior::Forbidden => run.close(),
            _ => {}
        }

        let index = {
            let mut runs = self.runs.lock().unwrap();
            runs.push(run);
            let live = runs.iter().filter(|r| r.is_live()).count();
            self.max_live.fetch_max(live, Ordering::SeqCst);
            runs.len() - 1
        };

        let runs = Arc::clone(&self.runs);
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(run) = runs.lock().unwrap().get_mut(index) {
                        run.close();
                    }
                }
                _ = closed.cancelled() => {}
            }
        });

        Ok(TranscodeStream {
            output: Box::new(reader),
            signals: signal_rx,
        })
    }

    async fn terminate(&self) {
        self.terminate_calls.fetch_add(1, Ordering::SeqCst);
        self.close_all();
        tokio::task::yield_now().await;
    }
}
