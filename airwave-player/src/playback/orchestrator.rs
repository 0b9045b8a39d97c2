//! Playback orchestrator
//!
//! **Responsibilities:**
//! - Play/Skip/Stop/Disconnected dispatch against [`PlayerState`]
//! - The playback session: peek → resolve → start → stream → advance, looped
//!   until the queue is empty or the session is stopped
//! - Forbidden-source retry bound and per-request failure handling
//!
//! **Concurrency:**
//! - One session at a time: the session task owns the single permit of
//!   `play_slot` for its whole lifetime.
//! - Play/Skip/Stop never enter the session; they flip state under the state
//!   lock and cancel scopes. Stop cancels the session's stop scope (and with it
//!   the skip scope); Skip cancels only the skip scope.
//! - Lock order is always state, then queue.

use super::queue::{PlayRequest, PlaybackQueue};
use super::sink::OutgoingSink;
use super::statistics::{PlayRecord, PlayStatistics};
use super::transcoder::{TranscodeStream, Transcoder, TranscoderSignal};
use crate::config::PlaybackSettings;
use crate::error::{Error, Result};
use crate::resolver::{ResolvedStream, StreamKind, StreamResolver};
use crate::state::{ClearedState, DisconnectCallback, PlayerSnapshot, PlayerState, SessionScope};
use airwave_common::events::{DropReason, EventBus, PlayerEvent};
use chrono::Utc;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tokio::sync::{broadcast, mpsc, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Commands produced by the command layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerCommand {
    Play,
    Skip,
    Stop,
    /// Outgoing connection went away; cleaned up exactly like Stop
    Disconnected,
}

/// How one attempt at the queue head ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackOutcome {
    Completed,
    Cancelled,
    Forbidden,
    Unresolvable,
    StartFailed,
    SinkFailed,
}

struct Inner {
    queue: Arc<PlaybackQueue>,
    state: Mutex<PlayerState>,
    play_slot: Arc<Semaphore>,
    resolver: Arc<StreamResolver>,
    transcoder: Arc<dyn Transcoder>,
    sink: Arc<dyn OutgoingSink>,
    statistics: Arc<dyn PlayStatistics>,
    events: EventBus,
    settings: PlaybackSettings,
}

/// Drives playback of the shared queue into the outgoing sink
#[derive(Clone)]
pub struct PlaybackOrchestrator {
    inner: Arc<Inner>,
}

impl PlaybackOrchestrator {
    pub fn new(
        settings: PlaybackSettings,
        queue: Arc<PlaybackQueue>,
        resolver: Arc<StreamResolver>,
        transcoder: Arc<dyn Transcoder>,
        sink: Arc<dyn OutgoingSink>,
        statistics: Arc<dyn PlayStatistics>,
        events: EventBus,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue,
                state: Mutex::new(PlayerState::new()),
                play_slot: Arc::new(Semaphore::new(1)),
                resolver,
                transcoder,
                sink,
                statistics,
                events,
                settings,
            }),
        }
    }

    pub fn queue(&self) -> &Arc<PlaybackQueue> {
        &self.inner.queue
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.inner.events.subscribe()
    }

    pub async fn snapshot(&self) -> PlayerSnapshot {
        self.inner.state.lock().await.snapshot()
    }

    /// Callback run once when the player leaves the outgoing channel
    pub async fn register_disconnect(&self, callback: DisconnectCallback) {
        self.inner.state.lock().await.register_disconnect(callback);
    }

    /// Append a request and announce it; does not start playback
    pub fn enqueue(&self, request: PlayRequest) -> usize {
        let request_id = request.id;
        let identifier = request.identifier.clone();
        let requested_by = request.requested_by.clone();
        let position = self.inner.queue.enqueue(request);

        debug!(request_id = %request_id, identifier = %identifier, position, "Request queued");
        self.inner.events.emit_lossy(PlayerEvent::TrackQueued {
            request_id,
            identifier,
            requested_by,
            position,
            timestamp: Utc::now(),
        });
        position
    }

    /// Single entry point for command-layer events
    pub async fn dispatch(&self, command: PlayerCommand) -> Result<()> {
        debug!(?command, "Dispatching player command");
        match command {
            PlayerCommand::Play => self.play().await,
            PlayerCommand::Skip => {
                self.skip().await;
                Ok(())
            }
            PlayerCommand::Stop | PlayerCommand::Disconnected => {
                self.stop().await;
                Ok(())
            }
        }
    }

    /// Idle → Playing if the queue has work; no-op while Playing
    ///
    /// Only failure to obtain the playback lock is reported.
    pub async fn play(&self) -> Result<()> {
        let scope = {
            let mut state = self.inner.state.lock().await;
            if state.is_playing() {
                debug!("Play ignored: already playing");
                return Ok(());
            }
            if self.inner.queue.is_empty() {
                debug!("Play ignored: queue is empty");
                return Ok(());
            }
            state.begin_session()
        };

        let permit = match Arc::clone(&self.inner.play_slot).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!(session = scope.id, error = %e, "Playback lock unavailable");
                self.abandon_session(&scope).await;
                return Err(Error::PlaybackLock(e.to_string()));
            }
        };

        info!(session = scope.id, queued = self.inner.queue.len(), "Playback session starting");
        tokio::spawn(self.clone().supervise_session(scope, permit));
        Ok(())
    }

    /// Cancel the current track only; the session moves on to the next head
    pub async fn skip(&self) {
        let mut state = self.inner.state.lock().await;
        if !state.is_playing() {
            debug!("Skip ignored: not playing");
            return;
        }
        let Some(request_id) = state.skip_current() else {
            debug!("Skip ignored: no track in progress");
            return;
        };

        if self.inner.queue.dequeue_if_head(request_id).is_some() {
            info!(request_id = %request_id, remaining = self.inner.queue.len(), "Track skipped");
            self.inner.events.emit_lossy(PlayerEvent::TrackSkipped {
                request_id,
                timestamp: Utc::now(),
            });
        }
    }

    /// Full cleanup: disconnect, cancel both scopes, back to Idle
    pub async fn stop(&self) {
        let cleared = self.inner.state.lock().await.clear();
        self.dispose(cleared);
    }

    /// Stop, wait for the running session to unwind and refuse further sessions
    pub async fn shutdown(&self) {
        self.stop().await;
        match self.inner.play_slot.acquire().await {
            Ok(permit) => drop(permit),
            Err(e) => debug!(error = %e, "Playback lock already closed"),
        }
        self.inner.play_slot.close();
        self.inner.transcoder.terminate().await;
        info!("Playback shut down");
    }

    fn dispose(&self, cleared: ClearedState) {
        self.inner.queue.reset_retry_counts();
        let was_active = cleared.stop_scope.is_some();

        if let Some(disconnect) = cleared.disconnect {
            debug!("Invoking disconnect callback");
            disconnect();
        }
        if let Some(stop) = cleared.stop_scope {
            stop.cancel();
        }
        drop(cleared.skip_scope);

        if was_active {
            info!("Playback idle");
            self.inner.events.emit_lossy(PlayerEvent::PlaybackIdle {
                timestamp: Utc::now(),
            });
        }
    }

    /// Clean up a session that never ran or died, unless a newer one replaced it
    async fn abandon_session(&self, scope: &SessionScope) {
        let cleared = {
            let mut state = self.inner.state.lock().await;
            if !state.is_session(scope.id) {
                return;
            }
            state.clear()
        };
        self.dispose(cleared);
        scope.stop.cancel();
    }

    async fn supervise_session(self, scope: SessionScope, permit: OwnedSemaphorePermit) {
        let session = tokio::spawn(self.clone().run_session(scope.clone()));

        if let Err(e) = session.await {
            if e.is_panic() {
                error!(session = scope.id, error = %e, "Playback session panicked");
            } else {
                warn!(session = scope.id, error = %e, "Playback session aborted");
            }
            self.abandon_session(&scope).await;
        }

        self.inner.transcoder.terminate().await;
        drop(permit);
        debug!(session = scope.id, "Playback session released");
    }

    async fn run_session(self, scope: SessionScope) {
        loop {
            self.serve_queue(&scope).await;
            if self.try_finish(&scope).await {
                break;
            }
            debug!(session = scope.id, "Queue refilled before going idle, continuing");
        }
    }

    /// Play queue heads until the queue is empty or the session is no longer live
    async fn serve_queue(&self, scope: &SessionScope) {
        let max_retries = self.inner.settings.max_retries;

        loop {
            if scope.stop.is_cancelled() {
                return;
            }
            let Some(request) = self.inner.queue.peek() else {
                return;
            };
            let skip = match self
                .inner
                .state
                .lock()
                .await
                .skip_scope_for(scope.id, request.id)
            {
                Some(skip) => skip,
                None => return,
            };

            match self.play_track(&request, &skip).await {
                TrackOutcome::Completed => {
                    if self.retire(&request).await.is_some() {
                        info!(request_id = %request.id, "Track finished");
                        self.inner.events.emit_lossy(PlayerEvent::TrackFinished {
                            request_id: request.id,
                            timestamp: Utc::now(),
                        });
                    } else {
                        debug!(request_id = %request.id, "Finished track no longer at head");
                    }
                }
                TrackOutcome::Cancelled => {
                    debug!(request_id = %request.id, stopped = scope.stop.is_cancelled(), "Track cancelled");
                }
                TrackOutcome::Forbidden => {
                    let attempt = request.retry_count + 1;
                    if attempt > max_retries {
                        warn!(
                            request_id = %request.id,
                            identifier = %request.identifier,
                            max_retries,
                            "Source still forbidden after retries, dropping request"
                        );
                        self.drop_request(&request, DropReason::RetriesExhausted).await;
                    } else if self.inner.queue.set_retry_count(request.id, attempt) {
                        info!(request_id = %request.id, attempt, max_retries, "Source forbidden, retrying");
                        self.inner.events.emit_lossy(PlayerEvent::TrackRetrying {
                            request_id: request.id,
                            attempt,
                            timestamp: Utc::now(),
                        });
                    }
                }
                TrackOutcome::Unresolvable => {
                    self.drop_request(&request, DropReason::Unresolvable).await;
                }
                TrackOutcome::StartFailed => {
                    self.drop_request(&request, DropReason::StartFailed).await;
                }
                TrackOutcome::SinkFailed => {
                    warn!(session = scope.id, "Outgoing sink failed, stopping playback");
                    let cleared = {
                        let mut state = self.inner.state.lock().await;
                        if !state.is_session(scope.id) {
                            return;
                        }
                        state.clear()
                    };
                    self.dispose(cleared);
                    return;
                }
            }
        }
    }

    /// Remove a finished or dropped request and stop treating it as current
    ///
    /// Runs under the state lock so a Skip sees either the request still in
    /// progress or no current request at all.
    async fn retire(&self, request: &PlayRequest) -> Option<PlayRequest> {
        let mut state = self.inner.state.lock().await;
        let removed = self.inner.queue.dequeue_if_head(request.id);
        state.finish_current(request.id);
        removed
    }

    async fn drop_request(&self, request: &PlayRequest, reason: DropReason) {
        if self.retire(request).await.is_some() {
            warn!(request_id = %request.id, identifier = %request.identifier, %reason, "Request dropped");
            self.inner.events.emit_lossy(PlayerEvent::TrackDropped {
                request_id: request.id,
                reason,
                timestamp: Utc::now(),
            });
        }
    }

    /// Go idle if the queue is (still) empty; false means there is more work
    async fn try_finish(&self, scope: &SessionScope) -> bool {
        let cleared = {
            let mut state = self.inner.state.lock().await;
            if !state.is_session(scope.id) {
                return true;
            }
            if !scope.stop.is_cancelled() && !self.inner.queue.is_empty() {
                return false;
            }
            state.clear()
        };
        info!(session = scope.id, "Queue drained");
        self.dispose(cleared);
        true
    }

    async fn play_track(&self, request: &PlayRequest, skip: &CancellationToken) -> TrackOutcome {
        debug!(
            request_id = %request.id,
            identifier = %request.identifier,
            retry_count = request.retry_count,
            "Resolving track"
        );

        let resolved = tokio::select! {
            biased;
            _ = skip.cancelled() => return TrackOutcome::Cancelled,
            result = self.inner.resolver.resolve(&request.identifier) => result,
        };
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!(request_id = %request.id, error = %e, "Could not resolve track");
                return TrackOutcome::Unresolvable;
            }
        };
        if skip.is_cancelled() {
            return TrackOutcome::Cancelled;
        }

        let stream = match self
            .inner
            .transcoder
            .create_stream(&resolved.url, skip.clone())
            .await
        {
            Ok(stream) => stream,
            Err(e) => {
                error!(request_id = %request.id, error = %e, "Could not start transcoder");
                self.inner.transcoder.terminate().await;
                return TrackOutcome::StartFailed;
            }
        };

        let outcome = self.pump(request, &resolved, stream, skip).await;
        if matches!(outcome, TrackOutcome::Forbidden | TrackOutcome::SinkFailed) {
            self.inner.transcoder.terminate().await;
        }
        outcome
    }

    /// Copy PCM into the sink until EOF, cancellation or failure
    async fn pump(
        &self,
        request: &PlayRequest,
        resolved: &ResolvedStream,
        stream: TranscodeStream,
        skip: &CancellationToken,
    ) -> TrackOutcome {
        let TranscodeStream {
            mut output,
            mut signals,
        } = stream;
        let mut buffer = vec![0u8; self.inner.settings.frame_bytes];
        let mut started = false;
        let mut exited = false;
        let mut signals_open = true;

        loop {
            tokio::select! {
                biased;
                _ = skip.cancelled() => return TrackOutcome::Cancelled,
                signal = signals.recv(), if signals_open => match signal {
                    Some(TranscoderSignal::ProcessStarted) => {
                        if !started {
                            started = true;
                            self.on_started(request, resolved);
                        }
                    }
                    Some(TranscoderSignal::ForbiddenSourceDetected) => return TrackOutcome::Forbidden,
                    Some(TranscoderSignal::StreamCompleted { exit_code }) => {
                        debug!(request_id = %request.id, ?exit_code, "Transcoder exited");
                        exited = true;
                    }
                    None => signals_open = false,
                },
                read = output.read(&mut buffer) => match read {
                    Ok(0) => break,
                    Ok(n) => {
                        if let Err(e) = self.inner.sink.send(&buffer[..n]).await {
                            warn!(request_id = %request.id, error = %e, "Sink rejected audio");
                            return TrackOutcome::SinkFailed;
                        }
                    }
                    Err(e) => {
                        warn!(request_id = %request.id, error = %e, "Transcoder output read failed");
                        break;
                    }
                },
            }
        }

        if exited || !signals_open {
            return TrackOutcome::Completed;
        }
        self.await_exit(request, resolved, &mut signals, skip, started).await
    }

    /// After EOF, give the transcoder a moment to report how it ended
    async fn await_exit(
        &self,
        request: &PlayRequest,
        resolved: &ResolvedStream,
        signals: &mut mpsc::UnboundedReceiver<TranscoderSignal>,
        skip: &CancellationToken,
        mut started: bool,
    ) -> TrackOutcome {
        let wait = async {
            while let Some(signal) = signals.recv().await {
                match signal {
                    TranscoderSignal::ProcessStarted => {
                        if !started {
                            started = true;
                            self.on_started(request, resolved);
                        }
                    }
                    TranscoderSignal::ForbiddenSourceDetected => return TrackOutcome::Forbidden,
                    TranscoderSignal::StreamCompleted { .. } => return TrackOutcome::Completed,
                }
            }
            TrackOutcome::Completed
        };

        tokio::select! {
            biased;
            _ = skip.cancelled() => TrackOutcome::Cancelled,
            outcome = timeout(self.inner.settings.completion_grace, wait) => {
                outcome.unwrap_or_else(|_| {
                    debug!(request_id = %request.id, "No exit signal after EOF, treating as completed");
                    TrackOutcome::Completed
                })
            }
        }
    }

    /// Transcoder confirmed the stream: announce it and record the play
    fn on_started(&self, request: &PlayRequest, resolved: &ResolvedStream) {
        info!(request_id = %request.id, title = %resolved.title, "Now playing");
        self.inner.events.emit_lossy(PlayerEvent::NowPlaying {
            request_id: request.id,
            title: resolved.title.clone(),
            url: resolved.url.clone(),
            timestamp: Utc::now(),
        });

        if resolved.kind != StreamKind::Track {
            return;
        }
        let statistics = Arc::clone(&self.inner.statistics);
        let record = PlayRecord {
            request_id: request.id,
            requested_by: request.requested_by.clone(),
            identifier: request.identifier.clone(),
            title: resolved.title.clone(),
            url: resolved.url.clone(),
            started_at: Utc::now(),
        };
        tokio::spawn(async move {
            let request_id = record.request_id;
            if let Err(e) = statistics.record_play(record).await {
                debug!(request_id = %request_id, error = %e, "Play statistics not recorded");
            }
        });
    }
}
