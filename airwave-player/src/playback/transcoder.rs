//! Transcoder process lifecycle
//!
//! Owns at most one external ffmpeg process turning a source URL into raw PCM
//! (16-bit signed little-endian, 48kHz, stereo) on its stdout.
//!
//! **Lifecycle:**
//! - `create_stream` always terminates the previous process first, so a new
//!   process never exists alongside an old one.
//! - stderr is read line by line on its own task and classified; the
//!   orchestrator hears about the stream through [`TranscoderSignal`]s.
//! - Cancelling the token handed to `create_stream` terminates the process
//!   from a spawned task; the cancelling side never waits on it.
//!
//! **Termination protocol** (always under the process lock):
//! 1. write `q` to stdin and close it (ffmpeg's interactive quit)
//! 2. wait up to the graceful window for a natural exit
//! 3. kill the whole process tree
//! 4. wait up to the forced window for the kill to land
//! 5. drop all handles

use crate::config::{TranscoderSettings, OUTPUT_CHANNELS, OUTPUT_SAMPLE_RATE};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use bytes::BytesMut;
use futures::StreamExt;
use tokio::io::{AsyncRead, AsyncWriteExt};
use tokio::process::{Child, ChildStderr, ChildStdin, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::codec::{Decoder, FramedRead};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Lifecycle signals raised by a running transcoder
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderSignal {
    /// Transcoder opened its output: the source is valid
    ProcessStarted,

    /// Upstream rejected the request (HTTP 403 and friends)
    ForbiddenSourceDetected,

    /// Process exited on its own
    StreamCompleted { exit_code: Option<i32> },
}

/// Output of one transcoder run
pub struct TranscodeStream {
    /// Raw PCM from the transcoder's stdout
    pub output: Box<dyn AsyncRead + Send + Unpin>,

    /// Lifecycle signals for this run only
    pub signals: mpsc::UnboundedReceiver<TranscoderSignal>,
}

/// Source → PCM transcoding capability
#[async_trait]
pub trait Transcoder: Send + Sync {
    /// Start transcoding `source_url`, terminating any previous run first
    ///
    /// Cancelling `cancel` terminates this run asynchronously.
    async fn create_stream(&self, source_url: &str, cancel: CancellationToken)
        -> Result<TranscodeStream>;

    /// Terminate the live run, if any
    ///
    /// Finding nothing to terminate costs only a short yield.
    async fn terminate(&self);
}

/// Severity of a transcoder stderr line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineClass {
    Error,
    Warning,
    Info,
}

/// Classify a stderr line by substring
pub fn classify_line(line: &str) -> LineClass {
    let lower = line.to_ascii_lowercase();
    if lower.contains("error") {
        LineClass::Error
    } else if lower.contains("warning") {
        LineClass::Warning
    } else {
        LineClass::Info
    }
}

/// Upstream refused the source
pub fn is_forbidden_line(line: &str) -> bool {
    const PATTERNS: [&str; 3] = ["403 Forbidden", "HTTP error 403", "Server returned 403"];
    PATTERNS.iter().any(|p| line.contains(p))
}

/// Transcoder opened its output stream
pub fn is_stream_started_line(line: &str) -> bool {
    line.trim_start().starts_with("Output #0")
}

/// Longest stderr line kept; the rest of an over-long line is split off
pub const MAX_STDERR_LINE: usize = 4_096;

/// Splits transcoder stderr on `\n` or `\r`
///
/// Progress output ends in `\r` alone. Lines longer than `max_length` are
/// cut into pieces.
#[derive(Debug, Clone, Copy)]
pub struct StderrLineCodec {
    max_length: usize,
}

impl StderrLineCodec {
    pub fn new(max_length: usize) -> Self {
        Self {
            max_length: max_length.max(1),
        }
    }
}

impl Default for StderrLineCodec {
    fn default() -> Self {
        Self::new(MAX_STDERR_LINE)
    }
}

impl Decoder for StderrLineCodec {
    type Item = String;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<String>> {
        loop {
            let end = buf
                .iter()
                .take(self.max_length)
                .position(|b| *b == b'\n' || *b == b'\r');

            let line = match end {
                Some(index) => {
                    let line = buf.split_to(index);
                    let _ = buf.split_to(1);
                    line
                }
                None if buf.len() >= self.max_length => buf.split_to(self.max_length),
                None => return Ok(None),
            };

            if !line.is_empty() {
                return Ok(Some(String::from_utf8_lossy(&line).into_owned()));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> std::io::Result<Option<String>> {
        if let Some(line) = self.decode(buf)? {
            return Ok(Some(line));
        }
        if buf.is_empty() {
            return Ok(None);
        }
        let rest = buf.split();
        Ok(Some(String::from_utf8_lossy(&rest).into_owned()))
    }
}

struct LiveProcess {
    generation: u64,
    child: Child,
    stdin: Option<ChildStdin>,

    /// Cancelled once the process has been disposed
    finished: CancellationToken,
}

/// ffmpeg-backed [`Transcoder`]
pub struct TranscoderProcess {
    settings: TranscoderSettings,

    /// Process-level lock: start and terminate are serialized through it
    live: Arc<Mutex<Option<LiveProcess>>>,

    generation: AtomicU64,
}

impl TranscoderProcess {
    pub fn new(settings: TranscoderSettings) -> Self {
        Self {
            settings,
            live: Arc::new(Mutex::new(None)),
            generation: AtomicU64::new(0),
        }
    }

    /// Full argument list for one run
    ///
    /// Wrapper arguments (`program_args`) come first, then the ffmpeg
    /// arguments. Reconnect flags are only passed for network inputs.
    pub fn arguments(&self, source_url: &str) -> Vec<String> {
        let mut args = self.settings.program_args.clone();
        args.extend(
            ["-hide_banner", "-nostats", "-loglevel", &self.settings.log_level]
                .iter()
                .map(|s| s.to_string()),
        );

        if source_url.starts_with("http://") || source_url.starts_with("https://") {
            args.extend(
                [
                    "-reconnect",
                    "1",
                    "-reconnect_streamed",
                    "1",
                    "-reconnect_on_network_error",
                    "1",
                ]
                .iter()
                .map(|s| s.to_string()),
            );
            args.push("-reconnect_delay_max".to_string());
            args.push(self.settings.reconnect_delay_max_secs.to_string());
        }

        args.push("-i".to_string());
        args.push(source_url.to_string());
        args.extend(
            ["-vn", "-acodec", "pcm_s16le", "-f", "s16le"]
                .iter()
                .map(|s| s.to_string()),
        );
        args.push("-ar".to_string());
        args.push(OUTPUT_SAMPLE_RATE.to_string());
        args.push("-ac".to_string());
        args.push(OUTPUT_CHANNELS.to_string());
        args.push("-bufsize".to_string());
        args.push(self.settings.output_buffer_size.clone());
        args.push("pipe:1".to_string());
        args
    }

    /// Whether a process is currently owned
    pub async fn is_running(&self) -> bool {
        self.live.lock().await.is_some()
    }

    fn command(&self, source_url: &str) -> Command {
        let mut command = Command::new(&self.settings.program);
        command
            .args(self.arguments(source_url))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so a forced kill reaches the whole tree
        #[cfg(unix)]
        command.process_group(0);

        command
    }
}

#[async_trait]
impl Transcoder for TranscoderProcess {
    async fn create_stream(
        &self,
        source_url: &str,
        cancel: CancellationToken,
    ) -> Result<TranscodeStream> {
        let mut slot = self.live.lock().await;

        if let Some(previous) = slot.take() {
            debug!(
                generation = previous.generation,
                "Terminating previous transcoder before starting a new one"
            );
            shutdown_process(previous, &self.settings).await;
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut child = self.command(source_url).spawn().map_err(|e| {
            Error::ProcessStart(format!("{}: {}", self.settings.program.display(), e))
        })?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let finished = CancellationToken::new();
        let process = LiveProcess {
            generation,
            child,
            stdin,
            finished: finished.clone(),
        };

        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            shutdown_process(process, &self.settings).await;
            return Err(Error::ProcessStart(
                "transcoder output pipes unavailable".to_string(),
            ));
        };

        debug!(
            generation,
            pid = ?process.child.id(),
            url = %source_url,
            "Transcoder started"
        );
        *slot = Some(process);
        drop(slot);

        let (signal_tx, signal_rx) = mpsc::unbounded_channel();

        tokio::spawn(watch_stderr(
            stderr,
            signal_tx,
            Arc::clone(&self.live),
            generation,
            self.settings.clone(),
        ));

        tokio::spawn(terminate_on_cancel(
            cancel,
            finished,
            Arc::clone(&self.live),
            generation,
            self.settings.clone(),
        ));

        Ok(TranscodeStream {
            output: Box::new(stdout),
            signals: signal_rx,
        })
    }

    async fn terminate(&self) {
        let mut slot = self.live.lock().await;
        match slot.take() {
            Some(process) => {
                shutdown_process(process, &self.settings).await;
            }
            None => {
                drop(slot);
                tokio::time::sleep(self.settings.idle_yield).await;
            }
        }
    }
}

/// Read and classify stderr; reap the process once stderr closes
async fn watch_stderr(
    stderr: ChildStderr,
    signals: mpsc::UnboundedSender<TranscoderSignal>,
    live: Arc<Mutex<Option<LiveProcess>>>,
    generation: u64,
    settings: TranscoderSettings,
) {
    let mut lines = FramedRead::new(stderr, StderrLineCodec::default());
    let mut started = false;

    loop {
        match lines.next().await {
            Some(Ok(line)) => {
                if is_forbidden_line(&line) {
                    warn!(generation, line = %line, "Upstream rejected source");
                    let _ = signals.send(TranscoderSignal::ForbiddenSourceDetected);
                    continue;
                }
                if !started && is_stream_started_line(&line) {
                    started = true;
                    let _ = signals.send(TranscoderSignal::ProcessStarted);
                }
                match classify_line(&line) {
                    LineClass::Error => error!(generation, "ffmpeg: {}", line),
                    LineClass::Warning => warn!(generation, "ffmpeg: {}", line),
                    LineClass::Info => debug!(generation, "ffmpeg: {}", line),
                }
            }
            None => break,
            Some(Err(e)) => {
                debug!(generation, error = %e, "Transcoder stderr read failed");
                break;
            }
        }
    }

    // stderr closed: either we terminated it, or it is exiting on its own
    let mut slot = live.lock().await;
    if slot.as_ref().map(|p| p.generation) != Some(generation) {
        return;
    }
    if let Some(process) = slot.take() {
        let exit_code = shutdown_process(process, &settings).await;
        drop(slot);
        debug!(generation, exit_code = ?exit_code, "Transcoder exited on its own");
        let _ = signals.send(TranscoderSignal::StreamCompleted { exit_code });
    }
}

/// Cancellation registration: terminate this generation when `cancel` fires
async fn terminate_on_cancel(
    cancel: CancellationToken,
    finished: CancellationToken,
    live: Arc<Mutex<Option<LiveProcess>>>,
    generation: u64,
    settings: TranscoderSettings,
) {
    tokio::select! {
        _ = cancel.cancelled() => {
            let mut slot = live.lock().await;
            if slot.as_ref().map(|p| p.generation) == Some(generation) {
                if let Some(process) = slot.take() {
                    debug!(generation, "Playback cancelled, terminating transcoder");
                    shutdown_process(process, &settings).await;
                }
            }
        }
        _ = finished.cancelled() => {}
    }
}

/// Graceful-then-forced shutdown; returns the exit code if one was observed
async fn shutdown_process(process: LiveProcess, settings: &TranscoderSettings) -> Option<i32> {
    let LiveProcess {
        generation,
        mut child,
        stdin,
        finished,
    } = process;

    if let Some(mut stdin) = stdin {
        if let Err(e) = stdin.write_all(b"q").await {
            trace!(generation, error = %e, "Quit request not delivered");
        }
        let _ = stdin.shutdown().await;
    }

    let status = match timeout(settings.graceful_shutdown, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!(generation, error = %e, "Waiting for transcoder failed, killing it");
            force_kill(&mut child, generation, settings).await
        }
        Err(_) => {
            debug!(
                generation,
                window_ms = settings.graceful_shutdown.as_millis() as u64,
                "Transcoder ignored quit request, killing process tree"
            );
            force_kill(&mut child, generation, settings).await
        }
    };

    finished.cancel();
    let exit_code = status.and_then(|s| s.code());
    debug!(generation, exit_code = ?exit_code, "Transcoder disposed");
    exit_code
}

async fn force_kill(
    child: &mut Child,
    generation: u64,
    settings: &TranscoderSettings,
) -> Option<ExitStatus> {
    kill_process_tree(child).await;
    match timeout(settings.forced_shutdown, child.wait()).await {
        Ok(Ok(status)) => Some(status),
        Ok(Err(e)) => {
            warn!(generation, error = %e, "Waiting for killed transcoder failed");
            None
        }
        Err(_) => {
            error!(generation, "Transcoder still alive after forced kill");
            None
        }
    }
}

async fn kill_process_tree(child: &mut Child) {
    if let Some(pid) = child.id() {
        #[cfg(unix)]
        let result = Command::new("kill")
            .args(["-KILL", "--", &format!("-{}", pid)])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        #[cfg(windows)]
        let result = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        #[cfg(any(unix, windows))]
        if let Err(e) = result {
            debug!(pid, error = %e, "Process tree kill unavailable");
        }
    }

    if let Err(e) = child.start_kill() {
        trace!(error = %e, "start_kill after tree kill");
    }
}
