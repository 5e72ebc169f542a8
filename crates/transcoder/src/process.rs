use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, Command};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;
use wavetap_core::request::StreamRequest;
use wavetap_core::types::AudioFormat;

use crate::args::{AudioHandling, build_args};
use crate::diagnostics::StderrTail;
use crate::ffprobe::probe_audio;
use crate::stream::TranscodeBody;
use crate::{TranscodeError, TranscoderConfig};

/// The event that ended a stream. Only the first one observed is acted upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalEvent {
    /// ffmpeg exited on its own, successfully or not.
    ProcessExited,
    /// The response body was read to the end.
    ResponseFinished,
    /// The response body was dropped early, usually a client disconnect.
    ResponseClosed,
    /// ffmpeg could not be started or failed before producing output.
    LaunchFailed,
}

impl TerminalEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ProcessExited => "process_exited",
            Self::ResponseFinished => "response_finished",
            Self::ResponseClosed => "response_closed",
            Self::LaunchFailed => "launch_failed",
        }
    }
}

impl std::fmt::Display for TerminalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// Single-fire teardown: signal the supervisor to kill ffmpeg, then run the
/// release action.
pub(crate) struct Cleanup {
    fired: AtomicBool,
    kill: CancellationToken,
    release: Mutex<Option<ReleaseFn>>,
}

impl Cleanup {
    pub(crate) fn new(release: ReleaseFn) -> Self {
        Self {
            fired: AtomicBool::new(false),
            kill: CancellationToken::new(),
            release: Mutex::new(Some(release)),
        }
    }

    /// Returns `true` only for the call that performed the cleanup.
    pub(crate) fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.kill.cancel();
        let release = self.release.lock().ok().and_then(|mut slot| slot.take());
        if let Some(release) = release {
            release();
        }
        true
    }

    pub(crate) fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}

struct ProcessShared {
    stream_id: Uuid,
    args: Vec<String>,
    stderr: Mutex<StderrTail>,
    bytes_sent: AtomicU64,
    /// Set once response headers are committed; after that a failure can only be logged.
    committed: AtomicBool,
    cleanup: Cleanup,
}

impl ProcessShared {
    fn stderr_tail(&self) -> String {
        self.stderr
            .lock()
            .map(|tail| tail.to_string_lossy())
            .unwrap_or_default()
    }

    fn terminate(&self, event: TerminalEvent) -> bool {
        if !self.cleanup.fire() {
            return false;
        }
        info!(
            stream_id = %self.stream_id,
            event = %event,
            bytes_sent = self.bytes_sent.load(Ordering::Relaxed),
            "stream terminated"
        );
        true
    }
}

/// One ffmpeg invocation. The child itself is owned by a supervisor task;
/// the handle carries the diagnostics and the single-fire cleanup.
///
/// Dropping the handle counts as [`TerminalEvent::ResponseClosed`].
pub struct ProcessHandle {
    shared: Arc<ProcessShared>,
}

impl ProcessHandle {
    fn new(args: Vec<String>, release: ReleaseFn) -> Self {
        Self {
            shared: Arc::new(ProcessShared {
                stream_id: Uuid::new_v4(),
                args,
                stderr: Mutex::new(StderrTail::default()),
                bytes_sent: AtomicU64::new(0),
                committed: AtomicBool::new(false),
                cleanup: Cleanup::new(release),
            }),
        }
    }

    pub fn stream_id(&self) -> Uuid {
        self.shared.stream_id
    }

    pub fn args(&self) -> &[String] {
        &self.shared.args
    }

    pub fn stderr_tail(&self) -> String {
        self.shared.stderr_tail()
    }

    pub fn bytes_sent(&self) -> u64 {
        self.shared.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.cleanup.has_fired()
    }

    /// Kill ffmpeg (if still running) and release the slot. No-op after the first call.
    pub fn terminate(&self, event: TerminalEvent) -> bool {
        self.shared.terminate(event)
    }

    pub(crate) fn record_sent(&self, n: usize) {
        self.shared.bytes_sent.fetch_add(n as u64, Ordering::Relaxed);
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.shared.terminate(TerminalEvent::ResponseClosed);
    }
}

/// A running transcode whose first output chunk has already arrived.
pub struct LaunchedStream {
    pub format: AudioFormat,
    pub filename: String,
    pub body: TranscodeBody,
}

impl LaunchedStream {
    pub fn stream_id(&self) -> Uuid {
        self.body.handle().stream_id()
    }

    /// Headers to send ahead of the body.
    pub fn response_headers(&self) -> [(&'static str, String); 4] {
        [
            ("content-type", self.format.content_type().to_string()),
            (
                "content-disposition",
                format!("inline; filename=\"{}\"", self.filename),
            ),
            ("cache-control", "no-store".to_string()),
            ("x-accel-buffering", "no".to_string()),
        ]
    }
}

/// Launches ffmpeg per request and ties its lifetime to the response.
pub struct TranscodeManager {
    config: TranscoderConfig,
}

impl TranscodeManager {
    pub fn new(config: TranscoderConfig) -> Self {
        Self { config }
    }

    /// Start ffmpeg for `request` and wait for its first output chunk.
    ///
    /// `on_cleanup` runs exactly once, at the first terminal event: process
    /// exit, body completion, body drop, or launch failure. If this future is
    /// dropped before returning, the cleanup still runs.
    pub async fn launch<F>(
        &self,
        request: &StreamRequest,
        on_cleanup: F,
    ) -> Result<LaunchedStream, TranscodeError>
    where
        F: FnOnce() + Send + 'static,
    {
        let handling = self.audio_handling(request).await;
        let args = build_args(request, handling, self.config.reconnect_delay_max_secs);
        let handle = ProcessHandle::new(args, Box::new(on_cleanup));
        let stream_id = handle.stream_id();

        let spawned = Command::new(&self.config.ffmpeg_path)
            .args(handle.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                handle.terminate(TerminalEvent::LaunchFailed);
                return Err(match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        TranscodeError::BinaryNotFound(self.config.ffmpeg_path.clone())
                    }
                    _ => TranscodeError::SpawnFailed(e.to_string()),
                });
            }
        };

        info!(
            %stream_id,
            pid = child.id(),
            format = %request.format(),
            ?handling,
            "spawned ffmpeg"
        );
        debug!(%stream_id, args = ?handle.args(), "ffmpeg arguments");

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            handle.terminate(TerminalEvent::LaunchFailed);
            return Err(TranscodeError::SpawnFailed("ffmpeg stdio not captured".into()));
        };

        let stderr_task = tokio::spawn(capture_stderr(stderr, handle.shared.clone()));
        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(supervise(child, stderr_task, handle.shared.clone(), exit_tx));

        let mut stdout = ReaderStream::new(stdout);
        let first = match stdout.next().await {
            Some(Ok(chunk)) => Some(chunk),
            Some(Err(e)) => {
                handle.terminate(TerminalEvent::LaunchFailed);
                return Err(TranscodeError::Io(e));
            }
            // No output at all: the exit status decides between an empty
            // success and an error response.
            None => match exit_rx.await {
                Ok(status) if status.success() => None,
                outcome => {
                    let status = outcome
                        .map(|s| s.to_string())
                        .unwrap_or_else(|_| "unknown status".to_string());
                    let stderr_tail = handle.stderr_tail();
                    handle.terminate(TerminalEvent::LaunchFailed);
                    return Err(TranscodeError::ProcessFailed {
                        status,
                        stderr_tail,
                    });
                }
            },
        };

        handle.shared.committed.store(true, Ordering::Release);
        Ok(LaunchedStream {
            format: request.format(),
            filename: request.output_filename().to_string(),
            body: TranscodeBody::new(first, stdout, handle),
        })
    }

    async fn audio_handling(&self, request: &StreamRequest) -> AudioHandling {
        if !self.config.probe_source || request.format() != AudioFormat::M4a {
            return AudioHandling::Encode;
        }
        let timeout = Duration::from_secs(self.config.probe_timeout_secs);
        match probe_audio(&self.config.ffprobe_path, request.source_url(), timeout).await {
            Ok(Some(audio)) => {
                debug!(
                    codec = %audio.codec,
                    channels = audio.channels,
                    sample_rate = audio.sample_rate,
                    "probed source audio"
                );
                if audio.is_mp4_compatible() {
                    AudioHandling::Copy
                } else {
                    AudioHandling::Encode
                }
            }
            Ok(None) => AudioHandling::Encode,
            Err(e) => {
                warn!(error = %e, "source probe failed, re-encoding audio");
                AudioHandling::Encode
            }
        }
    }
}

async fn capture_stderr(mut stderr: ChildStderr, shared: Arc<ProcessShared>) {
    let mut buf = [0u8; 1024];
    loop {
        match stderr.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                debug!(
                    stream_id = %shared.stream_id,
                    "ffmpeg: {}",
                    String::from_utf8_lossy(&buf[..n]).trim_end()
                );
                if let Ok(mut tail) = shared.stderr.lock() {
                    tail.push(&buf[..n]);
                }
            }
            Err(e) => {
                debug!(stream_id = %shared.stream_id, error = %e, "stderr read failed");
                break;
            }
        }
    }
}

/// Owns the child until it exits or the cleanup asks for it to be killed.
async fn supervise(
    mut child: Child,
    stderr_task: JoinHandle<()>,
    shared: Arc<ProcessShared>,
    exit_tx: oneshot::Sender<ExitStatus>,
) {
    let kill = shared.cleanup.kill.clone();
    let mut killed = false;

    let status = tokio::select! {
        status = child.wait() => status,
        _ = kill.cancelled() => {
            killed = true;
            if let Err(e) = child.start_kill() {
                debug!(stream_id = %shared.stream_id, error = %e, "kill failed, process already gone");
            }
            child.wait().await
        }
    };

    // Drain stderr fully so the tail is complete before anyone reads it.
    if let Err(e) = stderr_task.await {
        debug!(stream_id = %shared.stream_id, error = %e, "stderr capture task failed");
    }

    match status {
        Ok(status) => {
            if killed {
                debug!(stream_id = %shared.stream_id, %status, "ffmpeg killed");
            } else if !status.success() {
                // Once committed, this log line is the only trace of the failure.
                warn!(
                    stream_id = %shared.stream_id,
                    %status,
                    committed = shared.committed.load(Ordering::Acquire),
                    bytes_sent = shared.bytes_sent.load(Ordering::Relaxed),
                    stderr = %shared.stderr_tail(),
                    "ffmpeg failed"
                );
            } else {
                debug!(stream_id = %shared.stream_id, %status, "ffmpeg exited");
            }
            let _ = exit_tx.send(status);
        }
        Err(e) => {
            warn!(stream_id = %shared.stream_id, error = %e, "failed to wait for ffmpeg");
        }
    }

    shared.terminate(TerminalEvent::ProcessExited);
}
