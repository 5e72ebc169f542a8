#![allow(clippy::collapsible_if)]
pub mod args;
pub mod diagnostics;
pub mod ffprobe;
pub mod process;
pub mod stream;

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TranscodeError {
    #[error("ffmpeg/ffprobe not found at {0}")]
    BinaryNotFound(PathBuf),
    #[error("failed to start ffmpeg: {0}")]
    SpawnFailed(String),
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),
    #[error("ffmpeg exited with {status} before producing output")]
    ProcessFailed { status: String, stderr_tail: String },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Global transcoder configuration.
#[derive(Debug, Clone)]
pub struct TranscoderConfig {
    pub ffmpeg_path: PathBuf,
    pub ffprobe_path: PathBuf,
    /// Upper bound for ffmpeg's upstream reconnect back-off, in seconds.
    pub reconnect_delay_max_secs: u32,
    /// Probe the source so already-AAC audio can be stream-copied into m4a.
    pub probe_source: bool,
    pub probe_timeout_secs: u64,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            ffprobe_path: PathBuf::from("ffprobe"),
            reconnect_delay_max_secs: 5,
            probe_source: false,
            probe_timeout_secs: 5,
        }
    }
}
