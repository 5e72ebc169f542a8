use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TranscodeError;

/// First audio stream of a remote source, as reported by ffprobe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceAudio {
    pub codec: String,
    pub channels: u32,
    pub sample_rate: Option<u32>,
}

impl SourceAudio {
    /// Whether the audio can go into fragmented MP4 without re-encoding.
    pub fn is_mp4_compatible(&self) -> bool {
        self.codec == "aac"
    }
}

/// Probe the first audio stream of `url`. `Ok(None)` means the source has no audio.
pub async fn probe_audio(
    ffprobe_path: &Path,
    url: &str,
    timeout: Duration,
) -> Result<Option<SourceAudio>, TranscodeError> {
    let mut cmd = tokio::process::Command::new(ffprobe_path);
    cmd.args([
        "-v",
        "error",
        "-print_format",
        "json",
        "-show_streams",
        "-select_streams",
        "a:0",
    ])
    .arg(url)
    .stdin(std::process::Stdio::null())
    .kill_on_drop(true);

    let output = tokio::time::timeout(timeout, cmd.output())
        .await
        .map_err(|_| TranscodeError::ProbeFailed(format!("timed out after {timeout:?}")))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => TranscodeError::BinaryNotFound(ffprobe_path.into()),
            _ => TranscodeError::ProbeFailed(format!("spawn failed: {e}")),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(TranscodeError::ProbeFailed(stderr.trim().to_string()));
    }

    let raw: serde_json::Value = serde_json::from_slice(&output.stdout)
        .map_err(|e| TranscodeError::ProbeFailed(format!("parse JSON: {e}")))?;

    Ok(parse_probe_output(&raw))
}

fn parse_probe_output(raw: &serde_json::Value) -> Option<SourceAudio> {
    let streams = raw.get("streams").and_then(|v| v.as_array())?;

    streams
        .iter()
        .find(|s| s.get("codec_type").and_then(|v| v.as_str()) == Some("audio"))
        .map(|s| SourceAudio {
            codec: s
                .get("codec_name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
            channels: s.get("channels").and_then(|v| v.as_u64()).unwrap_or(2) as u32,
            sample_rate: s
                .get("sample_rate")
                .and_then(|v| v.as_str())
                .and_then(|r| r.parse().ok()),
        })
}
