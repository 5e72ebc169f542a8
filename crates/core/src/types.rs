use serde::{Deserialize, Serialize};

/// Concrete output format produced by the transcoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    /// AAC (or stream-copied audio) in fragmented MP4.
    M4a,
    /// Opus in Ogg.
    Ogg,
}

impl AudioFormat {
    pub const ALL: [AudioFormat; 2] = [AudioFormat::M4a, AudioFormat::Ogg];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::M4a => "m4a",
            Self::Ogg => "ogg",
        }
    }

    /// Case-insensitive parse of a concrete format name. `auto` is not a format.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "m4a" => Some(Self::M4a),
            "ogg" => Some(Self::Ogg),
            _ => None,
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            Self::M4a => "audio/mp4",
            Self::Ogg => "audio/ogg",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the client asked for in `fmt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatChoice {
    Auto,
    Exact(AudioFormat),
}

impl FormatChoice {
    pub fn parse(s: &str) -> Option<Self> {
        if s.trim().eq_ignore_ascii_case("auto") {
            return Some(Self::Auto);
        }
        AudioFormat::parse(s).map(Self::Exact)
    }
}
