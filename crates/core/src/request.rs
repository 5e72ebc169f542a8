use std::sync::LazyLock;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use regex::Regex;
use serde::Deserialize;

use crate::error::ApiError;
use crate::types::{AudioFormat, FormatChoice};

/// Hard upper bound on the output duration cap, whatever the configuration says.
pub const MAX_DURATION_CEILING_SECS: u32 = 24 * 60 * 60;

/// Maximum length of the suggested download filename, extension included.
pub const MAX_FILENAME_LEN: usize = 80;

pub const MAX_URL_LEN: usize = 4096;

const DEFAULT_BASENAME: &str = "audio";

/// Everything `encodeURIComponent` escapes, so `{id}` is safe in a path or a query.
const ID_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

static FILENAME_DISALLOWED_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

/// Raw query parameters of `/demux` (and the legacy `/audio` spelling).
#[derive(Debug, Default, Clone, Deserialize)]
pub struct StreamQuery {
    #[serde(default, alias = "src")]
    pub url: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "format")]
    pub fmt: Option<String>,
    #[serde(default)]
    pub exp: Option<String>,
    #[serde(default)]
    pub sig: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Server-side rules a query is validated against.
#[derive(Debug, Clone)]
pub struct RequestPolicy {
    pub default_format: AudioFormat,
    pub allowed_formats: Vec<AudioFormat>,
    pub max_duration_secs: u32,
    /// URL template containing `{id}`, used when a request names an identifier instead of a URL.
    pub source_id_template: Option<String>,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            default_format: AudioFormat::M4a,
            allowed_formats: AudioFormat::ALL.to_vec(),
            max_duration_secs: 3 * 60 * 60,
            source_id_template: None,
        }
    }
}

/// Signature expiry: the unix time it stands for and the text the client sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    unix_secs: i64,
    text: String,
}

impl Expiry {
    /// `None` unless the trimmed text is a decimal unix timestamp.
    pub fn parse(raw: &str) -> Option<Self> {
        let text = raw.trim();
        let unix_secs = text.parse::<i64>().ok()?;
        Some(Self {
            unix_secs,
            text: text.to_string(),
        })
    }

    pub fn unix_secs(&self) -> i64 {
        self.unix_secs
    }

    /// Exactly what the client supplied (trimmed); this is what gets signed.
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

/// A validated transcode job. Only obtainable through [`StreamRequest::build`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    source_url: String,
    format: AudioFormat,
    expiry: Option<Expiry>,
    signature: Option<String>,
    output_filename: String,
    max_duration_secs: u32,
}

impl StreamRequest {
    pub fn build(query: &StreamQuery, policy: &RequestPolicy) -> Result<Self, ApiError> {
        let source_url = resolve_source(query, policy)?;
        let format = resolve_format(query.fmt.as_deref(), policy)?;

        let expiry = match non_empty(query.exp.as_deref()) {
            Some(raw) => Some(
                Expiry::parse(raw)
                    .ok_or_else(|| ApiError::BadRequest("'exp' must be a unix timestamp".into()))?,
            ),
            None => None,
        };

        Ok(Self {
            source_url,
            format,
            expiry,
            signature: non_empty(query.sig.as_deref()).map(str::to_string),
            output_filename: sanitize_filename(query.name.as_deref(), format),
            max_duration_secs: policy.max_duration_secs.clamp(1, MAX_DURATION_CEILING_SECS),
        })
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn expiry(&self) -> Option<&Expiry> {
        self.expiry.as_ref()
    }

    pub fn signature(&self) -> Option<&str> {
        self.signature.as_deref()
    }

    pub fn output_filename(&self) -> &str {
        &self.output_filename
    }

    pub fn max_duration_secs(&self) -> u32 {
        self.max_duration_secs
    }
}

fn non_empty(v: Option<&str>) -> Option<&str> {
    v.map(str::trim).filter(|s| !s.is_empty())
}

fn resolve_source(query: &StreamQuery, policy: &RequestPolicy) -> Result<String, ApiError> {
    let candidate = match (non_empty(query.url.as_deref()), non_empty(query.id.as_deref())) {
        (Some(url), _) => url.to_string(),
        (None, Some(id)) => {
            let template = policy.source_id_template.as_deref().ok_or_else(|| {
                ApiError::BadRequest("'id' is not supported on this server; pass 'url'".into())
            })?;
            let encoded = utf8_percent_encode(id, ID_ENCODE_SET).to_string();
            template.replace("{id}", &encoded)
        }
        (None, None) => return Err(ApiError::BadRequest("missing 'url' parameter".into())),
    };

    if candidate.len() > MAX_URL_LEN {
        return Err(ApiError::BadRequest(format!(
            "'url' must be at most {MAX_URL_LEN} characters"
        )));
    }

    let parsed = url::Url::parse(&candidate)
        .map_err(|e| ApiError::BadRequest(format!("'url' is not a valid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
        return Err(ApiError::BadRequest(
            "'url' must be an absolute http or https URL".into(),
        ));
    }

    Ok(candidate)
}

fn resolve_format(requested: Option<&str>, policy: &RequestPolicy) -> Result<AudioFormat, ApiError> {
    let choice = match non_empty(requested) {
        None => FormatChoice::Auto,
        Some(raw) => FormatChoice::parse(raw)
            .ok_or_else(|| ApiError::BadRequest(format!("unsupported format '{raw}'")))?,
    };

    let format = match choice {
        FormatChoice::Auto => policy.default_format,
        FormatChoice::Exact(f) => f,
    };

    if !policy.allowed_formats.contains(&format) {
        return Err(ApiError::BadRequest(format!(
            "format '{format}' is not allowed"
        )));
    }
    Ok(format)
}

/// Derive the suggested download filename: restricted character set, capped
/// at [`MAX_FILENAME_LEN`] including the format extension.
pub fn sanitize_filename(name: Option<&str>, format: AudioFormat) -> String {
    let ext = format.extension();
    let mut base = name.map(str::trim).unwrap_or_default();

    // "talk.m4a" should not become "talk.m4a.m4a"
    let suffix_len = ext.len() + 1;
    if base.len() > suffix_len {
        let split = base.len() - suffix_len;
        if base.is_char_boundary(split) && base[split..].eq_ignore_ascii_case(&format!(".{ext}")) {
            base = &base[..split];
        }
    }

    let mut cleaned = FILENAME_DISALLOWED_RE.replace_all(base, "_").into_owned();
    // All remaining characters are ASCII, so byte truncation is safe.
    cleaned.truncate(MAX_FILENAME_LEN - suffix_len);

    let trimmed = cleaned.trim_matches('.');
    let base = if trimmed.is_empty() {
        DEFAULT_BASENAME
    } else {
        trimmed
    };
    format!("{base}.{ext}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(url: &str) -> StreamQuery {
        StreamQuery {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_url_is_rejected() {
        let err = StreamRequest::build(&StreamQuery::default(), &RequestPolicy::default())
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn blank_url_counts_as_missing() {
        let err = StreamRequest::build(&query("   "), &RequestPolicy::default()).unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn non_http_sources_are_rejected() {
        for url in ["file:///etc/passwd", "ftp://host/a.mp4", "not a url", "/local/path"] {
            let err = StreamRequest::build(&query(url), &RequestPolicy::default()).unwrap_err();
            assert_eq!(err.status_code(), 400, "{url}");
        }
    }

    #[test]
    fn auto_and_missing_format_resolve_to_default() {
        let policy = RequestPolicy {
            default_format: AudioFormat::Ogg,
            ..Default::default()
        };
        let mut q = query("https://host/a.mp4");
        assert_eq!(StreamRequest::build(&q, &policy).unwrap().format(), AudioFormat::Ogg);
        q.fmt = Some("auto".into());
        assert_eq!(StreamRequest::build(&q, &policy).unwrap().format(), AudioFormat::Ogg);
        q.fmt = Some("M4A".into());
        assert_eq!(StreamRequest::build(&q, &policy).unwrap().format(), AudioFormat::M4a);
    }

    #[test]
    fn unknown_or_disallowed_format_is_rejected() {
        let mut q = query("https://host/a.mp4");
        q.fmt = Some("mp3".into());
        assert!(StreamRequest::build(&q, &RequestPolicy::default()).is_err());

        let policy = RequestPolicy {
            allowed_formats: vec![AudioFormat::M4a],
            ..Default::default()
        };
        q.fmt = Some("ogg".into());
        let err = StreamRequest::build(&q, &policy).unwrap_err();
        assert!(err.to_string().contains("not allowed"));
    }

    #[test]
    fn malformed_expiry_is_a_validation_error() {
        let mut q = query("https://host/a.mp4");
        q.exp = Some("tomorrow".into());
        assert_eq!(
            StreamRequest::build(&q, &RequestPolicy::default())
                .unwrap_err()
                .status_code(),
            400
        );
        q.exp = Some("1700000000".into());
        q.sig = Some("abcd".into());
        let req = StreamRequest::build(&q, &RequestPolicy::default()).unwrap();
        assert_eq!(req.expiry().map(Expiry::unix_secs), Some(1_700_000_000));
        assert_eq!(req.signature(), Some("abcd"));
    }

    #[test]
    fn expiry_keeps_the_supplied_text() {
        let mut q = query("https://host/a.mp4");
        q.exp = Some(" +04102444800 ".into());
        let req = StreamRequest::build(&q, &RequestPolicy::default()).unwrap();
        let exp = req.expiry().unwrap();
        assert_eq!(exp.unix_secs(), 4_102_444_800);
        assert_eq!(exp.as_str(), "+04102444800");

        assert!(Expiry::parse("12abc").is_none());
        assert!(Expiry::parse("").is_none());
    }

    #[test]
    fn identifier_uses_template() {
        let policy = RequestPolicy {
            source_id_template: Some("https://media.example/stream?id={id}".into()),
            ..Default::default()
        };
        let q = StreamQuery {
            id: Some("a b/c".into()),
            ..Default::default()
        };
        let req = StreamRequest::build(&q, &policy).unwrap();
        assert_eq!(req.source_url(), "https://media.example/stream?id=a%20b%2Fc");

        let path_policy = RequestPolicy {
            source_id_template: Some("https://media.example/v/{id}/audio".into()),
            ..Default::default()
        };
        let q = StreamQuery {
            id: Some("my clip(1)~".into()),
            ..Default::default()
        };
        let req = StreamRequest::build(&q, &path_policy).unwrap();
        assert_eq!(req.source_url(), "https://media.example/v/my%20clip(1)~/audio");

        let err = StreamRequest::build(&q, &RequestPolicy::default()).unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn duration_is_clamped() {
        let policy = RequestPolicy {
            max_duration_secs: 10_000_000,
            ..Default::default()
        };
        let req = StreamRequest::build(&query("https://host/a.mp4"), &policy).unwrap();
        assert_eq!(req.max_duration_secs(), MAX_DURATION_CEILING_SECS);

        let policy = RequestPolicy {
            max_duration_secs: 0,
            ..Default::default()
        };
        let req = StreamRequest::build(&query("https://host/a.mp4"), &policy).unwrap();
        assert_eq!(req.max_duration_secs(), 1);
    }

    #[test]
    fn filename_defaults_and_extension() {
        assert_eq!(sanitize_filename(None, AudioFormat::M4a), "audio.m4a");
        assert_eq!(sanitize_filename(Some("..."), AudioFormat::Ogg), "audio.ogg");
        assert_eq!(sanitize_filename(Some("talk.M4A"), AudioFormat::M4a), "talk.m4a");
        assert_eq!(sanitize_filename(Some("talk.m4a"), AudioFormat::Ogg), "talk.m4a.ogg");
    }

    #[test]
    fn filename_is_restricted_and_capped() {
        let nasty = format!("../../etc/passwd \"quoted\"; שלום {}", "x".repeat(200));
        let name = sanitize_filename(Some(&nasty), AudioFormat::M4a);
        assert!(name.len() <= MAX_FILENAME_LEN);
        assert!(name.ends_with(".m4a"));
        assert!(
            name.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        );
        assert!(!name.contains('/'));
        assert!(!name.contains('"'));
    }

    #[test]
    fn truncation_does_not_leave_trailing_dots() {
        let cap = MAX_FILENAME_LEN - ".m4a".len();
        let long = format!("{}.{}", "a".repeat(cap - 1), "b".repeat(40));
        let name = sanitize_filename(Some(&long), AudioFormat::M4a);
        assert_eq!(name, format!("{}.m4a", "a".repeat(cap - 1)));
        assert!(!name.contains(".."));

        let dots = format!("{}{}", "x".repeat(cap - 3), ".".repeat(10));
        let name = sanitize_filename(Some(&dots), AudioFormat::Ogg);
        assert_eq!(name, format!("{}.ogg", "x".repeat(cap - 3)));
    }
}
