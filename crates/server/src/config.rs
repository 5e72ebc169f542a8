//! Gateway configuration, read once from the environment at startup.

use std::path::PathBuf;

use thiserror::Error;
use wavetap_core::request::{MAX_DURATION_CEILING_SECS, RequestPolicy};
use wavetap_core::types::AudioFormat;
use wavetap_transcoder::TranscoderConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var}: invalid value '{value}': {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },
    #[error("default format '{0}' is not in the allowed formats")]
    DefaultNotAllowed(AudioFormat),
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: String,
    pub transcoder: TranscoderConfig,
    pub policy: RequestPolicy,
    pub max_streams_per_client: usize,
    pub signing_secret: Option<String>,
    /// Header set by a trusted reverse proxy carrying the real client address.
    pub trusted_proxy_header: Option<String>,
    pub allowed_origins: Vec<String>,
    pub log_json: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            transcoder: TranscoderConfig::default(),
            policy: RequestPolicy::default(),
            max_streams_per_client: 3,
            signing_secret: None,
            trusted_proxy_header: None,
            allowed_origins: vec!["*".to_string()],
            log_json: false,
        }
    }
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key/value source; unset or blank keys take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let bind_addr = match (get("WAVETAP_BIND"), get("PORT")) {
            (Some(addr), _) => addr,
            (None, Some(port)) => {
                let port: u16 = parse_var("PORT", &port)?;
                format!("0.0.0.0:{port}")
            }
            (None, None) => defaults.bind_addr,
        };

        let mut transcoder = defaults.transcoder;
        if let Some(path) = get("WAVETAP_FFMPEG") {
            transcoder.ffmpeg_path = PathBuf::from(path);
        }
        if let Some(path) = get("WAVETAP_FFPROBE") {
            transcoder.ffprobe_path = PathBuf::from(path);
        }
        if let Some(v) = get("WAVETAP_RECONNECT_DELAY_MAX") {
            transcoder.reconnect_delay_max_secs = parse_var("WAVETAP_RECONNECT_DELAY_MAX", &v)?;
        }
        if let Some(v) = get("WAVETAP_PROBE_SOURCE") {
            transcoder.probe_source = parse_bool("WAVETAP_PROBE_SOURCE", &v)?;
        }

        let default_format = match get("WAVETAP_DEFAULT_FORMAT") {
            Some(v) => parse_format("WAVETAP_DEFAULT_FORMAT", &v)?,
            None => defaults.policy.default_format,
        };
        let allowed_formats = match get("WAVETAP_ALLOWED_FORMATS") {
            Some(v) => v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| parse_format("WAVETAP_ALLOWED_FORMATS", s))
                .collect::<Result<Vec<_>, _>>()?,
            None => defaults.policy.allowed_formats,
        };
        if !allowed_formats.contains(&default_format) {
            return Err(ConfigError::DefaultNotAllowed(default_format));
        }

        let max_duration_secs = match get("WAVETAP_MAX_DURATION_SECS") {
            Some(v) => {
                let secs: u32 = parse_var("WAVETAP_MAX_DURATION_SECS", &v)?;
                if secs == 0 {
                    return Err(invalid("WAVETAP_MAX_DURATION_SECS", &v, "must be at least 1"));
                }
                secs.min(MAX_DURATION_CEILING_SECS)
            }
            None => defaults.policy.max_duration_secs,
        };

        let max_streams_per_client = match get("WAVETAP_MAX_STREAMS_PER_CLIENT") {
            Some(v) => {
                let n: usize = parse_var("WAVETAP_MAX_STREAMS_PER_CLIENT", &v)?;
                if n == 0 {
                    return Err(invalid("WAVETAP_MAX_STREAMS_PER_CLIENT", &v, "must be at least 1"));
                }
                n
            }
            None => defaults.max_streams_per_client,
        };

        let source_id_template = get("WAVETAP_SOURCE_ID_TEMPLATE");
        if let Some(template) = &source_id_template {
            if !template.contains("{id}") {
                return Err(invalid(
                    "WAVETAP_SOURCE_ID_TEMPLATE",
                    template,
                    "must contain the {id} placeholder",
                ));
            }
        }

        let allowed_origins = match get("WAVETAP_ALLOWED_ORIGINS") {
            Some(v) => v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.allowed_origins,
        };

        let log_json = match get("WAVETAP_LOG_JSON") {
            Some(v) => parse_bool("WAVETAP_LOG_JSON", &v)?,
            None => false,
        };

        Ok(Self {
            bind_addr,
            transcoder,
            policy: RequestPolicy {
                default_format,
                allowed_formats,
                max_duration_secs,
                source_id_template,
            },
            max_streams_per_client,
            signing_secret: get("WAVETAP_SIGNING_SECRET"),
            trusted_proxy_header: get("WAVETAP_TRUSTED_PROXY_HEADER").map(|h| h.to_ascii_lowercase()),
            allowed_origins,
            log_json,
        })
    }
}

fn invalid(var: &'static str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        var,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_var<T>(var: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e: T::Err| invalid(var, value, &e.to_string()))
}

fn parse_bool(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(invalid(var, value, "expected a boolean")),
    }
}

fn parse_format(var: &'static str, value: &str) -> Result<AudioFormat, ConfigError> {
    AudioFormat::parse(value).ok_or_else(|| invalid(var, value, "expected m4a or ogg"))
}
