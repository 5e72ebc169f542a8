use serde::Serialize;
use thiserror::Error;

/// Unified API error type.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    TooManyRequests(String),

    #[error("{message}")]
    TranscodeFailed { message: String, detail: String },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::Forbidden(_) => "forbidden",
            Self::TooManyRequests(_) => "too_many_requests",
            Self::TranscodeFailed { .. } => "transcode_failed",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            Self::BadRequest(_) => 400,
            Self::Forbidden(_) => 403,
            Self::TooManyRequests(_) => 429,
            Self::TranscodeFailed { .. } => 500,
            Self::Internal(_) => 500,
        }
    }
}

/// JSON error body: `{ "error": "…" }`, plus `"detail"` for transcoder failures.
#[derive(Debug, Serialize)]
pub struct ErrorEnvelope {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&ApiError> for ErrorEnvelope {
    fn from(e: &ApiError) -> Self {
        let detail = match e {
            ApiError::TranscodeFailed { detail, .. } => Some(detail.clone()),
            _ => None,
        };
        Self {
            error: e.to_string(),
            detail,
        }
    }
}
