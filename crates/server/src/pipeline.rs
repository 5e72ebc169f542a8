//! Request-to-process pipeline behind `GET /demux`.
//!
//! ```text
//! Received -> Validated -> Authorized -> Admitted -> Streaming -> Terminated
//!     400 <-+      403 <-+       429 <-+      500 <-+
//! ```
//!
//! Rejections before `Admitted` never hold a slot. From `Admitted` on, the
//! slot is owned by the transcoder's single-fire cleanup, which releases it at
//! the first terminal event. `Terminated` is logged by that cleanup.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use tracing::{debug, info, warn};
use wavetap_core::error::ApiError;
use wavetap_core::request::{StreamQuery, StreamRequest};

use crate::error::AppError;
use crate::identity::ClientIdentity;
use crate::state::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Received,
    Validated,
    Authorized,
    Admitted,
    Streaming,
    Terminated,
}

impl PipelineState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::Authorized => "authorized",
            Self::Admitted => "admitted",
            Self::Streaming => "streaming",
            Self::Terminated => "terminated",
        }
    }
}

/// GET /demux (and the legacy GET /audio)
pub async fn demux(
    State(state): State<AppState>,
    identity: ClientIdentity,
    uri: Uri,
) -> Result<Response, AppError> {
    match run(&state, &identity, &uri).await {
        Ok(response) => Ok(response),
        Err(e) => {
            let status = e.status_code();
            if status >= 500 {
                warn!(%identity, code = e.code(), status, error = %e, "stream request failed");
            } else {
                info!(%identity, code = e.code(), status, error = %e, "stream request rejected");
            }
            Err(e.into())
        }
    }
}

async fn run(state: &AppState, identity: &ClientIdentity, uri: &Uri) -> Result<Response, ApiError> {
    transition(identity, PipelineState::Received);
    let Query(query) = Query::<StreamQuery>::try_from_uri(uri)
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let request = StreamRequest::build(&query, &state.policy)?;
    transition(identity, PipelineState::Validated);

    if !state.signatures.verify(
        Some(request.source_url()),
        request.expiry(),
        request.signature(),
    ) {
        return Err(ApiError::Forbidden("invalid or expired signature".into()));
    }
    transition(identity, PipelineState::Authorized);

    let slot = state.limiter.try_acquire(identity.as_str()).ok_or_else(|| {
        ApiError::TooManyRequests(format!(
            "too many concurrent streams (limit {})",
            state.limiter.max_per_client()
        ))
    })?;
    transition(identity, PipelineState::Admitted);

    // The slot now belongs to the stream's cleanup and is released with it.
    let launched = state
        .transcoder
        .launch(&request, move || drop(slot))
        .await
        .map_err(|e| AppError::from(e).0)?;

    info!(
        %identity,
        stream_id = %launched.stream_id(),
        format = %launched.format,
        state = PipelineState::Streaming.as_str(),
        "streaming"
    );

    let mut builder = Response::builder().status(StatusCode::OK);
    for (name, value) in launched.response_headers() {
        builder = builder.header(name, value);
    }
    builder
        .body(Body::from_stream(launched.body))
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

fn transition(identity: &ClientIdentity, next: PipelineState) {
    debug!(%identity, state = next.as_str(), "pipeline transition");
}
