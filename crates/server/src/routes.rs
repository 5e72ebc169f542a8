use axum::http::{HeaderValue, Method, header};
use axum::routing::get;
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

const USAGE: &str = "Use /demux?url={URL-ENCODED-SOURCE}&fmt=m4a|ogg|auto \
(example: /demux?url=https%3A%2F%2Fexample.com%2Fvideo.mp4&fmt=ogg)";

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.allowed_origins);
    Router::new()
        .route("/", get(index))
        .route("/healthz", get(healthz))
        .route("/demux", get(crate::pipeline::demux))
        .route("/audio", get(crate::pipeline::demux))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([header::RANGE, header::CONTENT_TYPE])
        .expose_headers([header::CONTENT_DISPOSITION]);

    if origins.iter().any(|o| o == "*") {
        layer.allow_origin(Any)
    } else {
        let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        layer.allow_origin(AllowOrigin::list(list))
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

async fn healthz() -> &'static str {
    "ok"
}

async fn index() -> &'static str {
    USAGE
}
