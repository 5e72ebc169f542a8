use std::net::SocketAddr;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;
use wavetap_server::config::GatewayConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = GatewayConfig::from_env().context("invalid configuration")?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    if config.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    info!(
        ffmpeg = %config.transcoder.ffmpeg_path.display(),
        default_format = %config.policy.default_format,
        allowed_formats = ?config.policy.allowed_formats,
        max_streams_per_client = config.max_streams_per_client,
        max_duration_secs = config.policy.max_duration_secs,
        signing = config.signing_secret.is_some(),
        "configuration loaded"
    );

    let app_state = wavetap_server::state::AppState::from_config(&config);
    let app = wavetap_server::routes::build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .context("failed to bind")?;
    info!(addr = %config.bind_addr, "server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;
    Ok(())
}
