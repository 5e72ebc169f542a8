use std::sync::Arc;

use wavetap_core::request::RequestPolicy;
use wavetap_transcoder::process::TranscodeManager;

use crate::config::GatewayConfig;
use crate::limiter::ConcurrencyLimiter;
use crate::signature::SignatureVerifier;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub policy: Arc<RequestPolicy>,
    pub signatures: SignatureVerifier,
    pub limiter: ConcurrencyLimiter,
    pub transcoder: Arc<TranscodeManager>,
    pub trusted_proxy_header: Option<String>,
    pub allowed_origins: Vec<String>,
}

impl AppState {
    pub fn from_config(config: &GatewayConfig) -> Self {
        Self {
            policy: Arc::new(config.policy.clone()),
            signatures: SignatureVerifier::new(config.signing_secret.as_deref()),
            limiter: ConcurrencyLimiter::new(config.max_streams_per_client),
            transcoder: Arc::new(TranscodeManager::new(config.transcoder.clone())),
            trusted_proxy_header: config.trusted_proxy_header.clone(),
            allowed_origins: config.allowed_origins.clone(),
        }
    }
}
