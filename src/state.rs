use crate::{
    config::Config,
    middleware::auth::{JwtVerifier, TokenVerifier},
    services::MessageSink,
    websocket::{Hub, PumpConfig},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<Config>,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Receives routed chat envelopes for storage
    pub sink: Arc<dyn MessageSink>,
}

impl AppState {
    /// Fresh hub with an HS256 verifier keyed by `config.jwt_secret`.
    pub fn new(config: Config, sink: Arc<dyn MessageSink>) -> Self {
        let verifier = Arc::new(JwtVerifier::new(&config.jwt_secret));
        Self {
            hub: Hub::new(),
            config: Arc::new(config),
            verifier,
            sink,
        }
    }

    pub fn pump_config(&self) -> PumpConfig {
        PumpConfig::from(&self.config.websocket)
    }
}
