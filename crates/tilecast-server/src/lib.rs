use std::sync::Arc;

use tilecast_core::{Relay, RelayConfig};
use tilecast_observability::{redact_text, ProcessKind};
use tilecast_tools::ToolRegistry;

mod http;

pub use http::{app_router, serve};

/// Shared by every handler. Nothing in here is mutated after startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RelayConfig>,
    pub relay: Relay,
}

impl AppState {
    pub fn new(config: RelayConfig, relay: Relay) -> Self {
        Self {
            config: Arc::new(config),
            relay,
        }
    }

    pub fn from_config(config: RelayConfig) -> anyhow::Result<Self> {
        let relay = Relay::from_config(&config, ProcessKind::Server)?;
        log_startup(&config, &relay);
        Ok(Self::new(config, relay))
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.relay.registry()
    }
}

fn log_startup(config: &RelayConfig, relay: &Relay) {
    let info = relay.provider_info();
    let key = config
        .model
        .api_key
        .as_deref()
        .map(redact_text)
        .unwrap_or_else(|| "<unset>".to_string());
    tracing::info!(
        provider = %info.id,
        model = %info.model,
        api_key = %key,
        data_source = config.data_source.as_str(),
        "relay configured"
    );
    for name in config.missing_fetcher_keys() {
        tracing::warn!(env = name, "live data source without API key; lookups will fail upstream");
    }
}
