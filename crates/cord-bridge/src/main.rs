use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use cord_bridge::{BridgeConfig, ChannelBridge, StateStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = BridgeConfig::from_env();
    if config.endpoint.is_empty() || config.api_key.is_empty() {
        error!("missing SUPABASE_URL or SUPABASE_SERVICE_ROLE_KEY/SUPABASE_ANON_KEY");
        return;
    }

    let store = match StateStore::open(&config.db_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(db = %config.db_path.display(), "failed to open state store: {e}");
            return;
        }
    };

    info!(
        db = %config.db_path.display(),
        channel = %config.channel,
        slow_request_ms = config.slow_request_ms,
        "starting realtime bridge"
    );

    ChannelBridge::new(config, store).run().await;
}
