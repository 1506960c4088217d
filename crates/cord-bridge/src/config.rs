//! Configuration for the bridge daemon.
//!
//! All knobs come from the environment; everything except the endpoint and
//! API key has a default good enough for local development.

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use url::Url;

use crate::error::{BridgeError, BridgeResult};

const DEFAULT_CHANNEL: &str = "cord-rt-bridge";
const DEFAULT_DB: &str = "cord_local.db";
const DEFAULT_SLOW_REQUEST_MS: u64 = 350;
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;
const DEFAULT_HEARTBEAT_SECS: u64 = 20;
const DEFAULT_RECONNECT_SECS: u64 = 1;

/// Runtime configuration for the channel bridge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Base URL of the hosted realtime service (`https://...`).
    pub endpoint: String,
    /// API key presented as the `apikey` query parameter.
    pub api_key: String,
    /// Channel name; the joined topic is `realtime:<channel>`.
    pub channel: String,
    /// SQLite file holding the document and request log.
    pub db_path: PathBuf,
    /// Requests at or above this duration log at warn.
    pub slow_request_ms: u64,
    /// Max inbound websocket message size; `None` means unlimited.
    pub max_frame_bytes: Option<usize>,
    pub heartbeat_secs: u64,
    pub reconnect_secs: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            channel: DEFAULT_CHANNEL.to_string(),
            db_path: PathBuf::from(DEFAULT_DB),
            slow_request_ms: DEFAULT_SLOW_REQUEST_MS,
            max_frame_bytes: Some(DEFAULT_MAX_FRAME_BYTES),
            heartbeat_secs: DEFAULT_HEARTBEAT_SECS,
            reconnect_secs: DEFAULT_RECONNECT_SECS,
        }
    }
}

impl BridgeConfig {
    /// Build a config from the daemon's environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(endpoint) = std::env::var("SUPABASE_URL") {
            config.endpoint = endpoint.trim_end_matches('/').to_string();
        }
        config.api_key = std::env::var("SUPABASE_SERVICE_ROLE_KEY")
            .or_else(|_| std::env::var("SUPABASE_ANON_KEY"))
            .unwrap_or_default();
        if let Ok(channel) = std::env::var("CORD_SUPABASE_CHANNEL") {
            if !channel.is_empty() {
                config.channel = channel;
            }
        }
        if let Ok(db) = std::env::var("CORD_LOCAL_DB") {
            if !db.is_empty() {
                config.db_path = PathBuf::from(db);
            }
        }
        if let Ok(raw) = std::env::var("CORD_SLOW_REQUEST_MS") {
            if let Ok(ms) = raw.trim().parse() {
                config.slow_request_ms = ms;
            }
        }
        if let Ok(raw) = std::env::var("CORD_WS_MAX_SIZE") {
            config.max_frame_bytes = parse_max_frame_bytes(&raw);
        }
        config
    }

    /// Topic the bridge joins on the channel.
    pub fn topic(&self) -> String {
        format!("realtime:{}", self.channel)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_secs)
    }

    /// Websocket URL for the realtime service, with the API key encoded
    /// into the query string.
    pub fn socket_url(&self) -> BridgeResult<Url> {
        let mut url = Url::parse(self.endpoint.trim_end_matches('/'))
            .map_err(|e| BridgeError::Transport(format!("invalid endpoint url: {e}")))?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|_| BridgeError::Transport("endpoint url is not a websocket base".into()))?;
        url.path_segments_mut()
            .map_err(|_| BridgeError::Transport("endpoint url cannot be a base".into()))?
            .pop_if_empty()
            .extend(["realtime", "v1", "websocket"]);
        url.query_pairs_mut()
            .append_pair("apikey", &self.api_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

/// `CORD_WS_MAX_SIZE`: positive bytes, non-positive means unlimited,
/// garbage falls back to the default.
fn parse_max_frame_bytes(raw: &str) -> Option<usize> {
    match raw.trim().parse::<i64>() {
        Ok(size) if size > 0 => Some(size as usize),
        Ok(_) => None,
        Err(_) => Some(DEFAULT_MAX_FRAME_BYTES),
    }
}
