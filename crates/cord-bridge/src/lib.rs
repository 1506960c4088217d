//! # cord-bridge
//!
//! Exposes a locally persisted JSON path-tree store to remote clients over
//! a hosted realtime broadcast channel.
//!
//! Remote clients publish path-addressed read/write/query requests on a
//! shared topic; the bridge applies them to a single JSON document held in
//! SQLite and publishes responses and change notifications back on the
//! same topic. The pieces:
//!
//! - [`tree`] — pure get/set/update/remove/query over the document
//! - [`store`] — the document plus an append-only request log, atomic per
//!   operation
//! - [`bridge`] — websocket session lifecycle: join, heartbeat, receive,
//!   reconnect
//! - [`bridge::dispatcher`] — one response envelope per inbound request

pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod protocol;
pub mod store;
pub mod tree;

// Re-exports for convenience
pub use bridge::{ChannelBridge, RequestDispatcher, SessionHandle};
pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult};
pub use protocol::{
    BroadcastPayload, ChangePayload, Op, RequestPayload, ResponsePayload, SocketMessage, Status,
};
pub use store::StateStore;
