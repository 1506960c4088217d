//! Wire frames exchanged with the hosted realtime channel.
//!
//! The channel speaks Phoenix-style JSON frames: a fixed outer envelope of
//! `{topic, event, payload, ref}` with typed payloads for join, heartbeat
//! and broadcast traffic. Request/response/change envelopes ride inside
//! broadcast frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeResult;

/// Phoenix control events.
pub const EVENT_JOIN: &str = "phx_join";
pub const EVENT_REPLY: &str = "phx_reply";
pub const EVENT_CLOSE: &str = "phx_close";
pub const EVENT_ERROR: &str = "phx_error";
pub const EVENT_HEARTBEAT: &str = "heartbeat";
pub const EVENT_BROADCAST: &str = "broadcast";

/// Topic heartbeats are addressed to.
pub const CONTROL_TOPIC: &str = "phoenix";

/// Inner broadcast event names used by the bridge.
pub const BROADCAST_REQUEST: &str = "request";
pub const BROADCAST_RESPONSE: &str = "response";
pub const BROADCAST_CHANGE: &str = "change";

/// The outer socket frame shared by all channel traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocketMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

impl SocketMessage {
    /// Join-topic control message. The channel config asks the server to
    /// echo our own broadcasts back (`self: true`) without per-message acks.
    pub fn join(topic: &str, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_JOIN.to_string(),
            payload: serde_json::json!({
                "config": {
                    "broadcast": { "ack": false, "self": true },
                    "presence": { "key": "" },
                    "private": false,
                }
            }),
            reference: Some(reference),
        }
    }

    pub fn heartbeat(reference: String) -> Self {
        Self {
            topic: CONTROL_TOPIC.to_string(),
            event: EVENT_HEARTBEAT.to_string(),
            payload: serde_json::json!({}),
            reference: Some(reference),
        }
    }

    /// Wrap a payload in the channel's broadcast envelope.
    pub fn broadcast(topic: &str, event: &str, payload: Value, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: EVENT_BROADCAST.to_string(),
            payload: serde_json::to_value(BroadcastPayload {
                kind: EVENT_BROADCAST.to_string(),
                event: event.to_string(),
                payload,
            })
            .unwrap_or(Value::Null),
            reference: Some(reference),
        }
    }

    pub fn decode(raw: &str) -> BridgeResult<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn encode(&self) -> BridgeResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inner payload of a broadcast frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
}

/// A path-addressed request from a remote client.
///
/// All fields are optional on the wire; a request without a usable
/// `request_id` is unaddressable and gets dropped by the dispatcher.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestPayload {
    pub request_id: Option<String>,
    pub client_id: Option<String>,
    pub op: Option<String>,
    pub path: Option<String>,
    pub payload: Value,
}

/// Outcome marker on a response envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Error,
}

/// Response to a single request; `request_id` is echoed verbatim and
/// exactly one of `response`/`error` is non-null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponsePayload {
    pub request_id: String,
    pub client_id: String,
    pub status: Status,
    pub response: Value,
    pub error: Option<String>,
    pub ts_ms: i64,
}

/// Change notification published after every successful mutating op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangePayload {
    pub path: String,
    pub op: String,
    pub ts_ms: i64,
}

/// Operations the bridge understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    AuthAnonymous,
    Read,
    Set,
    Update,
    Remove,
}

impl Op {
    /// Parse a normalized (trimmed, lowercased) op name.
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "auth.anonymous" => Some(Self::AuthAnonymous),
            "read" => Some(Self::Read),
            "set" => Some(Self::Set),
            "update" => Some(Self::Update),
            "remove" => Some(Self::Remove),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AuthAnonymous => "auth.anonymous",
            Self::Read => "read",
            Self::Set => "set",
            Self::Update => "update",
            Self::Remove => "remove",
        }
    }

    /// Whether a successful op must publish a change envelope.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Self::Set | Self::Update | Self::Remove)
    }
}
