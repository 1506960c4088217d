use std::sync::Arc;
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use super::SessionHandle;
use crate::clock;
use crate::error::BridgeError;
use crate::protocol::{
    Op, RequestPayload, ResponsePayload, ChangePayload, Status, BROADCAST_CHANGE,
    BROADCAST_RESPONSE,
};
use crate::store::StateStore;
use crate::tree::path;

/// Routes one inbound request envelope to the store and publishes the
/// response (and, for mutating ops, the change notification).
///
/// Cheap to clone; one clone lives per in-flight request task.
#[derive(Clone)]
pub struct RequestDispatcher {
    store: Arc<StateStore>,
    session: SessionHandle,
    slow_request_ms: u64,
}

impl RequestDispatcher {
    pub fn new(store: Arc<StateStore>, session: SessionHandle, slow_request_ms: u64) -> Self {
        Self {
            store,
            session,
            slow_request_ms,
        }
    }

    /// Handle a single request end to end.
    ///
    /// Exactly one response envelope is published per addressable request,
    /// success or failure; nothing escapes this boundary. A request without
    /// a `request_id` cannot be answered and is dropped silently.
    pub async fn handle(&self, request: RequestPayload) {
        let Some(request_id) = request.request_id.filter(|id| !id.is_empty()) else {
            return;
        };
        let client_id = request.client_id.unwrap_or_default();
        let op = request
            .op
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        let req_path = request.path.unwrap_or_default();
        let payload = request.payload;

        let started = Instant::now();
        if op == "read" {
            debug!(id = %request_id, client = %client_id, path = %path::display(&req_path), "request read");
        } else {
            info!(id = %request_id, client = %client_id, op = %op, path = %path::display(&req_path), "request");
        }

        // Storage is blocking; keep it off the channel event loop.
        let result = {
            let store = self.store.clone();
            let op = op.clone();
            let req_path = req_path.clone();
            let payload = payload.clone();
            tokio::task::spawn_blocking(move || store.apply(&op, &req_path, &payload))
                .await
                .unwrap_or_else(|e| Err(BridgeError::Internal(format!("storage task failed: {e}"))))
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                self.publish_response(&request_id, &client_id, Status::Ok, response, None);

                if elapsed_ms >= self.slow_request_ms {
                    warn!(id = %request_id, op = %op, elapsed_ms, "slow request");
                } else if op == "read" {
                    debug!(id = %request_id, op = %op, elapsed_ms, "ok");
                } else {
                    info!(id = %request_id, op = %op, elapsed_ms, "ok");
                }

                if Op::parse(&op).is_some_and(|op| op.is_mutating()) {
                    let change = ChangePayload {
                        path: path::normalize(&req_path).to_string(),
                        op: op.clone(),
                        ts_ms: clock::now_ms(),
                    };
                    self.session.publish(BROADCAST_CHANGE, &change);
                    debug!(op = %op, path = %path::display(&req_path), "change");
                }
            }
            Err(e) => {
                let message = e.to_string();
                self.publish_response(
                    &request_id,
                    &client_id,
                    Status::Error,
                    Value::Null,
                    Some(message.clone()),
                );
                error!(id = %request_id, op = %op, elapsed_ms, "request failed: {message}");
            }
        }
    }

    fn publish_response(
        &self,
        request_id: &str,
        client_id: &str,
        status: Status,
        response: Value,
        error: Option<String>,
    ) {
        let envelope = ResponsePayload {
            request_id: request_id.to_string(),
            client_id: client_id.to_string(),
            status,
            response,
            error,
            ts_ms: clock::now_ms(),
        };
        self.session.publish(BROADCAST_RESPONSE, &envelope);
    }
}
