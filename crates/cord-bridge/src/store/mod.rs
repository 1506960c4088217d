//! Durable state: one JSON document plus an append-only request log.
//!
//! The document lives in a single SQLite row and is only ever touched
//! through [`StateStore::apply`], which wraps the pure tree operations in a
//! load/compute/persist transaction. The connection lock makes concurrent
//! applies single-writer: callers see either the fully-old or fully-new
//! document, never a partial write.

use std::path::Path;
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock;
use crate::error::{BridgeError, BridgeResult};
use crate::protocol::Op;
use crate::tree::{self, path, query, QueryOptions};

/// Direction tag recorded on request-log rows written by the channel path.
const DIRECTION_INBOUND: &str = "realtime-inbound";

/// Owns the SQLite connection holding the document and the request log.
pub struct StateStore {
    conn: Mutex<Connection>,
}

impl StateStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> BridgeResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        init_schema(&conn)?;
        info!(db = %path.as_ref().display(), "opened state store");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> BridgeResult<Self> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Execute one request against the store.
    ///
    /// Every attempt appends a request-log row first, whatever the outcome;
    /// the log records attempted operations, not just successful ones.
    /// Mutating ops load, transform and persist the document inside a single
    /// SQLite transaction, so a failed tree operation leaves the persisted
    /// document untouched.
    pub fn apply(&self, op: &str, path: &str, payload: &Value) -> BridgeResult<Value> {
        let normalized_op = op.trim().to_ascii_lowercase();
        let mut conn = self.conn.lock().unwrap();

        log_request(&conn, DIRECTION_INBOUND, &normalized_op, path, payload)?;

        let op = Op::parse(&normalized_op).ok_or(BridgeError::UnsupportedOperation {
            op: normalized_op.clone(),
        })?;

        match op {
            // Stub identity issuing; never touches the document.
            Op::AuthAnonymous => Ok(json!({ "uid": anonymous_uid() })),
            Op::Read => {
                let root = load_root(&conn)?;
                let raw = tree::get(&root, path);
                let options = QueryOptions::from_payload(payload);
                Ok(json!({
                    "path": path::normalize(path),
                    "value": query::apply(raw, &options),
                }))
            }
            Op::Set | Op::Update | Op::Remove => {
                let tx = conn.transaction()?;
                let mut root = load_root(&tx)?;
                match op {
                    Op::Set => {
                        let value = payload.get("value").cloned().unwrap_or(Value::Null);
                        tree::set(&mut root, path, value)?;
                    }
                    Op::Update => {
                        let value = payload.get("value").cloned().unwrap_or(Value::Null);
                        tree::update(&mut root, path, value)?;
                    }
                    Op::Remove => tree::remove(&mut root, path),
                    _ => unreachable!(),
                }
                save_root(&tx, &root)?;
                tx.commit()?;
                debug!(op = op.as_str(), path = %path::display(path), "persisted document");
                Ok(json!({ "ok": true }))
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn request_log_count(&self) -> usize {
        let conn = self.conn.lock().unwrap();
        conn.query_row("SELECT COUNT(*) FROM request_log", [], |row| row.get(0))
            .map(|n: i64| n as usize)
            .unwrap_or(0)
    }
}

fn init_schema(conn: &Connection) -> BridgeResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            data TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS request_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ts_ms INTEGER NOT NULL,
            direction TEXT NOT NULL,
            op TEXT NOT NULL,
            path TEXT NOT NULL,
            payload TEXT
        );",
    )?;
    let seeded: Option<i64> = conn
        .query_row("SELECT id FROM state WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    if seeded.is_none() {
        conn.execute("INSERT INTO state (id, data) VALUES (1, ?1)", params!["{}"])?;
    }
    Ok(())
}

/// Load the document root; a missing or corrupt row degrades to `{}`.
fn load_root(conn: &Connection) -> BridgeResult<Map<String, Value>> {
    let data: Option<String> = conn
        .query_row("SELECT data FROM state WHERE id = 1", [], |row| row.get(0))
        .optional()?;
    let root = data
        .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default();
    Ok(root)
}

fn save_root(conn: &Connection, root: &Map<String, Value>) -> BridgeResult<()> {
    let data = serde_json::to_string(root)?;
    conn.execute("UPDATE state SET data = ?1 WHERE id = 1", params![data])?;
    Ok(())
}

fn log_request(
    conn: &Connection,
    direction: &str,
    op: &str,
    path: &str,
    payload: &Value,
) -> BridgeResult<()> {
    conn.execute(
        "INSERT INTO request_log (ts_ms, direction, op, path, payload)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            clock::now_ms(),
            direction,
            op,
            path::normalize(path),
            payload.to_string(),
        ],
    )?;
    Ok(())
}

/// Fresh opaque identity for `auth.anonymous`.
fn anonymous_uid() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("u_{}", &hex[..20])
}
