use serde_json::{Map, Value};

use super::path;
use crate::clock;
use crate::error::{BridgeError, BridgeResult};

/// Marker key for the server timestamp sentinel, `{".sv": "timestamp"}`.
const SERVER_VALUE_KEY: &str = ".sv";

/// Substitute the server timestamp sentinel with the current epoch-ms value.
///
/// Only a mapping whose single key is the marker is rewritten; anything else
/// passes through untouched.
fn resolve_server_value(value: Value) -> Value {
    if let Value::Object(map) = &value {
        if map.len() == 1 && map.get(SERVER_VALUE_KEY).and_then(Value::as_str) == Some("timestamp")
        {
            return Value::from(clock::now_ms());
        }
    }
    value
}

/// Read the value at `path`.
///
/// A missing path is a value, not an error: descending through an absent or
/// non-object node yields `Null`. The result is a clone; callers never hold
/// a live reference into the document.
pub fn get(root: &Map<String, Value>, path: &str) -> Value {
    let mut segments = path::split(path).into_iter();
    let Some(first) = segments.next() else {
        return Value::Object(root.clone());
    };
    let Some(mut node) = root.get(first) else {
        return Value::Null;
    };
    for part in segments {
        match node.as_object().and_then(|map| map.get(part)) {
            Some(child) => node = child,
            None => return Value::Null,
        }
    }
    node.clone()
}

/// Write `value` at `path`, replacing whatever was there.
///
/// Writing to the root requires an object value and replaces the root's
/// contents in place (clear-then-extend, so holders of an earlier snapshot
/// never observe the mutation). For deeper paths, missing or non-object
/// intermediate nodes are silently replaced with fresh objects: last writer
/// wins on the whole parent chain.
pub fn set(root: &mut Map<String, Value>, path: &str, value: Value) -> BridgeResult<()> {
    let value = resolve_server_value(value);
    let parts = path::split(path);
    let Some((leaf, parents)) = parts.split_last() else {
        let Value::Object(entries) = value else {
            return Err(BridgeError::type_mismatch("Root value must be an object"));
        };
        root.clear();
        root.extend(entries);
        return Ok(());
    };
    let mut node = root;
    for part in parents {
        let slot = node
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        node = slot
            .as_object_mut()
            .expect("intermediate node was just made an object");
    }
    node.insert(leaf.to_string(), value);
    Ok(())
}

/// Shallow merge `value` one level below `path`.
///
/// Each top-level key of `value` fully replaces whatever was at
/// `path/<key>`; a `null` value deletes that key. This is deliberately not
/// a deep recursive merge.
pub fn update(root: &mut Map<String, Value>, path: &str, value: Value) -> BridgeResult<()> {
    let Value::Object(entries) = value else {
        return Err(BridgeError::type_mismatch("Update value must be an object"));
    };
    for (key, entry) in entries {
        let target = path::join(path, &key);
        if entry.is_null() {
            remove(root, &target);
        } else {
            set(root, &target, entry)?;
        }
    }
    Ok(())
}

/// Delete the value at `path`.
///
/// Removing the root clears the document. A broken parent chain or an
/// absent leaf is a silent no-op; removal is idempotent.
pub fn remove(root: &mut Map<String, Value>, path: &str) {
    let parts = path::split(path);
    let Some((leaf, parents)) = parts.split_last() else {
        root.clear();
        return;
    };
    let mut node = root;
    for part in parents {
        match node.get_mut(*part) {
            Some(Value::Object(child)) => node = child,
            _ => return,
        }
    }
    node.remove(*leaf);
}
