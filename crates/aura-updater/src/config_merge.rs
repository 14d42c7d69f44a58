//! Declarative key-path merge of a shipped default configuration into the
//! user's live configuration.
//!
//! Incoming keys are dotted paths. Three rules, in order:
//! - a string value `DEFAULT_<path>` copies whatever the live config holds
//!   at `<path>` (lets a schema migration point a renamed key at an old
//!   key's current value);
//! - object values deep-merge into an existing object, preserving live-only
//!   keys;
//! - everything else (arrays included) replaces the live value outright.
//!
//! Merging never fails the update: the caller logs and skips on error.

use serde_json::{Map, Value};

/// Merge `incoming` (the package's shipped defaults) into `live` (the
/// user's current config) and return the merged document.
pub fn merge_config(live: &Value, incoming: &Value) -> Value {
    let mut merged = live.clone();
    let Some(incoming_obj) = incoming.as_object() else {
        return merged;
    };

    for (key, value) in incoming_obj {
        if let Some(source_path) = value.as_str().and_then(|s| s.strip_prefix("DEFAULT_")) {
            let current = get_path(&merged, source_path).cloned().unwrap_or(Value::Null);
            set_path(&mut merged, key, current);
        } else if value.is_object() {
            let replacement = match get_path(&merged, key) {
                Some(existing) if existing.is_object() => deep_merge(existing, value),
                _ => value.clone(),
            };
            set_path(&mut merged, key, replacement);
        } else {
            set_path(&mut merged, key, value.clone());
        }
    }

    merged
}

/// Recursive object merge; the overlay wins for non-object values.
fn deep_merge(base: &Value, overlay: &Value) -> Value {
    match (base.as_object(), overlay.as_object()) {
        (Some(base_obj), Some(overlay_obj)) => {
            let mut out = base_obj.clone();
            for (key, value) in overlay_obj {
                let merged = match out.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                out.insert(key.clone(), merged);
            }
            Value::Object(out)
        }
        _ => overlay.clone(),
    }
}

/// Read a dotted key path.
pub fn get_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = root;
    for part in path.split('.') {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

/// Write a dotted key path, creating intermediate objects as needed.
pub fn set_path(root: &mut Value, path: &str, new_value: Value) {
    let mut current = root;
    let mut parts = path.split('.').peekable();

    while let Some(part) = parts.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let obj = match current.as_object_mut() {
            Some(o) => o,
            None => return,
        };
        if parts.peek().is_none() {
            obj.insert(part.to_string(), new_value);
            return;
        }
        current = obj
            .entry(part.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }
}
