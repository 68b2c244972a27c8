//! Deterministic serialization and content hashing.
//!
//! Two structurally-equal JSON values always render to the same bytes regardless of the
//! order their object keys were inserted in, which is what makes the synchronizer's
//! hash-based equality work.

use serde_json::{Map, Value as JsonValue};
use sha2::{Digest, Sha256};

/// Render a JSON value with object keys sorted at every depth and no insignificant whitespace.
// Sorts explicitly: `serde_json::Map` keeps insertion order once any crate in the graph
// enables `preserve_order`.
#[must_use]
pub fn canonical_json(value: &JsonValue) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &JsonValue, out: &mut String) {
    match value {
        JsonValue::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&JsonValue::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        JsonValue::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// SHA-256 over the canonical rendering of `fields`, as lowercase hex.
#[must_use]
pub fn content_hash(fields: &Map<String, JsonValue>) -> String {
    let canonical = canonical_json(&JsonValue::Object(fields.clone()));
    hex::encode(Sha256::digest(canonical.as_bytes()))
}
