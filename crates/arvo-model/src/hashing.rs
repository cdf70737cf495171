//! Canonical JSON serialization, shared by the subject codec and by every
//! crate that needs a deterministic string form of a `serde_json::Value`.
//!
//! Grounded on `chem-core::hashing::canonical_json`: object keys are
//! re-sorted through a `BTreeMap` before serialization so that two
//! structurally-equal values always produce byte-identical output,
//! independent of `serde_json`'s own (insertion-order) map representation.

use serde::Serialize;
use serde_json::Value;

/// Serializes `value` to its canonical JSON string form.
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let raw = serde_json::to_value(value)?;
    let canonical = canonicalize(raw);
    serde_json::to_string(&canonical)
}

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: std::collections::BTreeMap<String, Value> =
                map.into_iter().map(|(k, v)| (k, canonicalize(v))).collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}
