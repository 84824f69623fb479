//! Metadata field-map serialization and the minimal schema gate.
//!
//! Metadata records are persisted as flat string field maps: nested
//! objects and arrays are serialized to JSON text on write and parsed back
//! on read, nulls become empty strings, and remaining scalars are coerced
//! to their textual form. Reads are forgiving: a field that does not parse
//! as JSON is returned as the raw string.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{StoreError, StoreResult};

/// Top-level sections at least one of which must be present for a
/// metadata map to pass the schema gate.
pub const RECOGNIZED_SECTIONS: [&str; 3] = ["exif", "iptc", "xmp"];

/// Minimal schema gate: reject maps carrying none of the recognized
/// sections before anything touches the backend.
pub(crate) fn validate_sections(metadata: &Map<String, Value>) -> StoreResult<()> {
    if RECOGNIZED_SECTIONS
        .iter()
        .any(|section| metadata.contains_key(*section))
    {
        Ok(())
    } else {
        Err(StoreError::InvalidMetadata)
    }
}

/// Flatten a metadata map into string fields for hash-map storage.
pub(crate) fn flatten(metadata: &Map<String, Value>) -> StoreResult<Vec<(String, String)>> {
    let mut fields = Vec::with_capacity(metadata.len());
    for (key, value) in metadata {
        let text = match value {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            Value::Object(_) | Value::Array(_) => serde_json::to_string(value)?,
            other => other.to_string(),
        };
        fields.push((key.clone(), text));
    }
    Ok(fields)
}

/// Rebuild a metadata map from stored string fields.
pub(crate) fn restore(fields: HashMap<String, String>) -> Map<String, Value> {
    let mut metadata = Map::new();
    for (key, text) in fields {
        let value = serde_json::from_str(&text).unwrap_or_else(|_| Value::String(text));
        metadata.insert(key, value);
    }
    metadata
}
