//! JSON metadata merge and field diff helpers.

use serde_json::{Map, Value as JsonValue};

/// Merge `patch` into `base` additively.
///
/// Nested objects are merged recursively; any other patch value (including
/// explicit `null`) overwrites the base value at that key. Keys absent from
/// the patch are preserved. If either side is not an object the patch wins
/// wholesale.
#[must_use]
pub fn deep_merge(base: &JsonValue, patch: &JsonValue) -> JsonValue {
    match (base, patch) {
        (JsonValue::Object(base_map), JsonValue::Object(patch_map)) => {
            let mut merged = base_map.clone();
            for (key, patch_value) in patch_map {
                match (merged.get(key), patch_value) {
                    (Some(existing @ JsonValue::Object(_)), JsonValue::Object(_)) => {
                        let nested = deep_merge(existing, patch_value);
                        merged.insert(key.clone(), nested);
                    }
                    _ => {
                        merged.insert(key.clone(), patch_value.clone());
                    }
                }
            }
            JsonValue::Object(merged)
        }
        _ => patch.clone(),
    }
}

/// Record a changed field in an audit diff map.
///
/// Produces entries of the form `"field": {"old": ..., "new": ...}`. Equal
/// values are skipped so an empty map means nothing changed.
pub fn record_change(
    changes: &mut Map<String, JsonValue>,
    field: &str,
    old: JsonValue,
    new: JsonValue,
) {
    if old != new {
        changes.insert(
            field.to_string(),
            serde_json::json!({ "old": old, "new": new }),
        );
    }
}
