// ABOUTME: Best-effort action labels for history entries, derived from a shallow state diff.
// ABOUTME: Observability sugar only — the labeling strategy is swappable per store registration.

use serde_json::Value;

/// Derive a label describing the transition from `prev` to `next`.
///
/// Compares top-level keys shallowly: exactly one changed key yields
/// `update_<key>`, several yield `batch_update_<n>_fields`, and anything
/// else (no detectable change, non-object states) falls back to `update`.
pub fn diff_label(prev: &Value, next: &Value) -> String {
    let (Value::Object(prev), Value::Object(next)) = (prev, next) else {
        return "update".to_string();
    };

    let mut changed: Vec<&str> = Vec::new();
    for (key, value) in next {
        if prev.get(key) != Some(value) {
            changed.push(key);
        }
    }
    for key in prev.keys() {
        if !next.contains_key(key) {
            changed.push(key);
        }
    }

    match changed.as_slice() {
        [] => "update".to_string(),
        [single] => format!("update_{single}"),
        many => format!("batch_update_{}_fields", many.len()),
    }
}
