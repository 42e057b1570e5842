// ABOUTME: Default merge combinator applied at rehydration and remote-update application.
// ABOUTME: Shallow last-writer-wins: persisted wins per key, current keeps keys absent from persisted.

use serde_json::Value;

/// Shallow merge of a persisted state into the current in-memory state.
///
/// For object states, every key present in `persisted` overrides the
/// corresponding key in `current`; keys only present in `current` survive,
/// which lets a store ship new default fields that an older persisted blob
/// does not yet carry. Non-object persisted states replace `current` wholesale.
pub fn shallow_merge(persisted: Value, current: Value) -> Value {
    match (persisted, current) {
        (Value::Object(persisted), Value::Object(mut merged)) => {
            for (key, value) in persisted {
                merged.insert(key, value);
            }
            Value::Object(merged)
        }
        (persisted, _) => persisted,
    }
}
