// ABOUTME: Export bundle types — the one stable external JSON contract, since bundles move between machines.
// ABOUTME: Shape: { timestamp: millis, version: 1, stores: { name: { state, version, lastSaved, history? } } }.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::HistoryEntry;

/// Top-level format version stamped into every bundle. Imports reject any
/// other value outright; per-store schema versions are gated separately.
pub const BUNDLE_FORMAT_VERSION: u32 = 1;

/// A self-contained snapshot of one or more stores, produced by export and
/// consumed by import. Serialized as JSON (then optionally encrypted).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportBundle {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub version: u32,
    pub stores: BTreeMap<String, ExportedStore>,
}

/// One store's slice of an export bundle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedStore {
    pub state: String,
    pub version: u32,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_saved: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<HistoryEntry>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle_with_counter(history: Option<Vec<HistoryEntry>>) -> ExportBundle {
        let mut stores = BTreeMap::new();
        stores.insert(
            "counter".to_string(),
            ExportedStore {
                state: "{\"n\":5}".to_string(),
                version: 1,
                last_saved: Utc::now(),
                history,
            },
        );
        ExportBundle {
            timestamp: Utc::now(),
            version: BUNDLE_FORMAT_VERSION,
            stores,
        }
    }

    #[test]
    fn bundle_wire_shape_is_stable() {
        let json = serde_json::to_value(bundle_with_counter(None)).unwrap();
        assert!(json["timestamp"].is_i64());
        assert_eq!(json["version"], 1);
        assert_eq!(json["stores"]["counter"]["state"], "{\"n\":5}");
        assert!(json["stores"]["counter"]["lastSaved"].is_i64());
        assert!(
            json["stores"]["counter"].get("history").is_none(),
            "history should be omitted when not requested"
        );
    }

    #[test]
    fn bundle_round_trips_with_history() {
        let history = vec![HistoryEntry {
            state: "{\"n\":5}".to_string(),
            timestamp: Utc::now(),
            action: "update_n".to_string(),
        }];
        let bundle = bundle_with_counter(Some(history));
        let json = serde_json::to_string(&bundle).unwrap();
        let parsed: ExportBundle = serde_json::from_str(&json).unwrap();
        let entry = &parsed.stores["counter"];
        assert_eq!(entry.history.as_ref().unwrap().len(), 1);
        assert_eq!(entry.history.as_ref().unwrap()[0].action, "update_n");
    }

    #[test]
    fn bundle_without_history_field_still_parses() {
        let json = r#"{"timestamp":1700000000000,"version":1,"stores":{"counter":{"state":"{}","version":1,"lastSaved":1700000000000}}}"#;
        let parsed: ExportBundle = serde_json::from_str(json).unwrap();
        assert!(parsed.stores["counter"].history.is_none());
    }
}
