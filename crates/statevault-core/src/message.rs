// ABOUTME: Ephemeral broadcast payloads exchanged between live instances over the sync channel.
// ABOUTME: Never persisted; a message missed while an instance is down is simply never seen.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cross-instance broadcast message. `state-update` carries the
/// partialized state of one store; `import-complete` tells peers to reload
/// from durable storage instead of replaying the import themselves.
/// `history-change` is reserved and currently never sent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", rename_all_fields = "camelCase")]
pub enum SyncMessage {
    StateUpdate {
        store_name: String,
        data: Value,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    ImportComplete {
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
    HistoryChange {
        store_name: String,
        #[serde(with = "chrono::serde::ts_milliseconds")]
        timestamp: DateTime<Utc>,
    },
}

impl SyncMessage {
    /// The timestamp carried by any message variant.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::StateUpdate { timestamp, .. }
            | Self::ImportComplete { timestamp }
            | Self::HistoryChange { timestamp, .. } => *timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_update_wire_shape() {
        let message = SyncMessage::StateUpdate {
            store_name: "counter".to_string(),
            data: json!({"n": 9}),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "state-update");
        assert_eq!(json["storeName"], "counter");
        assert_eq!(json["data"]["n"], 9);
        assert!(json["timestamp"].is_i64());
    }

    #[test]
    fn import_complete_round_trips() {
        let message = SyncMessage::ImportComplete { timestamp: Utc::now() };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains("\"import-complete\""));
        let parsed: SyncMessage = serde_json::from_str(&json).unwrap();
        assert!(matches!(parsed, SyncMessage::ImportComplete { .. }));
    }
}
