// ABOUTME: Defines PersistedRecord and HistoryEntry, the durable representation of one named store.
// ABOUTME: History is bounded with FIFO eviction; the last entry always mirrors the current state blob.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default bound on the number of history entries kept per store.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

/// One point-in-time snapshot of a store's serialized state.
/// Created only by successful durable writes and never mutated afterwards;
/// undo consumes entries from the back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub state: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub action: String,
}

/// The durable representation of one named store: the current serialized
/// snapshot plus a bounded history of prior snapshots.
///
/// Invariant: after at least one save, `history` is non-empty and its last
/// entry's `state` equals the top-level `state` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedRecord {
    pub state: String,
    pub version: u32,
    pub history: Vec<HistoryEntry>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_saved: DateTime<Utc>,
}

impl PersistedRecord {
    /// Create an empty record for a store that has not been saved yet.
    /// Callers must follow up with [`record_save`](Self::record_save) before
    /// persisting, which establishes the history invariant.
    pub fn new(version: u32, now: DateTime<Utc>) -> Self {
        Self {
            state: String::new(),
            version,
            history: Vec::new(),
            last_saved: now,
        }
    }

    /// Apply one durable save: set the current state, stamp `last_saved`,
    /// and append a history entry, evicting the oldest entries past `limit`.
    /// Eviction is FIFO — undo cares about recency of creation, not access.
    pub fn record_save(
        &mut self,
        state: String,
        action: impl Into<String>,
        now: DateTime<Utc>,
        limit: usize,
    ) {
        self.history.push(HistoryEntry {
            state: state.clone(),
            timestamp: now,
            action: action.into(),
        });
        while self.history.len() > limit {
            self.history.remove(0);
        }
        self.state = state;
        self.last_saved = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with_saves(n: usize, limit: usize) -> PersistedRecord {
        let mut record = PersistedRecord::new(1, Utc::now());
        for i in 0..n {
            record.record_save(format!("{{\"n\":{i}}}"), format!("save_{i}"), Utc::now(), limit);
        }
        record
    }

    #[test]
    fn record_save_keeps_last_entry_in_sync_with_state() {
        let record = record_with_saves(3, 50);
        assert_eq!(record.history.len(), 3);
        assert_eq!(record.history.last().unwrap().state, record.state);
        assert_eq!(record.state, "{\"n\":2}");
    }

    #[test]
    fn record_save_evicts_oldest_first() {
        let record = record_with_saves(7, 5);
        assert_eq!(record.history.len(), 5);
        // The two oldest saves fell off the front.
        assert_eq!(record.history[0].action, "save_2");
        assert_eq!(record.history.last().unwrap().action, "save_6");
        assert_eq!(record.history.last().unwrap().state, record.state);
    }

    #[test]
    fn history_serializes_with_camel_case_and_millis() {
        let record = record_with_saves(1, 50);
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["lastSaved"].is_i64(), "lastSaved should be epoch millis");
        assert!(json["history"][0]["timestamp"].is_i64());
        assert_eq!(json["history"][0]["action"], "save_0");
    }
}
