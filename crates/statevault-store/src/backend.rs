// ABOUTME: The StoreBackend trait — transactional key-value persistence for named stores plus an exports log.
// ABOUTME: All operations are async, single-row atomic, and fail with BackendError on I/O problems.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statevault_core::record::PersistedRecord;
use thiserror::Error;

/// Errors that can occur during backend operations. The engine treats all of
/// these as "storage unavailable" on background paths: logged, never thrown
/// into the caller's state-mutation code.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("corrupt record: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("corrupt timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A new entry for the append-only exports log.
#[derive(Debug, Clone)]
pub struct NewExport {
    pub blob: String,
    pub stores: Vec<String>,
    pub encrypted: bool,
    pub timestamp: DateTime<Utc>,
}

/// Metadata describing one logged export, returned newest-first by
/// `list_exports`. The blob itself is retrieved separately via `get_export`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMeta {
    pub id: i64,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub stores: Vec<String>,
    pub encrypted: bool,
}

/// Summary of one persisted store row, for inspection tooling.
#[derive(Debug, Clone)]
pub struct StoreMeta {
    pub name: String,
    pub version: u32,
    pub last_saved: DateTime<Utc>,
    pub history_len: usize,
}

/// Transactional persistence for named store records and an append-only
/// exports log. There is no cross-store transaction: a crash between saving
/// store A and store B leaves B unsaved but never leaves a row half-written.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Fetch the record for a named store, or `None` if it was never saved.
    async fn get(&self, name: &str) -> Result<Option<PersistedRecord>, BackendError>;

    /// Atomically write (insert or overwrite) the record for a named store.
    async fn set(&self, name: &str, record: &PersistedRecord) -> Result<(), BackendError>;

    /// Delete the record for a named store. Deleting a missing row is a no-op.
    async fn delete(&self, name: &str) -> Result<(), BackendError>;

    /// List all persisted store rows.
    async fn list_stores(&self) -> Result<Vec<StoreMeta>, BackendError>;

    /// Append an export to the log, returning its id.
    async fn save_export(&self, export: &NewExport) -> Result<i64, BackendError>;

    /// List logged exports, newest first, up to `limit`.
    async fn list_exports(&self, limit: usize) -> Result<Vec<ExportMeta>, BackendError>;

    /// Retrieve a previously logged export blob by id.
    async fn get_export(&self, id: i64) -> Result<Option<String>, BackendError>;
}
