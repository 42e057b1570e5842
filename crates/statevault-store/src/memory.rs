// ABOUTME: In-memory StoreBackend for tests and ephemeral use; same contract as the SQLite backend.
// ABOUTME: Keeps records in a HashMap and exports in an append-only Vec behind one mutex.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use statevault_core::record::PersistedRecord;

use crate::backend::{BackendError, ExportMeta, NewExport, StoreBackend, StoreMeta};

#[derive(Default)]
struct MemoryState {
    stores: HashMap<String, PersistedRecord>,
    exports: Vec<(i64, NewExport)>,
    next_export_id: i64,
}

/// A purely in-memory backend. Never fails; exists so the engine can be
/// tested without touching disk, per the dependency-injection design.
#[derive(Default)]
pub struct MemoryBackend {
    inner: Mutex<MemoryState>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn get(&self, name: &str) -> Result<Option<PersistedRecord>, BackendError> {
        Ok(self.inner.lock().unwrap().stores.get(name).cloned())
    }

    async fn set(&self, name: &str, record: &PersistedRecord) -> Result<(), BackendError> {
        self.inner
            .lock()
            .unwrap()
            .stores
            .insert(name.to_string(), record.clone());
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        self.inner.lock().unwrap().stores.remove(name);
        Ok(())
    }

    async fn list_stores(&self) -> Result<Vec<StoreMeta>, BackendError> {
        let inner = self.inner.lock().unwrap();
        let mut stores: Vec<StoreMeta> = inner
            .stores
            .iter()
            .map(|(name, record)| StoreMeta {
                name: name.clone(),
                version: record.version,
                last_saved: record.last_saved,
                history_len: record.history.len(),
            })
            .collect();
        stores.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(stores)
    }

    async fn save_export(&self, export: &NewExport) -> Result<i64, BackendError> {
        let mut inner = self.inner.lock().unwrap();
        inner.next_export_id += 1;
        let id = inner.next_export_id;
        inner.exports.push((id, export.clone()));
        Ok(id)
    }

    async fn list_exports(&self, limit: usize) -> Result<Vec<ExportMeta>, BackendError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .exports
            .iter()
            .rev()
            .take(limit)
            .map(|(id, export)| ExportMeta {
                id: *id,
                timestamp: export.timestamp,
                stores: export.stores.clone(),
                encrypted: export.encrypted,
            })
            .collect())
    }

    async fn get_export(&self, id: i64) -> Result<Option<String>, BackendError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .exports
            .iter()
            .find(|(export_id, _)| *export_id == id)
            .map(|(_, export)| export.blob.clone()))
    }
}
