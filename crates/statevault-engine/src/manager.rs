// ABOUTME: The PersistenceEngine: registration, hydration, debounced saves, undo, export/import, sync.
// ABOUTME: An injected StoreBackend and SyncChannel make storage and broadcast swappable for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use statevault_core::bundle::{BUNDLE_FORMAT_VERSION, ExportBundle, ExportedStore};
use statevault_core::cipher::{self, CipherError};
use statevault_core::container::StateContainer;
use statevault_core::message::SyncMessage;
use statevault_core::record::{DEFAULT_HISTORY_LIMIT, HistoryEntry, PersistedRecord};
use statevault_store::backend::{BackendError, ExportMeta, NewExport, StoreBackend};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::channel::SyncChannel;
use crate::registry::{RehydrateHook, StoreConfig, StoreSlot, StoreStatus};

/// Default number of exports returned by `recent_exports`.
const DEFAULT_EXPORT_LIMIT: usize = 20;

/// Errors surfaced by explicitly caller-invoked engine operations.
/// Background paths (debounced saves, hydration, remote message application)
/// log these instead of throwing into application code.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("store not registered: {0}")]
    NotRegistered(String),

    #[error("store already registered: {0}")]
    AlreadyRegistered(String),

    #[error("version mismatch for {store}: persisted {persisted}, registered {registered}")]
    VersionMismatch {
        store: String,
        persisted: u32,
        registered: u32,
    },

    #[error("storage unavailable: {0}")]
    Storage(#[from] BackendError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("malformed export bundle: {0}")]
    Format(String),

    #[error("state serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Tunables for one engine instance. Defaults follow the documented
/// contract: 2s debounce, 50 history entries, 5s freshness window.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub debounce: Duration,
    pub history_limit: usize,
    pub freshness_window: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(2),
            history_limit: DEFAULT_HISTORY_LIMIT,
            freshness_window: Duration::from_secs(5),
        }
    }
}

/// A local state change observed via a container subscription, queued for
/// the engine worker.
struct ChangedState {
    store: String,
    state: Value,
}

/// The persistence engine. Owns per-store registrations and orchestrates
/// everything between live containers, the durable backend, and the sync
/// channel. Construct one per process at the composition root; clones share
/// the same engine.
#[derive(Clone)]
pub struct PersistenceEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    backend: Arc<dyn StoreBackend>,
    channel: Arc<dyn SyncChannel>,
    options: EngineOptions,
    stores: RwLock<HashMap<String, Arc<StoreSlot>>>,
    change_tx: mpsc::UnboundedSender<ChangedState>,
}

impl PersistenceEngine {
    /// Create an engine over the given backend and channel and spawn its
    /// worker task. Must be called within a tokio runtime.
    pub fn new(
        backend: Arc<dyn StoreBackend>,
        channel: Arc<dyn SyncChannel>,
        options: EngineOptions,
    ) -> Self {
        let (change_tx, change_rx) = mpsc::unbounded_channel();
        let remote_rx = channel.subscribe();

        let inner = Arc::new(EngineInner {
            backend,
            channel,
            options,
            stores: RwLock::new(HashMap::new()),
            change_tx,
        });

        tokio::spawn(worker_loop(Arc::clone(&inner), change_rx, remote_rx));

        Self { inner }
    }

    /// Register a named store: subscribe to its container's change
    /// notifications and begin a background load unless `skip_hydration`.
    pub fn register_store(
        &self,
        name: &str,
        container: Arc<dyn StateContainer>,
        config: StoreConfig,
    ) -> Result<(), EngineError> {
        let StoreConfig {
            version,
            serialize,
            deserialize,
            partialize,
            merge,
            label,
            on_rehydrate,
            skip_hydration,
        } = config;

        if self.inner.stores.read().unwrap().contains_key(name) {
            return Err(EngineError::AlreadyRegistered(name.to_string()));
        }

        let suppress = Arc::new(AtomicBool::new(false));
        let tx = self.inner.change_tx.clone();
        let listener_store = name.to_string();
        let listener_suppress = Arc::clone(&suppress);
        let subscription = container.subscribe(Box::new(move |state: &Value| {
            if listener_suppress.load(Ordering::SeqCst) {
                return;
            }
            let _ = tx.send(ChangedState {
                store: listener_store.clone(),
                state: state.clone(),
            });
        }));

        let initial = container.get_state();
        let baseline = match &partialize {
            Some(partialize) => partialize(&initial),
            None => initial,
        };

        let slot = Arc::new(StoreSlot {
            name: name.to_string(),
            version,
            container,
            serialize,
            deserialize,
            partialize,
            merge,
            label,
            status: Mutex::new(StoreStatus::Loading),
            baseline: Mutex::new(baseline),
            pending: Mutex::new(None),
            next_gen: AtomicU64::new(0),
            suppress,
            save_lock: tokio::sync::Mutex::new(()),
            subscription,
        });

        {
            let mut stores = self.inner.stores.write().unwrap();
            if stores.contains_key(name) {
                slot.container.unsubscribe(slot.subscription);
                return Err(EngineError::AlreadyRegistered(name.to_string()));
            }
            stores.insert(name.to_string(), Arc::clone(&slot));
        }

        if skip_hydration {
            *slot.status.lock().unwrap() = StoreStatus::Ready;
        } else {
            tokio::spawn(Arc::clone(&self.inner).hydrate(slot, on_rehydrate));
        }

        Ok(())
    }

    /// Pop the most recent history entry and restore the one before it.
    /// Returns `Ok(false)` when fewer than two entries exist — undo never
    /// removes the sole remaining snapshot.
    pub async fn undo(&self, name: &str) -> Result<bool, EngineError> {
        let slot = self.inner.require_slot(name)?;
        let _guard = slot.save_lock.lock().await;
        slot.cancel_pending();

        let Some(mut record) = self.inner.backend.get(name).await? else {
            return Ok(false);
        };
        if record.history.len() < 2 {
            return Ok(false);
        }

        record.history.pop();
        let Some(target) = record.history.last() else {
            return Ok(false);
        };
        record.state = target.state.clone();
        record.last_saved = Utc::now();

        let restored = (slot.deserialize)(&record.state)?;
        self.inner.backend.set(name, &record).await?;

        let merged = (slot.merge)(restored, slot.container.get_state());
        *slot.baseline.lock().unwrap() = slot.project(&merged);
        slot.apply_suppressed(merged, true);

        tracing::info!("undid last change for {name}, {} entries remain", record.history.len());
        Ok(true)
    }

    /// Always `Ok(false)`: no forward-history stack is retained, so redo is
    /// unsupported by contract rather than silently absent.
    pub async fn redo(&self, name: &str) -> Result<bool, EngineError> {
        self.inner.require_slot(name)?;
        Ok(false)
    }

    /// The persisted history for a store, oldest first. Empty if the store
    /// has never been saved.
    pub async fn history(&self, name: &str) -> Result<Vec<HistoryEntry>, EngineError> {
        self.inner.require_slot(name)?;
        Ok(self
            .inner
            .backend
            .get(name)
            .await?
            .map(|record| record.history)
            .unwrap_or_default())
    }

    /// Serialize the selected stores (default: all registered) into one
    /// bundle, optionally encrypted with `password`. The bundle is always
    /// appended to the exports log, even if the caller discards the blob.
    pub async fn export_state(
        &self,
        names: Option<&[&str]>,
        password: Option<&str>,
        include_history: bool,
    ) -> Result<String, EngineError> {
        let selected: Vec<String> = match names {
            Some(names) => {
                for name in names {
                    self.inner.require_slot(name)?;
                }
                names.iter().map(|name| name.to_string()).collect()
            }
            None => {
                let mut all: Vec<String> =
                    self.inner.stores.read().unwrap().keys().cloned().collect();
                all.sort();
                all
            }
        };

        // Drain pending debounced saves so the bundle reflects the latest
        // observed state, not the pre-burst snapshot.
        for name in &selected {
            let Some(slot) = self.inner.slot(name) else { continue };
            let pending = *slot.pending.lock().unwrap();
            if let Some(generation) = pending {
                self.inner.flush_if_current(name, generation).await;
            }
        }

        let now = Utc::now();
        let mut stores = std::collections::BTreeMap::new();
        for name in &selected {
            let Some(record) = self.inner.backend.get(name).await? else {
                continue;
            };
            stores.insert(
                name.clone(),
                ExportedStore {
                    state: record.state,
                    version: record.version,
                    last_saved: record.last_saved,
                    history: include_history.then_some(record.history),
                },
            );
        }

        let bundle = ExportBundle {
            timestamp: now,
            version: BUNDLE_FORMAT_VERSION,
            stores,
        };
        let json = serde_json::to_string(&bundle)?;

        let (blob, encrypted) = match password {
            Some(password) => (cipher::encrypt(&json, password)?, true),
            None => (json, false),
        };

        let export = NewExport {
            blob: blob.clone(),
            stores: bundle.stores.keys().cloned().collect(),
            encrypted,
            timestamp: now,
        };
        let id = self.inner.backend.save_export(&export).await?;
        tracing::info!("exported {} stores as export {id}", export.stores.len());

        Ok(blob)
    }

    /// Apply an export bundle: decrypt if a password is given, gate on the
    /// bundle format version, then per store merge-or-replace the live state
    /// and overwrite the durable record. Unregistered and version-mismatched
    /// stores are skipped; siblings proceed. Finishes by broadcasting one
    /// `import-complete` so other instances reload from durable storage.
    pub async fn import_state(
        &self,
        blob: &str,
        password: Option<&str>,
        merge: bool,
    ) -> Result<(), EngineError> {
        let text = match password {
            Some(password) => cipher::decrypt(blob, password)?,
            None => blob.to_string(),
        };

        let bundle: ExportBundle =
            serde_json::from_str(&text).map_err(|e| EngineError::Format(e.to_string()))?;
        if bundle.version != BUNDLE_FORMAT_VERSION {
            return Err(EngineError::Format(format!(
                "unsupported bundle version {}",
                bundle.version
            )));
        }

        let now = Utc::now();
        for (name, entry) in &bundle.stores {
            let Some(slot) = self.inner.slot(name) else {
                tracing::warn!("skipping unregistered store {name} in import");
                continue;
            };
            if entry.version != slot.version {
                tracing::warn!(
                    "skipping {name} in import: bundle version {} != registered {}",
                    entry.version,
                    slot.version
                );
                continue;
            }
            let imported = match (slot.deserialize)(&entry.state) {
                Ok(value) => value,
                Err(e) => {
                    tracing::warn!("skipping {name} in import: undecodable state: {e}");
                    continue;
                }
            };

            let _guard = slot.save_lock.lock().await;
            slot.cancel_pending();

            let applied = if merge {
                (slot.merge)(imported, slot.container.get_state())
            } else {
                imported
            };
            let partial = slot.project(&applied);
            let serialized = (slot.serialize)(&partial)?;

            let mut record = PersistedRecord::new(slot.version, now);
            if let Some(history) = &entry.history {
                record.history = history.clone();
            }
            record.record_save(serialized, "import", now, self.inner.options.history_limit);
            self.inner.backend.set(name, &record).await?;

            *slot.baseline.lock().unwrap() = partial;
            slot.apply_suppressed(applied, true);
        }

        let message = SyncMessage::ImportComplete { timestamp: now };
        if let Err(e) = self.inner.channel.broadcast(&message).await {
            tracing::warn!("import-complete broadcast failed: {e}");
        }

        Ok(())
    }

    /// Drop every registration and delete its durable row. The exports log
    /// is kept so prior exports remain recoverable.
    pub async fn clear_all(&self) -> Result<(), EngineError> {
        let slots: Vec<Arc<StoreSlot>> = {
            let mut stores = self.inner.stores.write().unwrap();
            stores.drain().map(|(_, slot)| slot).collect()
        };

        for slot in slots {
            slot.cancel_pending();
            slot.container.unsubscribe(slot.subscription);
            self.inner.backend.delete(&slot.name).await?;
        }
        Ok(())
    }

    /// Recently logged exports, newest first.
    pub async fn recent_exports(&self, limit: Option<usize>) -> Result<Vec<ExportMeta>, EngineError> {
        Ok(self
            .inner
            .backend
            .list_exports(limit.unwrap_or(DEFAULT_EXPORT_LIMIT))
            .await?)
    }

    /// Drain all pending debounced saves immediately. Useful before
    /// shutdown so the last burst of changes is not lost to a timer.
    pub async fn flush_all(&self) {
        let slots: Vec<Arc<StoreSlot>> = {
            self.inner.stores.read().unwrap().values().cloned().collect()
        };
        for slot in slots {
            let pending = *slot.pending.lock().unwrap();
            if let Some(generation) = pending {
                self.inner.flush_if_current(&slot.name, generation).await;
            }
        }
    }
}

impl EngineInner {
    fn slot(&self, name: &str) -> Option<Arc<StoreSlot>> {
        self.stores.read().unwrap().get(name).cloned()
    }

    fn require_slot(&self, name: &str) -> Result<Arc<StoreSlot>, EngineError> {
        self.slot(name)
            .ok_or_else(|| EngineError::NotRegistered(name.to_string()))
    }

    /// Background load at registration. Failures degrade to Ready with the
    /// container's default state; the rehydration hook sees the error.
    async fn hydrate(self: Arc<Self>, slot: Arc<StoreSlot>, hook: Option<RehydrateHook>) {
        let result = self.reload_store(&slot).await;
        *slot.status.lock().unwrap() = StoreStatus::Ready;

        match &result {
            Ok(()) => {
                tracing::debug!("rehydrated {}", slot.name);
                if let Some(hook) = hook {
                    let state = slot.container.get_state();
                    hook(Ok(&state));
                }
            }
            Err(e) => {
                tracing::warn!("rehydration failed for {}: {e}", slot.name);
                if let Some(hook) = hook {
                    hook(Err(e));
                }
            }
        }
    }

    /// Load the durable record for a store and merge it into the live
    /// container. Shared by hydration and import-complete handling. Leaves
    /// the container untouched when nothing is persisted or the version
    /// gate rejects the record.
    async fn reload_store(&self, slot: &StoreSlot) -> Result<(), EngineError> {
        let Some(record) = self.backend.get(&slot.name).await? else {
            return Ok(());
        };
        if record.version != slot.version {
            return Err(EngineError::VersionMismatch {
                store: slot.name.clone(),
                persisted: record.version,
                registered: slot.version,
            });
        }

        let persisted = (slot.deserialize)(&record.state)?;
        let merged = (slot.merge)(persisted, slot.container.get_state());
        *slot.baseline.lock().unwrap() = slot.project(&merged);
        slot.apply_suppressed(merged, true);
        Ok(())
    }

    /// React to a local container change: restart the store's debounce
    /// timer and broadcast the partialized state to other instances.
    async fn handle_local_change(self: Arc<Self>, changed: ChangedState) {
        let Some(slot) = self.slot(&changed.store) else {
            return;
        };
        if *slot.status.lock().unwrap() != StoreStatus::Ready {
            return;
        }

        let generation = slot.next_gen.fetch_add(1, Ordering::SeqCst) + 1;
        *slot.pending.lock().unwrap() = Some(generation);

        let debounce = self.options.debounce;
        let flush_inner = Arc::clone(&self);
        let flush_store = changed.store.clone();
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            flush_inner.flush_if_current(&flush_store, generation).await;
        });

        let message = SyncMessage::StateUpdate {
            store_name: changed.store.clone(),
            data: slot.project(&changed.state),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.channel.broadcast(&message).await {
            tracing::warn!("state-update broadcast failed for {}: {e}", changed.store);
        }
    }

    /// Run the debounced save if this timer generation is still current.
    /// A generation mismatch means a newer change superseded the timer.
    async fn flush_if_current(&self, name: &str, generation: u64) {
        let Some(slot) = self.slot(name) else {
            return;
        };
        let _guard = slot.save_lock.lock().await;
        {
            let mut pending = slot.pending.lock().unwrap();
            if *pending != Some(generation) {
                return;
            }
            *pending = None;
        }

        if let Err(e) = self.save_store(&slot).await {
            tracing::warn!("debounced save failed for {name}: {e}");
        }
    }

    /// Durably write the store's current state, appending one history entry
    /// labeled from the baseline-to-now transition.
    async fn save_store(&self, slot: &StoreSlot) -> Result<(), EngineError> {
        let current = slot.project(&slot.container.get_state());
        let serialized = (slot.serialize)(&current)?;
        let action = {
            let baseline = slot.baseline.lock().unwrap();
            (slot.label)(&baseline, &current)
        };

        let now = Utc::now();
        let mut record = match self.backend.get(&slot.name).await? {
            Some(existing) if existing.version == slot.version => existing,
            // Missing or version-bumped: start a fresh record.
            _ => PersistedRecord::new(slot.version, now),
        };
        record.record_save(serialized, action, now, self.options.history_limit);
        self.backend.set(&slot.name, &record).await?;

        *slot.baseline.lock().unwrap() = current;
        tracing::debug!("saved {} ({} history entries)", slot.name, record.history.len());
        Ok(())
    }

    /// Apply a message from another instance.
    async fn handle_remote(self: Arc<Self>, message: SyncMessage) {
        match message {
            SyncMessage::StateUpdate {
                store_name,
                data,
                timestamp,
            } => {
                let Some(slot) = self.slot(&store_name) else {
                    return;
                };
                if *slot.status.lock().unwrap() != StoreStatus::Ready {
                    return;
                }
                if slot.pending.lock().unwrap().is_some() {
                    tracing::debug!(
                        "ignoring remote update for {store_name}: local save pending"
                    );
                    return;
                }
                let age = Utc::now().signed_duration_since(timestamp);
                let window = chrono::Duration::from_std(self.options.freshness_window)
                    .unwrap_or_else(|_| chrono::Duration::seconds(5));
                if age > window {
                    tracing::debug!("discarding stale remote update for {store_name}");
                    return;
                }

                let merged = (slot.merge)(data, slot.container.get_state());
                *slot.baseline.lock().unwrap() = slot.project(&merged);
                slot.apply_suppressed(merged, true);
            }

            SyncMessage::ImportComplete { .. } => {
                let slots: Vec<Arc<StoreSlot>> =
                    { self.stores.read().unwrap().values().cloned().collect() };
                for slot in slots {
                    if let Err(e) = self.reload_store(&slot).await {
                        tracing::warn!("reload after import failed for {}: {e}", slot.name);
                    }
                }
            }

            SyncMessage::HistoryChange { .. } => {}
        }
    }
}

/// Multiplexes local change notifications and remote channel messages into
/// the engine. Runs until the engine (and every container subscription
/// holding a change sender) is gone.
async fn worker_loop(
    inner: Arc<EngineInner>,
    mut change_rx: mpsc::UnboundedReceiver<ChangedState>,
    mut remote_rx: mpsc::UnboundedReceiver<SyncMessage>,
) {
    let mut remote_open = true;
    loop {
        tokio::select! {
            changed = change_rx.recv() => match changed {
                Some(changed) => Arc::clone(&inner).handle_local_change(changed).await,
                None => break,
            },
            message = remote_rx.recv(), if remote_open => match message {
                Some(message) => Arc::clone(&inner).handle_remote(message).await,
                None => remote_open = false,
            },
        }
    }
}
