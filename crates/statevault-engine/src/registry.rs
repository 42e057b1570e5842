// ABOUTME: Per-store registration config and the engine's internal slot bookkeeping.
// ABOUTME: Slots carry the callbacks, debounce generation counters, and the echo-suppression flag.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use statevault_core::container::{StateContainer, SubscriptionId};
use statevault_core::label::diff_label;
use statevault_core::merge::shallow_merge;

use crate::manager::EngineError;

/// Converts an in-memory state projection to its durable string form.
pub type SerializeFn = Arc<dyn Fn(&Value) -> Result<String, serde_json::Error> + Send + Sync>;

/// Parses a durable string blob back into a state value.
pub type DeserializeFn = Arc<dyn Fn(&str) -> Result<Value, serde_json::Error> + Send + Sync>;

/// Projects the subset of state that gets persisted, excluding ephemeral
/// or derived fields.
pub type PartializeFn = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Combines `(persisted, current)` into the state to adopt, applied at
/// rehydration and at remote-update application.
pub type MergeFn = Arc<dyn Fn(Value, Value) -> Value + Send + Sync>;

/// Derives a history action label from a `(prev, next)` state transition.
pub type LabelFn = Arc<dyn Fn(&Value, &Value) -> String + Send + Sync>;

/// Invoked once after the first load attempt, with the rehydrated state or
/// the error that prevented rehydration.
pub type RehydrateHook = Box<dyn FnOnce(Result<&Value, &EngineError>) + Send>;

/// Configuration for one named store registration.
pub struct StoreConfig {
    /// Schema version; a persisted or imported record with a different
    /// version is skipped rather than silently misinterpreted.
    pub version: u32,
    pub serialize: SerializeFn,
    pub deserialize: DeserializeFn,
    pub partialize: Option<PartializeFn>,
    pub merge: MergeFn,
    /// Swappable labeling strategy for history entries.
    pub label: LabelFn,
    pub on_rehydrate: Option<RehydrateHook>,
    /// Skip the background load at registration; the store starts Ready
    /// with whatever state the container already holds.
    pub skip_hydration: bool,
}

impl StoreConfig {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            serialize: Arc::new(|state: &Value| serde_json::to_string(state)),
            deserialize: Arc::new(|blob: &str| serde_json::from_str(blob)),
            partialize: None,
            merge: Arc::new(shallow_merge),
            label: Arc::new(diff_label),
            on_rehydrate: None,
            skip_hydration: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Lifecycle of a registered store. Loading runs exactly once at
/// registration; Ready is the steady state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StoreStatus {
    Loading,
    Ready,
}

/// Internal bookkeeping for one registered store.
pub(crate) struct StoreSlot {
    pub name: String,
    pub version: u32,
    pub container: Arc<dyn StateContainer>,
    pub serialize: SerializeFn,
    pub deserialize: DeserializeFn,
    pub partialize: Option<PartializeFn>,
    pub merge: MergeFn,
    pub label: LabelFn,
    pub status: Mutex<StoreStatus>,
    /// Partialized state as of the last completed save or hydration; the
    /// action label for a debounced burst is computed against this.
    pub baseline: Mutex<Value>,
    /// Generation of the currently pending debounce timer, if any. A timer
    /// that wakes to find a different generation was superseded and exits.
    pub pending: Mutex<Option<u64>>,
    pub next_gen: AtomicU64,
    /// Set while the engine applies persisted or remote state to the
    /// container, so the change listener does not echo it back as a local
    /// edit.
    pub suppress: Arc<AtomicBool>,
    /// Serializes durable writes for this store across debounce flushes,
    /// undo, and import.
    pub save_lock: tokio::sync::Mutex<()>,
    pub subscription: SubscriptionId,
}

impl StoreSlot {
    /// Apply the partialize projection, if configured.
    pub fn project(&self, state: &Value) -> Value {
        match &self.partialize {
            Some(partialize) => partialize(state),
            None => state.clone(),
        }
    }

    /// Write state into the container without triggering the engine's own
    /// change listener.
    pub fn apply_suppressed(&self, next: Value, replace: bool) {
        self.suppress.store(true, Ordering::SeqCst);
        self.container.set_state(next, replace);
        self.suppress.store(false, Ordering::SeqCst);
    }

    /// Cancel any pending debounce timer for this store.
    pub fn cancel_pending(&self) {
        *self.pending.lock().unwrap() = None;
    }
}
