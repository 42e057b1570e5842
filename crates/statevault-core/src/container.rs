// ABOUTME: The minimal capability interface for live in-memory state containers the engine supervises.
// ABOUTME: MemoryContainer is the reference implementation used by tests and simple applications.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use serde_json::Value;

use crate::merge::shallow_merge;

/// Identifies one change subscription so it can be removed later.
pub type SubscriptionId = u64;

/// Callback invoked with the full state after each change.
pub type ChangeListener = Box<dyn Fn(&Value) + Send + Sync>;

/// Capability interface for a live state container.
///
/// Any state-container implementation can be registered with the engine, not
/// just one particular library's store objects. Implementations must invoke
/// listeners synchronously from within `set_state`, before it returns — the
/// engine relies on this to suppress its own echo when applying persisted or
/// remote state.
pub trait StateContainer: Send + Sync {
    /// Return a clone of the current state.
    fn get_state(&self) -> Value;

    /// Replace the state (`replace = true`) or shallow-merge `next` into the
    /// current state (`replace = false`), then notify listeners.
    fn set_state(&self, next: Value, replace: bool);

    /// Register a change listener, returning an id for `unsubscribe`.
    fn subscribe(&self, listener: ChangeListener) -> SubscriptionId;

    /// Remove a previously registered listener. Unknown ids are ignored.
    fn unsubscribe(&self, id: SubscriptionId);
}

/// An in-memory state container holding an opaque JSON value.
pub struct MemoryContainer {
    state: RwLock<Value>,
    listeners: Mutex<HashMap<SubscriptionId, ChangeListener>>,
    next_id: AtomicU64,
}

impl MemoryContainer {
    pub fn new(initial: Value) -> Self {
        Self {
            state: RwLock::new(initial),
            listeners: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    fn notify(&self, state: &Value) {
        let listeners = self.listeners.lock().unwrap();
        for listener in listeners.values() {
            listener(state);
        }
    }
}

impl StateContainer for MemoryContainer {
    fn get_state(&self) -> Value {
        self.state.read().unwrap().clone()
    }

    fn set_state(&self, next: Value, replace: bool) {
        let updated = {
            let mut state = self.state.write().unwrap();
            let merged = if replace {
                next
            } else {
                shallow_merge(next, state.clone())
            };
            *state = merged.clone();
            merged
        };
        self.notify(&updated);
    }

    fn subscribe(&self, listener: ChangeListener) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().unwrap().insert(id, listener);
        id
    }

    fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners.lock().unwrap().remove(&id);
    }
}
