// ABOUTME: Orchestration core for statevault persistence.
// ABOUTME: Provides the PersistenceEngine, store registration config, and the cross-instance sync channel.

pub mod channel;
pub mod manager;
pub mod registry;

pub use channel::{ChannelError, LocalChannel, LocalHub, NullChannel, SyncChannel};
pub use manager::{EngineError, EngineOptions, PersistenceEngine};
pub use registry::{
    DeserializeFn, LabelFn, MergeFn, PartializeFn, RehydrateHook, SerializeFn, StoreConfig,
};
