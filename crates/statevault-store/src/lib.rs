// ABOUTME: Durable persistence layer for statevault, handling store records and the exports log.
// ABOUTME: Provides the StoreBackend trait with SQLite and in-memory implementations.

pub mod backend;
pub mod memory;
pub mod sqlite;

pub use backend::{BackendError, ExportMeta, NewExport, StoreBackend, StoreMeta};
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;
