// ABOUTME: SQLite-backed StoreBackend with two tables: stores (one row per named store) and exports (append-only).
// ABOUTME: WAL journal mode, upsert-per-row atomicity, timestamp-indexed reverse-chronological export listing.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};
use statevault_core::record::{HistoryEntry, PersistedRecord};
use tokio::sync::Mutex;

use crate::backend::{BackendError, ExportMeta, NewExport, StoreBackend, StoreMeta};

/// A SQLite-backed durable store. Every trait operation is a single-row
/// transaction; concurrent writers to the same row race last-commit-wins at
/// the application level.
pub struct SqliteBackend {
    conn: Mutex<Connection>,
}

impl SqliteBackend {
    /// Open or create a database at the given path and run migrations.
    pub fn open(path: &Path) -> Result<Self, BackendError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database, mostly useful for tests.
    pub fn in_memory() -> Result<Self, BackendError> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn init_schema(conn: &Connection) -> Result<(), BackendError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS stores (
                name TEXT PRIMARY KEY,
                state TEXT NOT NULL,
                version INTEGER NOT NULL,
                history TEXT NOT NULL,
                last_saved TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS exports (
                export_id INTEGER PRIMARY KEY AUTOINCREMENT,
                created_at TEXT NOT NULL,
                store_names TEXT NOT NULL,
                encrypted INTEGER NOT NULL,
                blob TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS exports_created_at ON exports(created_at);",
        )?;
        Ok(())
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, BackendError> {
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

#[async_trait]
impl StoreBackend for SqliteBackend {
    async fn get(&self, name: &str) -> Result<Option<PersistedRecord>, BackendError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT state, version, history, last_saved FROM stores WHERE name = ?1")?;

        let result = stmt.query_row(params![name], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        });

        match result {
            Ok((state, version, history, last_saved)) => {
                let history: Vec<HistoryEntry> = serde_json::from_str(&history)?;
                Ok(Some(PersistedRecord {
                    state,
                    version: version as u32,
                    history,
                    last_saved: parse_timestamp(&last_saved)?,
                }))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn set(&self, name: &str, record: &PersistedRecord) -> Result<(), BackendError> {
        let history = serde_json::to_string(&record.history)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO stores (name, state, version, history, last_saved)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(name) DO UPDATE SET
                state = excluded.state,
                version = excluded.version,
                history = excluded.history,
                last_saved = excluded.last_saved",
            params![
                name,
                record.state,
                record.version,
                history,
                record.last_saved.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, name: &str) -> Result<(), BackendError> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM stores WHERE name = ?1", params![name])?;
        Ok(())
    }

    async fn list_stores(&self) -> Result<Vec<StoreMeta>, BackendError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn
            .prepare("SELECT name, version, history, last_saved FROM stores ORDER BY name ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut stores = Vec::new();
        for row in rows {
            let (name, version, history, last_saved) = row?;
            let history: Vec<HistoryEntry> = serde_json::from_str(&history)?;
            stores.push(StoreMeta {
                name,
                version: version as u32,
                last_saved: parse_timestamp(&last_saved)?,
                history_len: history.len(),
            });
        }
        Ok(stores)
    }

    async fn save_export(&self, export: &NewExport) -> Result<i64, BackendError> {
        let store_names = serde_json::to_string(&export.stores)?;
        let conn = self.conn.lock().await;
        conn.execute(
            "INSERT INTO exports (created_at, store_names, encrypted, blob)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                export.timestamp.to_rfc3339(),
                store_names,
                export.encrypted,
                export.blob,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    async fn list_exports(&self, limit: usize) -> Result<Vec<ExportMeta>, BackendError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT export_id, created_at, store_names, encrypted FROM exports
             ORDER BY created_at DESC, export_id DESC LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, bool>(3)?,
            ))
        })?;

        let mut exports = Vec::new();
        for row in rows {
            let (id, created_at, store_names, encrypted) = row?;
            exports.push(ExportMeta {
                id,
                timestamp: parse_timestamp(&created_at)?,
                stores: serde_json::from_str(&store_names)?,
                encrypted,
            });
        }
        Ok(exports)
    }

    async fn get_export(&self, id: i64) -> Result<Option<String>, BackendError> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT blob FROM exports WHERE export_id = ?1")?;

        match stmt.query_row(params![id], |row| row.get::<_, String>(0)) {
            Ok(blob) => Ok(Some(blob)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
