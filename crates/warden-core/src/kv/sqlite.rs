//! Embedded KV backend on `SQLite`.
//!
//! A single `kv` table keyed by path; WAL journaling for crash safety.
//! The `.mutable` marker lives in a one-row `meta` table so an offline
//! copy of the database carries its writability with it.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OptionalExtension, params};

use super::{
    EventDispatcher, EventSink, KvStore, StoreCapability, glob_match, validate_key,
};
use crate::config::ServerConfig;
use crate::context::OpContext;
use crate::errors::{Error, Result};

const DB_FILE: &str = "warden.db";

/// SQLite-backed store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    mutable: bool,
    events: EventDispatcher,
}

impl SqliteStore {
    /// Opens (initializing if absent) the database at `path`.
    ///
    /// A brand-new database receives the `.mutable` marker row.
    ///
    /// # Errors
    ///
    /// Fails when the database cannot be opened or its schema created.
    pub fn open(path: &Path) -> Result<Self> {
        let fresh = !path.exists();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::internal(format!("cannot create db directory: {e}")))?;
        }
        let conn = Connection::open(path)
            .map_err(|e| Error::internal(format!("cannot open database: {e}")))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::internal(format!("cannot enable WAL: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 key   TEXT PRIMARY KEY,
                 value BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS meta (
                 name  TEXT PRIMARY KEY
             );",
        )
        .map_err(|e| Error::internal(format!("cannot create schema: {e}")))?;

        if fresh {
            conn.execute("INSERT OR IGNORE INTO meta (name) VALUES ('.mutable')", [])
                .map_err(|e| Error::internal(format!("cannot mark fresh db mutable: {e}")))?;
            tracing::info!(db = %path.display(), "initialized fresh database");
        }

        let mutable: bool = conn
            .query_row(
                "SELECT 1 FROM meta WHERE name = '.mutable'",
                [],
                |_| Ok(true),
            )
            .optional()
            .map_err(|e| Error::internal(format!("cannot read mutable marker: {e}")))?
            .unwrap_or(false);
        if !mutable {
            tracing::warn!(db = %path.display(), "database lacks .mutable marker");
        }

        Ok(Self {
            conn: Mutex::new(conn),
            mutable,
            events: EventDispatcher::default(),
        })
    }

    /// Opens an in-memory database. Test aid.
    ///
    /// # Errors
    ///
    /// Fails when the schema cannot be created.
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| Error::internal(format!("cannot open database: {e}")))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                 key   TEXT PRIMARY KEY,
                 value BLOB NOT NULL
             );
             CREATE TABLE IF NOT EXISTS meta (
                 name  TEXT PRIMARY KEY
             );
             INSERT INTO meta (name) VALUES ('.mutable');",
        )
        .map_err(|e| Error::internal(format!("cannot create schema: {e}")))?;
        Ok(Self {
            conn: Mutex::new(conn),
            mutable: true,
            events: EventDispatcher::default(),
        })
    }

    /// Registered factory for the `sqlite` backend; the database file is
    /// `<core.home>/warden.db`.
    ///
    /// # Errors
    ///
    /// Propagates [`Self::open`] failures.
    pub fn factory(config: &ServerConfig) -> Result<Arc<dyn KvStore>> {
        Ok(Arc::new(Self::open(&config.core.home.join(DB_FILE))?))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::internal("database lock poisoned"))
    }
}

impl KvStore for SqliteStore {
    fn put(&self, ctx: &OpContext, key: &str, value: &[u8]) -> Result<()> {
        ctx.check()?;
        validate_key(key)?;
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO kv (key, value) VALUES (?1, ?2)
                 ON CONFLICT (key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )
            .map_err(|e| Error::internal(format!("cannot write record: {e}")))?;
        }
        self.events.notify_put(key);
        Ok(())
    }

    fn get(&self, ctx: &OpContext, key: &str) -> Result<Vec<u8>> {
        ctx.check()?;
        validate_key(key)?;
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM kv WHERE key = ?1",
            params![key],
            |row| row.get::<_, Vec<u8>>(0),
        )
        .optional()
        .map_err(|e| Error::internal(format!("cannot read record: {e}")))?
        .ok_or(Error::NoValue)
    }

    fn delete(&self, ctx: &OpContext, key: &str) -> Result<()> {
        ctx.check()?;
        validate_key(key)?;
        let removed = {
            let conn = self.lock()?;
            conn.execute("DELETE FROM kv WHERE key = ?1", params![key])
                .map_err(|e| Error::internal(format!("cannot delete record: {e}")))?
        };
        if removed > 0 {
            self.events.notify_delete(key);
        }
        Ok(())
    }

    fn keys(&self, ctx: &OpContext, glob: &str) -> Result<Vec<String>> {
        ctx.check()?;
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT key FROM kv ORDER BY key")
            .map_err(|e| Error::internal(format!("cannot list keys: {e}")))?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(|e| Error::internal(format!("cannot list keys: {e}")))?;
        let mut keys = Vec::new();
        for row in rows {
            let key = row.map_err(|e| Error::internal(format!("cannot list keys: {e}")))?;
            if glob_match(glob, &key) {
                keys.push(key);
            }
        }
        Ok(keys)
    }

    fn capabilities(&self) -> Vec<StoreCapability> {
        if self.mutable {
            vec![StoreCapability::Mutable]
        } else {
            Vec::new()
        }
    }

    fn set_event_sink(&self, sink: EventSink) {
        self.events.set_sink(sink);
    }

    fn close(&self) -> Result<()> {
        let conn = self.lock()?;
        // Fold the WAL back into the main file. In-memory databases have
        // no WAL; the checkpoint is a no-op there.
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .optional()
            .map_err(|e| Error::internal(format!("cannot checkpoint database: {e}")))?;
        Ok(())
    }
}
