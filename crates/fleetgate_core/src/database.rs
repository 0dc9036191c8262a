//! Database handle.

use parking_lot::Mutex;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::error::CoreResult;
use crate::schema;

/// A shared handle to the fleetgate store.
///
/// Cloning the handle shares the underlying connection. Separate calls to
/// [`Database::open`] on the same file get separate connections, which
/// SQLite serializes through its own file locks; that is how several
/// server instances share one store.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
    config: StoreConfig,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Database {
    /// Opens (creating if needed) the store described by `config`.
    pub fn open(config: StoreConfig) -> CoreResult<Self> {
        let conn = match &config.path {
            Some(path) => Connection::open(path)?,
            None => Connection::open_in_memory()?,
        };
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        if !config.is_in_memory() {
            let mode: String =
                conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            tracing::debug!(journal_mode = %mode, "configured journal");
        }
        schema::bootstrap(&conn)?;

        tracing::info!(
            path = ?config.path,
            in_memory = config.is_in_memory(),
            "opened store"
        );

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            config,
        })
    }

    /// Opens a private in-memory store.
    pub fn open_in_memory() -> CoreResult<Self> {
        Self::open(StoreConfig::new())
    }

    /// Returns the configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Runs `f` against the connection outside an explicit transaction.
    pub fn read<T>(&self, f: impl FnOnce(&Connection) -> CoreResult<T>) -> CoreResult<T> {
        let conn = self.conn.lock();
        f(&conn)
    }

    /// Runs `f` inside an immediate transaction.
    ///
    /// The write lock is taken at `BEGIN`, so no other connection can
    /// interleave between what `f` reads and what it writes. The
    /// transaction commits if `f` succeeds and rolls back otherwise.
    pub fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> CoreResult<T>) -> CoreResult<T> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }
}
