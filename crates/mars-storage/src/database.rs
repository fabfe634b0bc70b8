//! SQLite-backed transaction storage.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use mars_core::Transaction;
use tracing::info;

use crate::error::{Result, StorageError};
use crate::pool::ConnectionPool;
use crate::repository::TransactionsRepo;
use crate::sink::Storage;

/// Persistent transaction store.
#[derive(Clone)]
pub struct Database {
    pool: ConnectionPool,
}

impl Database {
    /// Create a new database in the default app data directory.
    pub fn new() -> Result<Self> {
        Self::with_path(Self::default_db_path()?)
    }

    /// Create a new database at a specific path.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!("Opening database at: {:?}", path);
        let pool = ConnectionPool::new(&path)?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let pool = ConnectionPool::in_memory()?;
        Ok(Self { pool })
    }

    /// Get the default database path.
    pub fn default_db_path() -> Result<PathBuf> {
        let proj_dirs = ProjectDirs::from("", "mars", "mars")
            .ok_or_else(|| StorageError::Config("Could not determine app data directory".into()))?;

        Ok(proj_dirs.data_dir().join("mars.db"))
    }

    /// Count stored transactions.
    pub fn count(&self) -> Result<i64> {
        self.pool.read(TransactionsRepo::count)
    }

    /// Delete transactions started before `before`.
    pub fn prune(&self, before: DateTime<Utc>) -> Result<i64> {
        self.pool.write(|tx| TransactionsRepo::delete_older_than(tx, before))
    }
}

impl Storage for Database {
    fn get(&self, id: &str) -> Result<Transaction> {
        let row_id: i64 = id
            .parse()
            .map_err(|_| StorageError::NotFound(id.to_string()))?;

        self.pool
            .read(|conn| TransactionsRepo::get_by_id(conn, row_id))?
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn put(&self, tx: &mut Transaction) -> Result<()> {
        let id = self.pool.write(|sql_tx| TransactionsRepo::insert(sql_tx, &*tx))?;
        tx.id = id.to_string();
        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<Transaction>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.pool.read(|conn| TransactionsRepo::get_recent(conn, limit))
    }
}
