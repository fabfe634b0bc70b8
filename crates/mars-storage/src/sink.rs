//! Capability traits implemented by transaction sinks.
//!
//! The proxy calls these from many connections at once, so implementations
//! must be safe to share across threads.

use mars_core::Transaction;

use crate::error::Result;

/// Durable persistence of transactions, keyed by id.
pub trait Storage: Send + Sync {
    /// Loads a transaction by id.
    ///
    /// Returns [`StorageError::NotFound`](crate::StorageError::NotFound) when
    /// no transaction has that id.
    fn get(&self, id: &str) -> Result<Transaction>;

    /// Persists a transaction and assigns its `id`.
    fn put(&self, tx: &mut Transaction) -> Result<()>;

    /// Most recent transactions, newest first.
    fn recent(&self, _limit: usize) -> Result<Vec<Transaction>> {
        Ok(Vec::new())
    }
}

/// Streaming sink for completed transactions.
pub trait Output: Send + Sync {
    /// Emits one completed transaction.
    fn write(&self, tx: &Transaction) -> Result<()>;
}
