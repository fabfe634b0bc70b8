//! Bounded in-memory transaction history.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};

use mars_core::Transaction;
use parking_lot::RwLock;

use crate::error::{Result, StorageError};
use crate::sink::Storage;

/// Default number of transactions kept in memory.
pub const DEFAULT_CAPACITY: usize = 1000;

/// In-memory storage that keeps the most recent `capacity` transactions.
pub struct MemoryStorage {
    inner: RwLock<Inner>,
    next_id: AtomicU64,
    capacity: usize,
}

#[derive(Default)]
struct Inner {
    order: VecDeque<String>,
    entries: HashMap<String, Transaction>,
}

impl MemoryStorage {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(Inner::default()),
            next_id: AtomicU64::new(1),
            capacity: capacity.max(1),
        }
    }

    /// Number of transactions currently held.
    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Storage for MemoryStorage {
    fn get(&self, id: &str) -> Result<Transaction> {
        self.inner
            .read()
            .entries
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(id.to_string()))
    }

    fn put(&self, tx: &mut Transaction) -> Result<()> {
        tx.id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();

        let mut inner = self.inner.write();
        inner.order.push_back(tx.id.clone());
        inner.entries.insert(tx.id.clone(), tx.clone());

        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.entries.remove(&oldest);
            }
        }

        Ok(())
    }

    fn recent(&self, limit: usize) -> Result<Vec<Transaction>> {
        let inner = self.inner.read();
        Ok(inner
            .order
            .iter()
            .rev()
            .take(limit)
            .filter_map(|id| inner.entries.get(id).cloned())
            .collect())
    }
}
