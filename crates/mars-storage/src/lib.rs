//! Mars Storage - transaction persistence and output sinks.
//!
//! This crate defines the two capability traits the recorder hands finished
//! transactions to, and ships implementations of both:
//!
//! - [`Storage`]: [`Database`] (SQLite) and [`MemoryStorage`] (bounded history)
//! - [`Output`]: [`LogOutput`], [`JsonLinesOutput`] and [`FanOutOutput`]
//!
//! # Example
//!
//! ```no_run
//! use mars_storage::{Database, Storage};
//!
//! let db = Database::in_memory().unwrap();
//! let recent = db.recent(20).unwrap();
//! println!("{} transactions", recent.len());
//! ```

mod database;
pub mod error;
pub mod memory;
pub mod output;
mod pool;
pub mod repository;
mod schema;
pub mod sink;

pub use database::Database;
pub use error::{Result, StorageError};
pub use memory::{MemoryStorage, DEFAULT_CAPACITY};
pub use output::{FanOutOutput, JsonLinesOutput, LogOutput};
pub use pool::ConnectionPool;
pub use repository::TransactionsRepo;
pub use sink::{Output, Storage};
