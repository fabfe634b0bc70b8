//! Database repositories for each table.

pub mod transactions;

pub use transactions::TransactionsRepo;
