//! Transactions repository.

use chrono::{DateTime, Utc};
use mars_core::Transaction;
use rusqlite::{params, Connection, OptionalExtension, Transaction as SqlTransaction};

use crate::error::{Result, StorageError};

/// Repository for transaction operations.
pub struct TransactionsRepo;

impl TransactionsRepo {
    /// Insert a transaction and return its row id.
    ///
    /// The stored payload carries the assigned id, so the row is written in
    /// two statements; both run inside the caller's SQL transaction.
    pub fn insert(conn: &SqlTransaction<'_>, tx: &Transaction) -> Result<i64> {
        conn.execute(
            "INSERT INTO transactions (client_ip, server_ip, method, url, status, error, started_at, duration_ms, payload)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, '')",
            params![
                tx.client_ip,
                tx.server_ip,
                tx.request.method,
                tx.request.url,
                tx.status(),
                tx.error(),
                tx.start_time.to_rfc3339(),
                i64::try_from(tx.duration.as_millis()).unwrap_or(i64::MAX),
            ],
        )?;
        let id = conn.last_insert_rowid();

        let mut stored = tx.clone();
        stored.id = id.to_string();
        conn.execute(
            "UPDATE transactions SET payload = ?1 WHERE id = ?2",
            params![serde_json::to_string(&stored)?, id],
        )?;

        Ok(id)
    }

    /// Get a transaction by row id.
    pub fn get_by_id(conn: &Connection, id: i64) -> Result<Option<Transaction>> {
        let payload: Option<String> = conn
            .query_row(
                "SELECT payload FROM transactions WHERE id = ?1",
                [id],
                |row| row.get(0),
            )
            .optional()?;

        payload
            .map(|json| serde_json::from_str::<Transaction>(&json).map_err(StorageError::from))
            .transpose()
    }

    /// Get the most recent transactions, newest first.
    pub fn get_recent(conn: &Connection, limit: i64) -> Result<Vec<Transaction>> {
        let mut stmt =
            conn.prepare("SELECT payload FROM transactions ORDER BY id DESC LIMIT ?1")?;

        let transactions = stmt
            .query_map([limit], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|json| serde_json::from_str(&json).ok())
            .collect();

        Ok(transactions)
    }

    /// Count stored transactions.
    pub fn count(conn: &Connection) -> Result<i64> {
        let count: i64 =
            conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Delete transactions started before a given time.
    pub fn delete_older_than(conn: &Connection, before: DateTime<Utc>) -> Result<i64> {
        let deleted = conn.execute(
            "DELETE FROM transactions WHERE started_at < ?1",
            [before.to_rfc3339()],
        )?;
        Ok(deleted as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::sample_transaction;
    use crate::schema::run_migrations;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn insert(conn: &Connection, tx: &Transaction) -> Result<i64> {
        let sql_tx = conn.unchecked_transaction()?;
        let id = TransactionsRepo::insert(&sql_tx, tx)?;
        sql_tx.commit()?;
        Ok(id)
    }

    #[test]
    fn test_insert_and_get() {
        let conn = setup_db();
        let tx = sample_transaction("http://a.test/one");

        let id = insert(&conn, &tx).unwrap();
        let loaded = TransactionsRepo::get_by_id(&conn, id).unwrap().unwrap();

        assert_eq!(loaded.id, id.to_string());
        assert_eq!(loaded.request, tx.request);
        assert_eq!(loaded.response, tx.response);
    }

    #[test]
    fn test_get_missing() {
        let conn = setup_db();
        assert!(TransactionsRepo::get_by_id(&conn, 99).unwrap().is_none());
    }

    #[test]
    fn test_recent_is_newest_first() {
        let conn = setup_db();
        for n in 0..3 {
            let tx = sample_transaction(&format!("http://a.test/{}", n));
            insert(&conn, &tx).unwrap();
        }

        let recent = TransactionsRepo::get_recent(&conn, 2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].request.url, "http://a.test/2");
        assert_eq!(recent[1].request.url, "http://a.test/1");
        assert_eq!(TransactionsRepo::count(&conn).unwrap(), 3);
    }

    #[test]
    fn test_delete_older_than() {
        let conn = setup_db();
        let mut old = sample_transaction("http://a.test/old");
        old.start_time = Utc::now() - chrono::Duration::days(10);
        insert(&conn, &old).unwrap();
        insert(&conn, &sample_transaction("http://a.test/new")).unwrap();

        let deleted =
            TransactionsRepo::delete_older_than(&conn, Utc::now() - chrono::Duration::days(1))
                .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(TransactionsRepo::count(&conn).unwrap(), 1);
    }

    #[test]
    fn test_insert_is_all_or_nothing() {
        let conn = setup_db();
        conn.execute_batch(
            "CREATE TRIGGER reject_payload BEFORE UPDATE OF payload ON transactions
             BEGIN SELECT RAISE(ABORT, 'payload rejected'); END;",
        )
        .unwrap();

        assert!(insert(&conn, &sample_transaction("http://a.test/")).is_err());

        assert_eq!(TransactionsRepo::count(&conn).unwrap(), 0);
        assert!(TransactionsRepo::get_recent(&conn, 10).unwrap().is_empty());
    }
}
