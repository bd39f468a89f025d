//! SQLite storage layer for transfer records, contract interactions and
//! flagged clusters.
//!
//! Uses WAL mode and prepared statements inside transactions. Every public
//! method is transactional on its own; the pipeline sequences calls but
//! never spans a transaction across them.

use eyre::{Context, Result};
use rusqlite::{Connection, OptionalExtension, Row};
use std::cell::RefCell;

use crate::types::{SuspiciousClusterRow, TransferEvent, TransferRecord};

/// Storage operations the detection pipeline depends on.
///
/// [`Store`] is the SQLite implementation; tests substitute failing or
/// recording doubles.
pub trait TransferStore {
    /// Persist a raw transfer (and its contract call, if any). Returns the row id.
    fn persist_transfer(&self, event: &TransferEvent) -> Result<i64>;

    /// Oldest unprocessed transfers, at most `limit`.
    fn query_unprocessed_transfers(&self, limit: usize) -> Result<Vec<TransferRecord>>;

    /// Flip `processed` to true for the given ids. Already-processed rows are left alone.
    fn mark_processed(&self, ids: &[i64]) -> Result<usize>;

    /// Persist every (community, account) pair of the flagged clusters.
    fn persist_suspicious_clusters(&self, rows: &[(u64, String)]) -> Result<usize>;

    /// Persist a single (community, account) pair.
    fn persist_suspicious_cluster(&self, community_id: u64, account: &str) -> Result<usize> {
        self.persist_suspicious_clusters(&[(community_id, account.to_string())])
    }

    /// Delete the `n` oldest processed transfers, returning what was deleted.
    fn delete_oldest_transfers(&self, n: usize) -> Result<Vec<TransferRecord>>;

    /// Delete the `n` oldest contract interaction records.
    fn delete_oldest_contract_records(&self, n: usize) -> Result<usize>;

    /// Number of transfers with `processed = true`.
    fn count_processed_transfers(&self) -> Result<usize>;

    /// Number of contract interaction records.
    fn count_contract_records(&self) -> Result<usize>;
}

pub struct Store {
    conn: RefCell<Connection>,
}

impl Store {
    /// Creates or opens a SQLite database with WAL mode enabled.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrations fail.
    pub fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        let store = Self {
            conn: RefCell::new(conn),
        };
        store.run_migrations()?;
        tracing::debug!(path, "opened transfer store");
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        self.conn.borrow_mut().execute_batch(
            "
            CREATE TABLE IF NOT EXISTS transfers (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_hash TEXT NOT NULL,
                block_number INTEGER,
                timestamp INTEGER,
                from_address TEXT NOT NULL,
                to_address TEXT NOT NULL,
                amount REAL NOT NULL,
                processed INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS transfers_processed_idx
                ON transfers (processed, id);

            CREATE TABLE IF NOT EXISTS contract_interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                tx_hash TEXT NOT NULL,
                caller TEXT NOT NULL,
                contract TEXT NOT NULL,
                selector TEXT,
                timestamp INTEGER
            );

            CREATE TABLE IF NOT EXISTS suspicious_clusters (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                community_id INTEGER NOT NULL,
                account TEXT NOT NULL,
                flagged_at TEXT NOT NULL,
                UNIQUE (community_id, account)
            );
            ",
        )?;
        Ok(())
    }

    /// Number of transfers still waiting to be folded into the graph.
    pub fn count_unprocessed_transfers(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM transfers WHERE processed = 0")
    }

    /// All persisted suspicious cluster rows, grouped by community.
    pub fn suspicious_clusters(&self) -> Result<Vec<SuspiciousClusterRow>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "SELECT community_id, account, flagged_at FROM suspicious_clusters
             ORDER BY community_id, account",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(SuspiciousClusterRow {
                    community_id: row.get(0)?,
                    account: row.get(1)?,
                    flagged_at: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Look up one transfer by row id.
    pub fn get_transfer(&self, id: i64) -> Result<Option<TransferRecord>> {
        let conn = self.conn.borrow();
        let record = conn
            .query_row(
                "SELECT id, tx_hash, block_number, timestamp, from_address, to_address,
                        amount, processed
                 FROM transfers WHERE id = ?",
                rusqlite::params![id],
                row_to_transfer,
            )
            .optional()?;
        Ok(record)
    }

    fn count(&self, sql: &str) -> Result<usize> {
        let count: i64 = self.conn.borrow().query_row(sql, [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}

impl TransferStore for Store {
    fn persist_transfer(&self, event: &TransferEvent) -> Result<i64> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        tx.execute(
            "
            INSERT INTO transfers (
                tx_hash, block_number, timestamp, from_address, to_address, amount, processed
            ) VALUES (?, ?, ?, ?, ?, ?, 0)
            ",
            rusqlite::params![
                event.tx_hash,
                event.block_number,
                event.timestamp,
                event.from,
                event.to,
                event.amount,
            ],
        )
        .wrap_err("failed to insert transfer")?;
        let id = tx.last_insert_rowid();

        if let Some(call) = &event.contract_call {
            tx.execute(
                "
                INSERT INTO contract_interactions (tx_hash, caller, contract, selector, timestamp)
                VALUES (?, ?, ?, ?, ?)
                ",
                rusqlite::params![
                    event.tx_hash,
                    event.from,
                    call.contract,
                    call.selector,
                    event.timestamp,
                ],
            )
            .wrap_err("failed to insert contract interaction")?;
        }

        tx.commit()?;
        Ok(id)
    }

    fn query_unprocessed_transfers(&self, limit: usize) -> Result<Vec<TransferRecord>> {
        let conn = self.conn.borrow();
        let mut stmt = conn.prepare(
            "SELECT id, tx_hash, block_number, timestamp, from_address, to_address,
                    amount, processed
             FROM transfers WHERE processed = 0 ORDER BY id LIMIT ?",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let records = stmt
            .query_map(rusqlite::params![limit], row_to_transfer)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn mark_processed(&self, ids: &[i64]) -> Result<usize> {
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        let mut updated = 0;
        {
            let mut stmt =
                tx.prepare("UPDATE transfers SET processed = 1 WHERE id = ? AND processed = 0")?;
            for id in ids {
                updated += stmt.execute(rusqlite::params![id])?;
            }
        }
        tx.commit()?;
        tracing::debug!(requested = ids.len(), updated, "marked transfers processed");
        Ok(updated)
    }

    fn persist_suspicious_clusters(&self, rows: &[(u64, String)]) -> Result<usize> {
        let flagged_at = chrono::Utc::now().to_rfc3339();
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        let mut inserted = 0;
        {
            let mut stmt = tx.prepare(
                "
                INSERT OR IGNORE INTO suspicious_clusters (community_id, account, flagged_at)
                VALUES (?, ?, ?)
                ",
            )?;
            for (community_id, account) in rows {
                inserted += stmt.execute(rusqlite::params![community_id, account, flagged_at])?;
            }
        }
        tx.commit()?;
        tracing::debug!(rows = rows.len(), inserted, "persisted suspicious cluster flags");
        Ok(inserted)
    }

    #[tracing::instrument(skip(self))]
    fn delete_oldest_transfers(&self, n: usize) -> Result<Vec<TransferRecord>> {
        if n == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.borrow_mut();
        let tx = conn.transaction()?;
        let records = {
            let mut stmt = tx.prepare(
                "SELECT id, tx_hash, block_number, timestamp, from_address, to_address,
                        amount, processed
                 FROM transfers WHERE processed = 1 ORDER BY id LIMIT ?",
            )?;
            let limit = i64::try_from(n).unwrap_or(i64::MAX);
            let records = stmt
                .query_map(rusqlite::params![limit], row_to_transfer)?
                .collect::<Result<Vec<_>, _>>()?;
            records
        };
        {
            let mut stmt = tx.prepare("DELETE FROM transfers WHERE id = ?")?;
            for record in &records {
                stmt.execute(rusqlite::params![record.id])?;
            }
        }
        tx.commit()?;
        tracing::debug!(deleted = records.len(), "deleted oldest processed transfers");
        Ok(records)
    }

    fn delete_oldest_contract_records(&self, n: usize) -> Result<usize> {
        if n == 0 {
            return Ok(0);
        }
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        let deleted = self.conn.borrow_mut().execute(
            "DELETE FROM contract_interactions WHERE id IN (
                SELECT id FROM contract_interactions ORDER BY id LIMIT ?
             )",
            rusqlite::params![limit],
        )?;
        Ok(deleted)
    }

    fn count_processed_transfers(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM transfers WHERE processed = 1")
    }

    fn count_contract_records(&self) -> Result<usize> {
        self.count("SELECT COUNT(*) FROM contract_interactions")
    }
}

fn row_to_transfer(row: &Row<'_>) -> rusqlite::Result<TransferRecord> {
    Ok(TransferRecord {
        id: row.get(0)?,
        tx_hash: row.get(1)?,
        block_number: row.get(2)?,
        timestamp: row.get(3)?,
        from: row.get(4)?,
        to: row.get(5)?,
        amount: row.get(6)?,
        processed: row.get(7)?,
    })
}
