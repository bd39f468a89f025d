//! Shared test helpers and utilities.
//!
//! Provides factory functions for stores, transfer events and pipelines
//! with sensible defaults.

#![allow(dead_code)]

use std::cell::Cell;

use sybil_analysis::{DetectorConfig, Pipeline};
use sybil_data::{ContractCall, Store, TransferEvent, TransferRecord, TransferStore};

/// Creates an in-memory SQLite Store for tests.
///
/// # Panics
/// Panics if the in-memory database cannot be created (should never happen).
pub fn test_store() -> Store {
    Store::new(":memory:").expect("in-memory store should always open")
}

/// Creates a transfer event between two short test addresses.
///
/// `seq` only feeds the tx hash, block number and timestamp.
pub fn sample_transfer(seq: u64, from: &str, to: &str, amount: f64) -> TransferEvent {
    TransferEvent {
        tx_hash: format!("0x{:064x}", seq),
        block_number: 19_000_000 + seq,
        timestamp: 1_708_617_600 + seq as i64, // 2024-02-22T16:00:00Z
        from: from.to_string(),
        to: to.to_string(),
        amount,
        contract_call: None,
    }
}

/// Same as [`sample_transfer`] with a contract call attached.
pub fn sample_contract_transfer(seq: u64, from: &str, to: &str, contract: &str) -> TransferEvent {
    TransferEvent {
        contract_call: Some(ContractCall {
            contract: contract.to_string(),
            selector: "0xa9059cbb".to_string(),
        }),
        ..sample_transfer(seq, from, to, 1.0)
    }
}

/// Default config with the given batch size.
pub fn config_with_batch(batch_size: usize) -> DetectorConfig {
    DetectorConfig {
        batch_size,
        ..DetectorConfig::default()
    }
}

/// Pipeline over a fresh in-memory store.
pub fn test_pipeline(config: DetectorConfig) -> Pipeline<Store> {
    Pipeline::new(test_store(), config).expect("test config should validate")
}

/// Feed `(from, to, amount)` triples as consecutive events, returning the
/// findings of the last event.
pub fn feed<S: TransferStore>(
    pipeline: &mut Pipeline<S>,
    start_seq: u64,
    transfers: &[(&str, &str, f64)],
) -> Vec<sybil_analysis::Finding> {
    let mut findings = Vec::new();
    for (i, (from, to, amount)) in transfers.iter().enumerate() {
        findings = pipeline.handle_event(&sample_transfer(start_seq + i as u64, from, to, *amount));
    }
    findings
}

/// Store double delegating to an in-memory [`Store`] whose writes can be
/// switched off.
pub struct SwitchableStore {
    pub inner: Store,
    pub reject_writes: Cell<bool>,
    /// Fail only `mark_processed`.
    pub reject_marking: Cell<bool>,
}

impl SwitchableStore {
    pub fn new() -> Self {
        Self {
            inner: test_store(),
            reject_writes: Cell::new(false),
            reject_marking: Cell::new(false),
        }
    }

    fn check(&self) -> eyre::Result<()> {
        if self.reject_writes.get() {
            eyre::bail!("attempt to write a readonly database");
        }
        Ok(())
    }
}

impl TransferStore for SwitchableStore {
    fn persist_transfer(&self, event: &TransferEvent) -> eyre::Result<i64> {
        self.check()?;
        self.inner.persist_transfer(event)
    }
    fn query_unprocessed_transfers(&self, limit: usize) -> eyre::Result<Vec<TransferRecord>> {
        self.inner.query_unprocessed_transfers(limit)
    }
    fn mark_processed(&self, ids: &[i64]) -> eyre::Result<usize> {
        self.check()?;
        if self.reject_marking.get() {
            eyre::bail!("database is locked");
        }
        self.inner.mark_processed(ids)
    }
    fn persist_suspicious_clusters(&self, rows: &[(u64, String)]) -> eyre::Result<usize> {
        self.check()?;
        self.inner.persist_suspicious_clusters(rows)
    }
    fn delete_oldest_transfers(&self, n: usize) -> eyre::Result<Vec<TransferRecord>> {
        self.check()?;
        self.inner.delete_oldest_transfers(n)
    }
    fn delete_oldest_contract_records(&self, n: usize) -> eyre::Result<usize> {
        self.check()?;
        self.inner.delete_oldest_contract_records(n)
    }
    fn count_processed_transfers(&self) -> eyre::Result<usize> {
        self.inner.count_processed_transfers()
    }
    fn count_contract_records(&self) -> eyre::Result<usize> {
        self.inner.count_contract_records()
    }
}
