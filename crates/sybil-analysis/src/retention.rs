//! Retention window over processed records.

use serde::Serialize;
use sybil_data::TransferStore;

use crate::error::PipelineError;
use crate::partition::Partition;
use crate::transfer_graph::TransferGraph;

/// What one eviction pass removed.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub transfers_deleted: usize,
    pub contract_records_deleted: usize,
    pub edges_removed: usize,
    pub accounts_removed: usize,
}

impl EvictionReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Keeps at most `window` processed transfers and `window` contract
/// interaction records, dropping the oldest first.
#[derive(Clone, Debug)]
pub struct RetentionManager {
    window: usize,
}

impl RetentionManager {
    pub fn new(window: usize) -> Self {
        Self { window }
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// Trim storage to the window and drop what the graph no longer backs.
    ///
    /// Edges lose their backing when every transfer record folded into them
    /// has been deleted; such edges are removed along with accounts left
    /// without any edge, and those accounts leave `partition`. A store
    /// already within the window is left untouched.
    ///
    /// # Errors
    /// Returns [`PipelineError::Persistence`] if a storage call fails. Work
    /// done before the failing call stays applied.
    #[tracing::instrument(skip_all, fields(window = self.window))]
    pub fn evict<S>(
        &self,
        store: &S,
        graph: &mut TransferGraph,
        partition: &mut Partition,
    ) -> Result<EvictionReport, PipelineError>
    where
        S: TransferStore + ?Sized,
    {
        let mut report = EvictionReport::default();

        let processed = store
            .count_processed_transfers()
            .map_err(PipelineError::persistence("count processed transfers"))?;
        if processed > self.window {
            let deleted = store
                .delete_oldest_transfers(processed - self.window)
                .map_err(PipelineError::persistence("delete oldest transfers"))?;
            report.transfers_deleted = deleted.len();

            let exhausted = graph.release(&deleted);
            report.edges_removed = exhausted.len();
            let removed = graph.remove_edges_and_orphan_nodes(&exhausted);
            for account in &removed {
                partition.remove(account);
            }
            report.accounts_removed = removed.len();
        }

        let contracts = store
            .count_contract_records()
            .map_err(PipelineError::persistence("count contract records"))?;
        if contracts > self.window {
            report.contract_records_deleted = store
                .delete_oldest_contract_records(contracts - self.window)
                .map_err(PipelineError::persistence("delete oldest contract records"))?;
        }

        if !report.is_empty() {
            tracing::info!(
                transfers = report.transfers_deleted,
                contract_records = report.contract_records_deleted,
                edges = report.edges_removed,
                accounts = report.accounts_removed,
                "evicted records outside the retention window"
            );
        }
        Ok(report)
    }
}
