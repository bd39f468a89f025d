//! Batch accumulation and initial event validation.

use sybil_data::{TransferEvent, TransferStore};

use crate::error::PipelineError;

/// Outcome of accepting one event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BatchStatus {
    /// The batch threshold has been reached; the caller should flush.
    BatchReady,
    /// Keep accumulating.
    Pending,
}

/// Counts durably persisted transfers until a batch is due.
///
/// The counter only moves after the storage collaborator has accepted the
/// record, and only drops back to zero when the caller reports a completed
/// flush. A flush that fails therefore leaves the batch due, and the next
/// accepted event retries it.
#[derive(Clone, Debug)]
pub struct BatchAccumulator {
    threshold: usize,
    pending: usize,
}

impl BatchAccumulator {
    pub fn new(threshold: usize) -> Self {
        Self {
            threshold: threshold.max(1),
            pending: 0,
        }
    }

    /// Persist `event`, then count it.
    ///
    /// # Errors
    /// Returns [`PipelineError::Persistence`] if the store rejects the
    /// record; the counter is left unchanged.
    pub fn accept<S>(
        &mut self,
        store: &S,
        event: &TransferEvent,
    ) -> Result<BatchStatus, PipelineError>
    where
        S: TransferStore + ?Sized,
    {
        let id = store
            .persist_transfer(event)
            .map_err(PipelineError::persistence("persist transfer"))?;

        self.pending += 1;
        tracing::trace!(
            id,
            pending = self.pending,
            threshold = self.threshold,
            "transfer persisted"
        );

        if self.pending >= self.threshold {
            Ok(BatchStatus::BatchReady)
        } else {
            Ok(BatchStatus::Pending)
        }
    }

    /// Reset the counter after a batch flush completed.
    pub fn mark_flushed(&mut self) {
        self.pending = 0;
    }

    /// Transfers counted since the last flush.
    pub fn pending(&self) -> usize {
        self.pending
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }
}

/// Reject events the graph should never see and normalize addresses.
///
/// Mirrors the cheap pre-persistence checks: both parties present, no
/// self-transfer, and a finite positive amount.
pub fn validate_event(event: &TransferEvent) -> Result<TransferEvent, PipelineError> {
    let invalid = |reason: &str| PipelineError::InvalidEvent {
        tx_hash: event.tx_hash.clone(),
        reason: reason.to_string(),
    };

    let from = event.from.trim().to_lowercase();
    let to = event.to.trim().to_lowercase();

    if from.is_empty() || to.is_empty() {
        return Err(invalid("missing sender or recipient"));
    }
    if from == to {
        return Err(invalid("self-transfer"));
    }
    if !event.amount.is_finite() || event.amount <= 0.0 {
        return Err(invalid("amount must be a positive number"));
    }

    let mut normalized = event.clone();
    normalized.from = from;
    normalized.to = to;
    normalized.tx_hash = event.tx_hash.trim().to_lowercase();
    if let Some(call) = normalized.contract_call.as_mut() {
        call.contract = call.contract.trim().to_lowercase();
    }
    Ok(normalized)
}
