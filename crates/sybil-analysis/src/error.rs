//! Error taxonomy of the detection pipeline.
//!
//! None of these is fatal: the pipeline logs them and carries on with the
//! next event, leaving the global partition as it was.

use thiserror::Error;

use crate::partition::CommunityId;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// A storage call failed. Batch counting is not advanced.
    #[error("persistence failed while trying to {operation}: {report:#}")]
    Persistence {
        operation: &'static str,
        report: eyre::Report,
    },

    /// The batch threshold was reached but no unprocessed transfer could be read.
    #[error("batch threshold reached but no unprocessed transfers were found")]
    EmptyBatch,

    /// No global label holds at least half of a local community's
    /// previously labelled members.
    #[error(
        "local community {local} has no majority label: best is {best} with {overlap} of {labelled} labelled members"
    )]
    MergeConflictAmbiguous {
        local: CommunityId,
        best: CommunityId,
        overlap: usize,
        labelled: usize,
    },

    /// A heuristic needs data that is not available.
    #[error("heuristic `{heuristic}` skipped: {reason}")]
    HeuristicDataUnavailable {
        heuristic: &'static str,
        reason: String,
    },

    /// The event failed initial validation and was not persisted.
    #[error("invalid transfer event {tx_hash}: {reason}")]
    InvalidEvent { tx_hash: String, reason: String },

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Wrap a storage failure with the operation that was attempted.
    pub fn persistence(operation: &'static str) -> impl FnOnce(eyre::Report) -> Self {
        move |report| Self::Persistence { operation, report }
    }
}
