//! Pipeline controller: one event in, findings out.
//!
//! A [`Pipeline`] owns all mutable detection state and runs every event to
//! completion before the next one:
//!
//! ```text
//! validate → persist + count → (batch due?) query → mark processed → ingest
//!          → detect → merge → swap → score → persist flags → evict
//! ```
//!
//! It is not meant to be shared between threads. Run one pipeline per
//! store and feed it from a single consumer.

use std::path::PathBuf;

use serde::Serialize;
use sybil_data::{TransferEvent, TransferStore};

use crate::accumulator::{validate_event, BatchAccumulator, BatchStatus};
use crate::config::DetectorConfig;
use crate::detector::CommunityDetector;
use crate::error::PipelineError;
use crate::export::export_graphml_file;
use crate::merger::merge;
use crate::partition::{LabelAllocator, Partition};
use crate::retention::{EvictionReport, RetentionManager};
use crate::scorer::{AccountAgeOracle, Finding, SuspicionScorer};
use crate::transfer_graph::TransferGraph;

/// Everything the pipeline mutates between events.
pub struct PipelineState {
    pub graph: TransferGraph,
    pub global_partition: Partition,
    pub labels: LabelAllocator,
    pub accumulator: BatchAccumulator,
    pub batches_processed: u64,
}

impl PipelineState {
    pub fn new(batch_size: usize) -> Self {
        Self {
            graph: TransferGraph::new(),
            global_partition: Partition::new(),
            labels: LabelAllocator::new(),
            accumulator: BatchAccumulator::new(batch_size),
            batches_processed: 0,
        }
    }
}

/// Summary of one processed batch.
#[derive(Clone, Debug, Serialize)]
pub struct BatchReport {
    /// 1-based batch sequence number.
    pub batch: u64,
    pub transfers: usize,
    pub touched_edges: usize,
    /// Communities found by the detector in this batch's subgraph.
    pub local_communities: usize,
    /// Global labels allocated by the merge.
    pub new_communities: usize,
    /// Communities in the global partition after the merge.
    pub communities: usize,
    pub findings: Vec<Finding>,
    /// Whether the suspicious-cluster rows reached the store.
    pub flags_persisted: bool,
    /// `None` when eviction was skipped or failed.
    pub evicted: Option<EvictionReport>,
}

pub struct Pipeline<S: TransferStore> {
    store: S,
    config: DetectorConfig,
    detector: CommunityDetector,
    scorer: SuspicionScorer,
    retention: RetentionManager,
    state: PipelineState,
    age_oracle: Option<Box<dyn AccountAgeOracle>>,
    graphml_path: Option<PathBuf>,
}

impl<S: TransferStore> Pipeline<S> {
    /// Build a pipeline over `store`.
    ///
    /// # Errors
    /// Returns [`PipelineError::InvalidConfig`] if `config` does not validate.
    pub fn new(store: S, config: DetectorConfig) -> Result<Self, PipelineError> {
        config.validate()?;
        Ok(Self {
            detector: CommunityDetector::new(config.max_iterations),
            scorer: SuspicionScorer::from_config(&config),
            retention: RetentionManager::new(config.retention_window),
            state: PipelineState::new(config.batch_size),
            age_oracle: None,
            graphml_path: None,
            store,
            config,
        })
    }

    /// Enable the account-age heuristic.
    pub fn with_age_oracle(mut self, oracle: Box<dyn AccountAgeOracle>) -> Self {
        self.age_oracle = Some(oracle);
        self
    }

    /// Rewrite the graph as GraphML at `path` after every batch.
    pub fn with_graphml_export(mut self, path: impl Into<PathBuf>) -> Self {
        self.graphml_path = Some(path.into());
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn state(&self) -> &PipelineState {
        &self.state
    }

    pub fn graph(&self) -> &TransferGraph {
        &self.state.graph
    }

    pub fn partition(&self) -> &Partition {
        &self.state.global_partition
    }

    /// Transfers accepted since the last completed batch.
    pub fn pending(&self) -> usize {
        self.state.accumulator.pending()
    }

    /// Feed one event through the pipeline.
    ///
    /// Never fails: errors are logged and yield an empty list. Findings are
    /// only returned by the event that completes a batch.
    pub fn handle_event(&mut self, event: &TransferEvent) -> Vec<Finding> {
        match self.try_handle_event(event) {
            Ok(Some(report)) => report.findings,
            Ok(None) => Vec::new(),
            Err(err @ PipelineError::InvalidEvent { .. }) => {
                tracing::debug!(error = %err, "event rejected");
                Vec::new()
            }
            Err(err) => {
                tracing::warn!(error = %err, tx_hash = %event.tx_hash, "event handling failed");
                Vec::new()
            }
        }
    }

    /// Like [`Pipeline::handle_event`] but surfaces the batch report and
    /// any error to the caller.
    pub fn try_handle_event(
        &mut self,
        event: &TransferEvent,
    ) -> Result<Option<BatchReport>, PipelineError> {
        let event = validate_event(event)?;
        match self.state.accumulator.accept(&self.store, &event)? {
            BatchStatus::Pending => Ok(None),
            BatchStatus::BatchReady => self.process_batch().map(Some),
        }
    }

    /// Process one batch of whatever is unprocessed in the store, even below
    /// the batch size.
    ///
    /// Picks up records left behind by an earlier run, so a finite replay
    /// can call it until it returns `Ok(None)`, which means nothing was
    /// left to process.
    pub fn flush(&mut self) -> Result<Option<BatchReport>, PipelineError> {
        match self.process_batch() {
            Ok(report) => Ok(Some(report)),
            Err(PipelineError::EmptyBatch) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Run one batch over the oldest unprocessed transfers.
    ///
    /// The global partition is replaced only after detection and merge
    /// have both completed; any earlier failure leaves it untouched.
    ///
    /// # Errors
    /// Returns [`PipelineError::EmptyBatch`] if no unprocessed transfers
    /// exist, or [`PipelineError::Persistence`] if they cannot be read or
    /// marked processed.
    #[tracing::instrument(skip_all, fields(batch = self.state.batches_processed + 1))]
    pub fn process_batch(&mut self) -> Result<BatchReport, PipelineError> {
        let records = self
            .store
            .query_unprocessed_transfers(self.config.batch_size)
            .map_err(PipelineError::persistence("query unprocessed transfers"))?;
        if records.is_empty() {
            self.state.accumulator.mark_flushed();
            return Err(PipelineError::EmptyBatch);
        }

        let ids: Vec<i64> = records.iter().map(|r| r.id).collect();
        self.store
            .mark_processed(&ids)
            .map_err(PipelineError::persistence("mark transfers processed"))?;

        let touched = self.state.graph.ingest(&records);
        let subgraph = self.state.graph.induced_subgraph(&touched);
        let local = self.detector.detect(&subgraph);

        let outcome = merge(
            &local,
            &self.state.global_partition,
            &touched,
            &subgraph,
            &self.state.labels,
        );
        self.state.global_partition = outcome.partition;
        self.state.labels = outcome.labels;
        self.state.graph.apply_partition(&self.state.global_partition);

        let findings = self.scorer.score(
            &self.state.global_partition,
            &self.state.graph,
            self.age_oracle.as_deref(),
        );

        let flags_persisted = match self.persist_findings(&findings) {
            Ok(rows) => {
                tracing::debug!(rows, "suspicious cluster rows stored");
                true
            }
            Err(err) => {
                tracing::warn!(error = %err, "skipping eviction for this batch");
                false
            }
        };

        let evicted = if flags_persisted {
            match self.retention.evict(
                &self.store,
                &mut self.state.graph,
                &mut self.state.global_partition,
            ) {
                Ok(report) => Some(report),
                Err(err) => {
                    tracing::warn!(error = %err, "eviction failed");
                    None
                }
            }
        } else {
            None
        };

        if let Some(path) = &self.graphml_path {
            if let Err(err) = export_graphml_file(&self.state.graph, path) {
                tracing::warn!(error = %err, path = %path.display(), "graph export failed");
            }
        }

        self.state.accumulator.mark_flushed();
        self.state.batches_processed += 1;

        let report = BatchReport {
            batch: self.state.batches_processed,
            transfers: records.len(),
            touched_edges: touched.len(),
            local_communities: local.community_count(),
            new_communities: outcome.new_labels.len(),
            communities: self.state.global_partition.community_count(),
            findings,
            flags_persisted,
            evicted,
        };

        tracing::info!(
            transfers = report.transfers,
            touched_edges = report.touched_edges,
            local_communities = report.local_communities,
            new_communities = report.new_communities,
            merged = outcome.merged,
            communities = report.communities,
            flagged = report.findings.len(),
            nodes = self.state.graph.node_count(),
            edges = self.state.graph.edge_count(),
            "batch processed"
        );

        Ok(report)
    }

    fn persist_findings(&self, findings: &[Finding]) -> Result<usize, PipelineError> {
        let rows: Vec<(u64, String)> = findings
            .iter()
            .flat_map(|f| f.members.iter().map(move |m| (f.community, m.clone())))
            .collect();
        if rows.is_empty() {
            return Ok(0);
        }
        self.store
            .persist_suspicious_clusters(&rows)
            .map_err(PipelineError::persistence("persist suspicious clusters"))
    }
}
