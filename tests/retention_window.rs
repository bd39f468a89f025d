//! Retention window behaviour observed through whole batches.

mod common;

use common::{feed, sample_contract_transfer, test_pipeline};
use sybil_analysis::retention::EvictionReport;
use sybil_analysis::transfer_graph::EdgeId;
use sybil_analysis::DetectorConfig;
use sybil_data::TransferStore;

fn config(batch_size: usize, retention_window: usize) -> DetectorConfig {
    DetectorConfig {
        batch_size,
        retention_window,
        ..DetectorConfig::default()
    }
}

/// Once the oldest records fall out of the window, their edges and the
/// accounts left without edges disappear from graph and partition.
#[test]
fn aged_edges_and_orphans_are_evicted() {
    let mut pipeline = test_pipeline(config(2, 2));
    feed(&mut pipeline, 0, &[("a", "b", 1.0), ("b", "a", 1.0)]);
    assert!(pipeline.partition().contains("a"));

    pipeline.handle_event(&common::sample_transfer(2, "x", "y", 1.0));
    let report = pipeline
        .try_handle_event(&common::sample_transfer(3, "y", "x", 1.0))
        .expect("batch succeeds")
        .expect("batch was due");

    let evicted = report.evicted.expect("eviction ran");
    assert_eq!(evicted.transfers_deleted, 2);
    assert_eq!(evicted.edges_removed, 2);
    assert_eq!(evicted.accounts_removed, 2);

    assert!(!pipeline.graph().contains_account("a"));
    assert!(!pipeline.graph().contains_account("b"));
    assert!(!pipeline.partition().contains("a"));
    assert!(pipeline.partition().contains("x"));
    assert_eq!(pipeline.graph().edge_count(), 2);
    assert_eq!(pipeline.store().count_processed_transfers().expect("count"), 2);
}

#[test]
fn nothing_evicted_below_the_window() {
    let mut pipeline = test_pipeline(config(2, 100));
    feed(&mut pipeline, 0, &[("a", "b", 1.0), ("b", "a", 1.0)]);
    let report = pipeline
        .try_handle_event(&common::sample_transfer(2, "a", "c", 1.0))
        .expect("accept");
    assert!(report.is_none());

    let report = pipeline
        .try_handle_event(&common::sample_transfer(3, "c", "a", 1.0))
        .expect("batch succeeds")
        .expect("batch was due");
    assert_eq!(report.evicted, Some(EvictionReport::default()));
    assert_eq!(pipeline.graph().edge_count(), 4);
}

/// An edge stays while newer transfers still back it; its cumulative
/// weight is never rolled back.
#[test]
fn repeated_pair_survives_eviction() {
    let mut pipeline = test_pipeline(config(1, 1));
    feed(&mut pipeline, 0, &[("a", "b", 1.0), ("a", "b", 2.0), ("a", "b", 3.0)]);

    assert_eq!(pipeline.state().batches_processed, 3);
    let edge = pipeline
        .graph()
        .edge(&EdgeId::new("a", "b"))
        .expect("edge still backed");
    assert_eq!(edge.weight, 6.0);
    assert_eq!(edge.count, 3);
    assert_eq!(edge.live_records, 1);
    assert_eq!(pipeline.store().count_processed_transfers().expect("count"), 1);
}

#[test]
fn contract_records_share_the_window() {
    let mut pipeline = test_pipeline(config(1, 1));
    for (seq, (from, to)) in [("a", "b"), ("c", "d"), ("e", "f")].into_iter().enumerate() {
        pipeline.handle_event(&sample_contract_transfer(seq as u64, from, to, "0xc0ffee"));
    }

    assert_eq!(pipeline.store().count_contract_records().expect("count"), 1);
    assert_eq!(pipeline.store().count_processed_transfers().expect("count"), 1);
    assert_eq!(pipeline.graph().node_count(), 2);
    assert!(pipeline.graph().contains_account("e"));
}
