//! Replay input decoding and file-backed storage across pipeline restarts.

mod common;

use common::{config_with_batch, sample_transfer};
use sybil_analysis::Pipeline;
use sybil_data::events::{parse_event_lines, ERC20_TRANSFER_TOPIC0};
use sybil_data::{Store, TransferStore, TxLog};

fn topic_for(last_byte: u8) -> String {
    format!("0x{:064x}", last_byte)
}

fn transfer_log(from: u8, to: u8, topic0: &str) -> TxLog {
    TxLog {
        block_number: 19_000_000,
        timestamp: 1_708_617_600,
        tx_hash: format!("0x{:064x}", (u64::from(from) << 8) | u64::from(to)),
        log_index: 0,
        address: "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48".to_string(),
        topic0: topic0.to_string(),
        topic1: Some(topic_for(from)),
        topic2: Some(topic_for(to)),
        // 1.0 token at 18 decimals
        data: "0x0de0b6b3a7640000".to_string(),
    }
}

#[test]
fn replay_lines_mix_events_and_logs() {
    let lines = [
        serde_json::to_string(&sample_transfer(0, "0xaa", "0xbb", 2.5)).expect("serialize"),
        String::new(),
        serde_json::to_string(&transfer_log(1, 2, ERC20_TRANSFER_TOPIC0)).expect("serialize"),
        serde_json::to_string(&transfer_log(3, 4, &topic_for(9))).expect("serialize"),
    ]
    .join("\n");

    let events = parse_event_lines(&lines, 18).expect("replay parses");
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].amount, 2.5);
    assert_eq!(events[1].from, "0x0000000000000000000000000000000000000001");
    assert_eq!(events[1].to, "0x0000000000000000000000000000000000000002");
    assert!((events[1].amount - 1.0).abs() < 1e-12);
}

#[test]
fn malformed_line_reports_its_number() {
    let lines = format!(
        "{}\n{{\"not\": \"an event\"}}\n",
        serde_json::to_string(&sample_transfer(0, "0xaa", "0xbb", 1.0)).expect("serialize")
    );

    let err = parse_event_lines(&lines, 18).expect_err("second line is malformed");
    assert!(format!("{err:#}").contains("line 2"));
}

#[test]
fn decoded_logs_flow_through_the_pipeline() {
    let logs = [(1, 2), (2, 3), (3, 1)]
        .iter()
        .map(|(from, to)| serde_json::to_string(&transfer_log(*from, *to, ERC20_TRANSFER_TOPIC0)))
        .collect::<Result<Vec<_>, _>>()
        .expect("serialize")
        .join("\n");
    let events = parse_event_lines(&logs, 18).expect("replay parses");

    let mut pipeline = common::test_pipeline(config_with_batch(3));
    let mut findings = Vec::new();
    for event in &events {
        findings = pipeline.handle_event(event);
    }

    assert_eq!(findings.len(), 1);
    assert_eq!(findings[0].members.len(), 3);
    assert_eq!(findings[0].intra_weight, 3.0);
}

/// Unprocessed records survive a restart and are picked up by the next batch.
#[test]
fn unprocessed_records_survive_restart() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("sybil.sqlite");
    let db_path = db_path.to_str().expect("utf-8 temp path");

    {
        let store = Store::new(db_path).expect("open file store");
        let mut pipeline = Pipeline::new(store, config_with_batch(3)).expect("valid config");
        pipeline.handle_event(&sample_transfer(0, "a", "b", 1.0));
        pipeline.handle_event(&sample_transfer(1, "b", "c", 1.0));
        assert_eq!(pipeline.pending(), 2);
    }

    let store = Store::new(db_path).expect("reopen file store");
    assert_eq!(store.count_unprocessed_transfers().expect("count"), 2);

    let mut pipeline = Pipeline::new(store, config_with_batch(3)).expect("valid config");
    pipeline.handle_event(&sample_transfer(2, "c", "a", 1.0));
    assert_eq!(pipeline.pending(), 1);

    let report = pipeline.flush().expect("flush").expect("one pending");
    assert_eq!(report.transfers, 3);
    assert_eq!(pipeline.graph().node_count(), 3);
    assert_eq!(pipeline.store().count_processed_transfers().expect("count"), 3);
    assert_eq!(pipeline.store().count_unprocessed_transfers().expect("count"), 0);
}

/// A restarted pipeline with nothing accepted yet still flushes the
/// records an earlier run left unprocessed.
#[test]
fn flush_drains_records_from_an_earlier_run() {
    let dir = tempfile::tempdir().expect("create temp dir");
    let db_path = dir.path().join("sybil.sqlite");
    let db_path = db_path.to_str().expect("utf-8 temp path");

    {
        let store = Store::new(db_path).expect("open file store");
        let mut pipeline = Pipeline::new(store, config_with_batch(10)).expect("valid config");
        pipeline.handle_event(&sample_transfer(0, "a", "b", 1.0));
        pipeline.handle_event(&sample_transfer(1, "b", "a", 1.0));
    }

    let store = Store::new(db_path).expect("reopen file store");
    let mut pipeline = Pipeline::new(store, config_with_batch(10)).expect("valid config");
    assert_eq!(pipeline.pending(), 0);

    let report = pipeline.flush().expect("flush").expect("leftover records");
    assert_eq!(report.transfers, 2);
    assert!(pipeline.partition().contains("a"));
    assert_eq!(pipeline.store().count_unprocessed_transfers().expect("count"), 0);
    assert!(pipeline.flush().expect("flush").is_none());
}
