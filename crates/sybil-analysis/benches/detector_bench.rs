//! Benchmarks for sybil-analysis core components.
//!
//! Uses synthetic in-memory transfer batches (no SQLite) for reproducible
//! performance testing.
//! Run with: `cargo bench --package sybil-analysis`

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sybil_analysis::detector::CommunityDetector;
use sybil_analysis::merger::merge;
use sybil_analysis::partition::{LabelAllocator, Partition};
use sybil_analysis::scorer::SuspicionScorer;
use sybil_analysis::transfer_graph::TransferGraph;
use sybil_data::TransferRecord;

/// Generates `rings` rings of `ring_size` accounts, plus a sparse bridge
/// transfer between consecutive rings.
fn ring_batch(rings: usize, ring_size: usize, offset: i64) -> Vec<TransferRecord> {
    let mut records = Vec::new();
    let mut id = offset;
    let account = |ring: usize, member: usize| format!("0x{:04x}{:036x}", ring, member);

    for ring in 0..rings {
        for member in 0..ring_size {
            id += 1;
            records.push(TransferRecord {
                id,
                tx_hash: format!("0x{:064x}", id),
                block_number: id as u64,
                timestamp: 1_700_000_000 + id,
                from: account(ring, member),
                to: account(ring, (member + 1) % ring_size),
                amount: 1.0 + (member % 7) as f64,
                processed: true,
            });
        }
        if ring + 1 < rings {
            id += 1;
            records.push(TransferRecord {
                id,
                tx_hash: format!("0x{:064x}", id),
                block_number: id as u64,
                timestamp: 1_700_000_000 + id,
                from: account(ring, 0),
                to: account(ring + 1, 0),
                amount: 0.1,
                processed: true,
            });
        }
    }
    records
}

/// Benchmark: Louvain over a 20-ring, 500-account batch subgraph.
fn bench_detect_500_accounts(c: &mut Criterion) {
    let mut graph = TransferGraph::new();
    let touched = graph.ingest(&ring_batch(20, 25, 0));
    let subgraph = graph.induced_subgraph(&touched);
    let detector = CommunityDetector::default();

    c.bench_function("louvain_500_accounts", |b| {
        b.iter(|| detector.detect(black_box(&subgraph)));
    });
}

/// Benchmark: Ingest 1,000 transfers into a fresh graph.
fn bench_ingest_1k_transfers(c: &mut Criterion) {
    let batch = ring_batch(40, 25, 0);
    c.bench_function("ingest_1k_transfers", |b| {
        b.iter_batched(
            TransferGraph::new,
            |mut graph| graph.ingest(black_box(&batch)),
            criterion::BatchSize::SmallInput,
        );
    });
}

/// Benchmark: Merge a second batch into a populated global partition, then score it.
fn bench_merge_and_score(c: &mut Criterion) {
    let mut graph = TransferGraph::new();
    let detector = CommunityDetector::default();

    let first = graph.ingest(&ring_batch(20, 25, 0));
    let first_sub = graph.induced_subgraph(&first);
    let seeded = merge(
        &detector.detect(&first_sub),
        &Partition::new(),
        &first,
        &first_sub,
        &LabelAllocator::new(),
    );

    let second = graph.ingest(&ring_batch(20, 25, 10_000));
    let second_sub = graph.induced_subgraph(&second);
    let local = detector.detect(&second_sub);
    let scorer = SuspicionScorer::default();

    c.bench_function("merge_and_score_500_accounts", |b| {
        b.iter(|| {
            let outcome = merge(
                black_box(&local),
                black_box(&seeded.partition),
                &second,
                &second_sub,
                &seeded.labels,
            );
            scorer.score(&outcome.partition, &graph, None)
        });
    });
}

criterion_group!(
    benches,
    bench_detect_500_accounts,
    bench_ingest_1k_transfers,
    bench_merge_and_score
);
criterion_main!(benches);
