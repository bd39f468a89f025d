//! sybil-analysis crate
//!
//! Incremental community detection over a transfer stream: batching,
//! Louvain clustering of each batch's subgraph, merging into a global
//! partition, suspicion scoring, and windowed eviction.

pub mod accumulator;
pub mod config;
pub mod detector;
pub mod error;
pub mod export;
pub mod merger;
pub mod partition;
pub mod pipeline;
pub mod retention;
pub mod scorer;
pub mod transfer_graph;

pub use config::DetectorConfig;
pub use error::PipelineError;
pub use partition::{CommunityId, Partition};
pub use pipeline::{BatchReport, Pipeline};
pub use scorer::{AccountAgeOracle, Finding, SuspicionReason};
