//! sybil-data crate
//!
//! Transfer event types, ERC-20 log decoding, and the SQLite storage
//! collaborator used by the detection pipeline.

pub mod events;
pub mod store;
pub mod types;

pub use store::{Store, TransferStore};
pub use types::{
    ContractCall, ContractInteraction, SuspiciousClusterRow, TransferEvent, TransferRecord, TxLog,
};
