//! Type definitions for transfer events and the records persisted for them.

use serde::{Deserialize, Serialize};

/// A value transfer delivered by the event source.
///
/// Amounts are in display units (e.g. ETH, not wei) so that edge weights
/// and the diversity heuristic operate on comparable magnitudes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferEvent {
    /// Transaction hash (lowercase hex with 0x prefix).
    pub tx_hash: String,
    /// Block number containing the transfer.
    pub block_number: u64,
    /// Block timestamp in unix seconds.
    pub timestamp: i64,
    /// Sender address (hex text).
    pub from: String,
    /// Recipient address (hex text).
    pub to: String,
    /// Transferred value in display units.
    pub amount: f64,
    /// Contract call made by the same transaction, if any.
    #[serde(default)]
    pub contract_call: Option<ContractCall>,
}

/// Contract invocation attached to a transfer event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractCall {
    /// Called contract address (hex text).
    pub contract: String,
    /// 4-byte function selector (hex with 0x), empty for plain calls.
    #[serde(default)]
    pub selector: String,
}

/// Transfer record as stored in SQLite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TransferRecord {
    /// Row id; doubles as ingestion order.
    pub id: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Block number.
    pub block_number: u64,
    /// Block timestamp in unix seconds.
    pub timestamp: i64,
    /// Sender address.
    pub from: String,
    /// Recipient address.
    pub to: String,
    /// Transferred value in display units.
    pub amount: f64,
    /// Whether the record has been folded into the transfer graph.
    pub processed: bool,
}

/// Contract interaction record as stored in SQLite.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContractInteraction {
    /// Row id; doubles as ingestion order.
    pub id: i64,
    /// Transaction hash.
    pub tx_hash: String,
    /// Caller address.
    pub caller: String,
    /// Called contract address.
    pub contract: String,
    /// Function selector.
    pub selector: String,
    /// Block timestamp in unix seconds.
    pub timestamp: i64,
}

/// One (community, member) row of a flagged cluster.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousClusterRow {
    /// Global community label.
    pub community_id: u64,
    /// Member account address.
    pub account: String,
    /// When the flag was persisted (RFC 3339).
    pub flagged_at: String,
}

/// Transaction receipt log entry, as delivered by an RPC-backed event source.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxLog {
    /// Block number containing this log.
    pub block_number: u64,
    /// Block timestamp in unix seconds.
    #[serde(default)]
    pub timestamp: i64,
    /// Transaction hash that emitted this log (lowercase hex with 0x).
    pub tx_hash: String,
    /// Log index within the block.
    pub log_index: u64,
    /// Address of the contract that emitted the log (hex with 0x).
    pub address: String,
    /// Event signature topic (topic0, hex with 0x).
    pub topic0: String,
    /// First indexed parameter (hex with 0x), if present.
    pub topic1: Option<String>,
    /// Second indexed parameter (hex with 0x), if present.
    pub topic2: Option<String>,
    /// Non-indexed log data (hex with 0x prefix).
    pub data: String,
}
