//! Event source decoding.
//!
//! Turns raw inputs into [`TransferEvent`]s: ERC-20 `Transfer` receipt logs
//! and JSON-lines replay files. Everything here is thin I/O in front of the
//! detection pipeline.

use alloy::primitives::{Address, B256, U256};
use eyre::{Context, Result};

use crate::types::{TransferEvent, TxLog};

/// ERC-20 Transfer event signature: `keccak256("Transfer(address,address,uint256)")`.
pub const ERC20_TRANSFER_TOPIC0: &str =
    "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";

/// Decimals assumed when a replay does not say otherwise.
pub const DEFAULT_TOKEN_DECIMALS: u8 = 18;

/// Decode a [`TxLog`] into a [`TransferEvent`] if it is an ERC-20 Transfer event.
///
/// The raw amount is scaled down by `decimals`. Returns `None` for
/// non-Transfer events or logs with missing/malformed fields.
pub fn parse_transfer_log(log: &TxLog, decimals: u8) -> Option<TransferEvent> {
    if !log.topic0.eq_ignore_ascii_case(ERC20_TRANSFER_TOPIC0) {
        return None;
    }
    let from = parse_address_from_topic(log.topic1.as_ref()?)?;
    let to = parse_address_from_topic(log.topic2.as_ref()?)?;
    let raw = parse_u256_from_hex(&log.data)?;

    Some(TransferEvent {
        tx_hash: log.tx_hash.to_lowercase(),
        block_number: log.block_number,
        timestamp: log.timestamp,
        from: format!("{from:#x}"),
        to: format!("{to:#x}"),
        amount: scale_amount(raw, decimals),
        contract_call: None,
    })
}

/// Parse one line of a replay file.
///
/// Accepts either a serialized [`TransferEvent`] or a [`TxLog`]; logs that
/// are not ERC-20 transfers and blank lines yield `Ok(None)`.
pub fn parse_event_line(line: &str, decimals: u8) -> Result<Option<TransferEvent>> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if let Ok(event) = serde_json::from_str::<TransferEvent>(trimmed) {
        return Ok(Some(event));
    }
    let log: TxLog = serde_json::from_str(trimmed)
        .wrap_err_with(|| format!("line is neither a transfer event nor a log: {trimmed}"))?;
    let event = parse_transfer_log(&log, decimals);
    if event.is_none() {
        tracing::trace!(tx_hash = %log.tx_hash, "skipping log that is not a decodable transfer");
    }
    Ok(event)
}

/// Parse a whole JSON-lines replay, keeping the input order.
pub fn parse_event_lines(contents: &str, decimals: u8) -> Result<Vec<TransferEvent>> {
    let mut events = Vec::new();
    for (line_no, line) in contents.lines().enumerate() {
        let parsed = parse_event_line(line, decimals)
            .wrap_err_with(|| format!("failed to parse replay line {}", line_no + 1))?;
        if let Some(event) = parsed {
            events.push(event);
        }
    }
    Ok(events)
}

/// Convert a raw token amount to display units.
pub fn scale_amount(raw: U256, decimals: u8) -> f64 {
    let as_u128: u128 = raw.try_into().unwrap_or(u128::MAX);
    as_u128 as f64 / 10f64.powi(i32::from(decimals))
}

/// Addresses are right-aligned in 32-byte topics: bytes 12..32 hold the address.
fn parse_address_from_topic(topic_hex: &str) -> Option<Address> {
    let topic = topic_hex.parse::<B256>().ok()?;
    Some(Address::from_slice(&topic[12..]))
}

/// Handles both `0x`-prefixed and bare hex. Takes the first 64 hex chars (32 bytes).
fn parse_u256_from_hex(data_hex: &str) -> Option<U256> {
    let hex = data_hex.strip_prefix("0x").unwrap_or(data_hex);
    if hex.is_empty() {
        return Some(U256::ZERO);
    }
    if !hex.is_ascii() {
        return None;
    }
    let trimmed = &hex[..hex.len().min(64)];
    let padded = format!("0x{trimmed:0>64}");
    padded.parse::<U256>().ok()
}
