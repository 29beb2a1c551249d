use alloy::primitives::{Address, U256};
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;

use crate::types::TransferEvent;

// Generate the Transfer event ABI using alloy's sol! macro.
// This gives us Transfer::SIGNATURE_HASH for filters and topic checks.
sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// Attempt to decode a log as an ERC-20 Transfer event.
///
/// Returns `None` if:
/// - The log doesn't match the Transfer event signature
/// - The log is not an ERC-20 shaped transfer (ERC-721 transfers index the token id)
/// - The transferred value is zero
pub fn decode_transfer_log(log: &Log, chain: &str) -> Option<TransferEvent> {
    let inner = &log.inner;

    let topics = inner.data.topics();
    if topics.is_empty() || topics[0] != Transfer::SIGNATURE_HASH {
        return None;
    }

    // We need exactly 3 topics (signature + from + to) and 32 bytes of data (value)
    if topics.len() != 3 {
        return None;
    }

    let from = Address::from_word(topics[1]);
    let to = Address::from_word(topics[2]);

    let data = inner.data.data.as_ref();
    if data.len() < 32 {
        return None;
    }

    let value = U256::from_be_slice(&data[..32]);
    if value.is_zero() {
        return None;
    }

    Some(TransferEvent {
        chain: chain.to_string(),
        token: inner.address,
        from,
        to,
        value,
        block_number: log.block_number?,
        tx_hash: log.transaction_hash.unwrap_or_default(),
        log_index: log.log_index.unwrap_or(0),
    })
}
