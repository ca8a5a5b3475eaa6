//! Minimal Solidity ABI encoding for the delivery registry contract:
//!
//! ```solidity
//! function recordDelivery(bytes32 recordHash, uint256 timestamp, string pharmacist) external;
//! ```

use crate::crypto::{keccak256, RecordHash};

pub const RECORD_DELIVERY_SIGNATURE: &str = "recordDelivery(bytes32,uint256,string)";

const WORD: usize = 32;

/// First four bytes of the keccak hash of a function signature.
pub fn selector(signature: &str) -> [u8; 4] {
    let hash = keccak256(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn uint_word(value: u64) -> [u8; WORD] {
    let mut word = [0u8; WORD];
    word[WORD - 8..].copy_from_slice(&value.to_be_bytes());
    word
}

/// Calldata for `recordDelivery(recordHash, timestamp, pharmacist)`.
pub fn encode_record_delivery(hash: &RecordHash, timestamp: u64, pharmacist: &str) -> Vec<u8> {
    let text = pharmacist.as_bytes();
    let padded_len = text.len().div_ceil(WORD) * WORD;
    let mut out = Vec::with_capacity(4 + 4 * WORD + padded_len);

    out.extend_from_slice(&selector(RECORD_DELIVERY_SIGNATURE));
    // head: bytes32, uint256, offset of the dynamic string
    out.extend_from_slice(hash.as_bytes());
    out.extend_from_slice(&uint_word(timestamp));
    out.extend_from_slice(&uint_word((3 * WORD) as u64));
    // tail: length then right-padded bytes
    out.extend_from_slice(&uint_word(text.len() as u64));
    out.extend_from_slice(text);
    out.resize(4 + 4 * WORD + padded_len, 0);
    out
}
