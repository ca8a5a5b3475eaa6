//! Canonical content hash of a delivered record.
//!
//! The digest commits to the exact recorded values: the record is rendered as
//! compact JSON with a fixed key order and hashed with keccak-256, so anyone
//! holding the same field values can recompute it and compare against the
//! ledger entry.

use std::fmt;

use anyhow::Result;
use serde::Serialize;

use super::keccak256;
use crate::types::{ConfirmedVia, DeliveredAt, DeliveryRecord};

/// 32-byte keccak digest of a delivery record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordHash(pub [u8; 32]);

impl RecordHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }
}

impl fmt::Display for RecordHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Fields committed to by the hash, in serialization order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HashInput<'a> {
    pub id: &'a str,
    pub pharmacist: Option<&'a str>,
    pub recipient: Option<&'a str>,
    /// Written as a JSON number when the courier sent one.
    pub delivered_at: &'a DeliveredAt,
    /// Outer `None` omits the key; `Some(None)` writes `null`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pharmacist_reply: Option<Option<&'a str>>,
}

impl<'a> HashInput<'a> {
    /// Build the input from a record that has reached `Delivered`.
    ///
    /// Returns `None` while the delivery fields are still missing.
    pub fn from_record(record: &'a DeliveryRecord) -> Option<Self> {
        let delivered_at = record.delivered_at.as_ref()?;
        let pharmacist_reply = match record.confirmed_via? {
            ConfirmedVia::Poll => Some(record.pharmacist_reply.as_deref()),
            ConfirmedVia::Direct => None,
        };

        Some(HashInput {
            id: &record.id,
            pharmacist: record.pharmacist.as_deref(),
            recipient: record.recipient_name.as_deref(),
            delivered_at,
            pharmacist_reply,
        })
    }

    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Derive the record hash. Same input, same digest.
pub fn derive_hash(input: &HashInput<'_>) -> Result<RecordHash> {
    let json = input.canonical_json()?;
    Ok(RecordHash(keccak256(json.as_bytes())))
}
