use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::crypto::RecordHash;
use crate::error::TransitionError;

/// Lifecycle status of a delivery.
///
/// Statuses only ever move forward: `InTransit` → `Delivered` → one of the
/// terminal statuses, or `InTransit` → `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    InTransit,
    Delivered,
    OnchainRecorded,
    DeliveredOnchainFailed,
    Timeout,
}

impl DeliveryStatus {
    /// Position in the forward order. Terminal statuses share the top rank.
    pub fn rank(self) -> u8 {
        match self {
            DeliveryStatus::InTransit => 0,
            DeliveryStatus::Delivered => 1,
            DeliveryStatus::OnchainRecorded
            | DeliveryStatus::DeliveredOnchainFailed
            | DeliveryStatus::Timeout => 2,
        }
    }

    pub fn is_terminal(self) -> bool {
        self.rank() == 2
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::OnchainRecorded => "onchain_recorded",
            DeliveryStatus::DeliveredOnchainFailed => "delivered_onchain_failed",
            DeliveryStatus::Timeout => "timeout",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a delivery got confirmed. Determines the shape of the hashed record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmedVia {
    /// Detected by polling the confirmation endpoint.
    Poll,
    /// Reported synchronously through the confirm API.
    Direct,
}

/// Persisted state of one tracked delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub id: String,
    pub confirmation_endpoint: String,
    pub pharmacist: Option<String>,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub created_at: String,

    pub recipient_name: Option<String>,
    pub recipient_signature: Option<String>,
    pub delivered_at: Option<DeliveredAt>,
    pub pharmacist_reply: Option<String>,
    pub confirmed_via: Option<ConfirmedVia>,

    pub ledger_hash: Option<String>,
    pub ledger_tx_ref: Option<String>,
    pub ledger_error: Option<String>,
}

impl DeliveryRecord {
    /// Fresh registration in `InTransit` with no attempts.
    pub fn new(id: String, confirmation_endpoint: String, pharmacist: Option<String>) -> Self {
        Self {
            id,
            confirmation_endpoint,
            pharmacist,
            status: DeliveryStatus::InTransit,
            attempts: 0,
            created_at: crate::time::now_rfc3339(),
            recipient_name: None,
            recipient_signature: None,
            delivered_at: None,
            pharmacist_reply: None,
            confirmed_via: None,
            ledger_hash: None,
            ledger_tx_ref: None,
            ledger_error: None,
        }
    }

    /// Merge a re-registration into an existing record.
    ///
    /// Only the pre-delivery attribution may change, and only while the
    /// delivery is still in transit. Returns whether anything changed.
    pub fn merge_registration(&mut self, registration: &DeliveryRecord) -> bool {
        if self.status != DeliveryStatus::InTransit || self.pharmacist == registration.pharmacist {
            return false;
        }
        self.pharmacist = registration.pharmacist.clone();
        true
    }

    /// Apply one atomic field-group update, enforcing the transition table.
    pub fn apply(&mut self, update: &DeliveryUpdate) -> Result<(), TransitionError> {
        let next = update.target_status();
        match (self.status, update) {
            (DeliveryStatus::InTransit, DeliveryUpdate::Attempts(attempts)) => {
                self.attempts = *attempts;
            }
            (DeliveryStatus::InTransit, DeliveryUpdate::Delivered(fields)) => {
                self.recipient_name = fields.recipient_name.clone();
                self.recipient_signature = fields.recipient_signature.clone();
                self.delivered_at = Some(fields.delivered_at.clone());
                if fields.confirmed_via == ConfirmedVia::Poll {
                    self.pharmacist_reply = fields.pharmacist_reply.clone();
                }
                self.confirmed_via = Some(fields.confirmed_via);
                self.status = DeliveryStatus::Delivered;
            }
            (DeliveryStatus::Delivered, DeliveryUpdate::OnchainRecorded { hash, tx_ref }) => {
                if self.ledger_hash.is_some() {
                    return Err(TransitionError::LedgerHashAlreadySet(self.id.clone()));
                }
                self.ledger_hash = Some(hash.clone());
                self.ledger_tx_ref = Some(tx_ref.clone());
                self.status = DeliveryStatus::OnchainRecorded;
            }
            (DeliveryStatus::Delivered, DeliveryUpdate::OnchainFailed { error }) => {
                self.ledger_error = Some(error.clone());
                self.status = DeliveryStatus::DeliveredOnchainFailed;
            }
            (DeliveryStatus::InTransit, DeliveryUpdate::TimedOut) => {
                self.status = DeliveryStatus::Timeout;
            }
            (current, _) => {
                return Err(TransitionError::Invalid {
                    id: self.id.clone(),
                    from: current,
                    to: next,
                })
            }
        }
        Ok(())
    }
}

/// Delivery time as the courier reported it.
///
/// A numeric timestamp stays a JSON number, so the hashed record keeps the
/// courier's JSON type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeliveredAt {
    Text(String),
    Number(serde_json::Number),
}

impl DeliveredAt {
    /// Current time as RFC 3339 text.
    pub fn now() -> Self {
        DeliveredAt::Text(crate::time::now_rfc3339())
    }
}

impl From<&str> for DeliveredAt {
    fn from(value: &str) -> Self {
        DeliveredAt::Text(value.to_string())
    }
}

impl From<u64> for DeliveredAt {
    fn from(value: u64) -> Self {
        DeliveredAt::Number(value.into())
    }
}

impl fmt::Display for DeliveredAt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveredAt::Text(text) => f.write_str(text),
            DeliveredAt::Number(number) => write!(f, "{number}"),
        }
    }
}

/// Recipient fields written together with the `Delivered` status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveredFields {
    pub recipient_name: Option<String>,
    pub recipient_signature: Option<String>,
    pub delivered_at: DeliveredAt,
    /// Only persisted for poll confirmations; direct confirmations leave the
    /// stored reply untouched.
    pub pharmacist_reply: Option<String>,
    pub confirmed_via: ConfirmedVia,
}

/// One atomic partial update of a delivery record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryUpdate {
    /// Poll counter after a cycle.
    Attempts(u32),
    Delivered(DeliveredFields),
    OnchainRecorded { hash: String, tx_ref: String },
    OnchainFailed { error: String },
    TimedOut,
}

impl DeliveryUpdate {
    /// Status a record has after this update is applied.
    pub fn target_status(&self) -> DeliveryStatus {
        match self {
            DeliveryUpdate::Attempts(_) => DeliveryStatus::InTransit,
            DeliveryUpdate::Delivered(_) => DeliveryStatus::Delivered,
            DeliveryUpdate::OnchainRecorded { .. } => DeliveryStatus::OnchainRecorded,
            DeliveryUpdate::OnchainFailed { .. } => DeliveryStatus::DeliveredOnchainFailed,
            DeliveryUpdate::TimedOut => DeliveryStatus::Timeout,
        }
    }
}

/// Body returned by a confirmation endpoint.
///
/// Unknown fields are ignored and every field is optional. Text fields
/// accept any JSON type: non-strings are kept as their JSON text, and
/// `null`, `false` and `0` read as absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationPayload {
    #[serde(default, deserialize_with = "lenient_text")]
    pub status: Option<String>,
    #[serde(default, rename = "recipientName", deserialize_with = "lenient_text")]
    pub recipient_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub name: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub signature: Option<String>,
    /// Either an ISO string or a number, depending on the courier.
    #[serde(default)]
    pub timestamp: Option<Value>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub pharmacist: Option<String>,
}

impl ConfirmationPayload {
    /// `delivered` and `confirmed` both mean the hand-off happened.
    pub fn is_delivered(&self) -> bool {
        matches!(self.status.as_deref(), Some("delivered") | Some("confirmed"))
    }

    /// Extract the recipient fields, falling back where the payload is silent.
    pub fn delivered_fields(&self, record: &DeliveryRecord) -> DeliveredFields {
        let delivered_at = match &self.timestamp {
            Some(Value::String(s)) if !s.is_empty() => DeliveredAt::Text(s.clone()),
            Some(Value::Number(n)) if !is_zero(n) => DeliveredAt::Number(n.clone()),
            _ => DeliveredAt::now(),
        };

        DeliveredFields {
            recipient_name: non_empty(&self.recipient_name).or_else(|| non_empty(&self.name)),
            recipient_signature: non_empty(&self.signature),
            delivered_at,
            pharmacist_reply: non_empty(&self.pharmacist).or_else(|| record.pharmacist.clone()),
            confirmed_via: ConfirmedVia::Poll,
        }
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|s| !s.is_empty()).cloned()
}

fn is_zero(number: &serde_json::Number) -> bool {
    number.as_f64() == Some(0.0)
}

fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) | Some(Value::Bool(false)) => None,
        Some(Value::Number(n)) if is_zero(&n) => None,
        Some(Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Hash and metadata handed to a ledger client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerSubmission {
    pub record_hash: RecordHash,
    /// Unix seconds at submission time.
    pub timestamp: u64,
    pub attribution: String,
}

/// Proof that the ledger included a submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerReceipt {
    pub tx_ref: String,
    pub block_number: Option<u64>,
}

/// Result of a successful direct confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Confirmation {
    pub id: String,
    pub ledger_tx_ref: String,
    pub record_hash: String,
}

/// Published after every persisted status change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub id: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
}
