use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use super::{json_rpc::JsonRpcLedger, mock::MockLedger, noop::NoopLedger};
use crate::config::{BaseConfig, LedgerType};
use crate::error::LedgerError;
use crate::traits::LedgerClient;
use crate::types::{LedgerReceipt, LedgerSubmission};

/// Enum representing all ledger client implementations.
pub enum LedgerVariant {
    JsonRpc(JsonRpcLedger),
    Noop(NoopLedger),
    Mock(MockLedger),
}

impl LedgerVariant {
    /// Build the ledger client selected by `config.ledger`.
    pub fn from_config(config: &BaseConfig) -> Result<Self> {
        match config.ledger {
            LedgerType::Noop => Ok(LedgerVariant::Noop(NoopLedger::new())),
            LedgerType::JsonRpc => {
                let rpc_url = required(&config.rpc_url, "RPC_URL")?;
                url::Url::parse(rpc_url).map_err(|e| anyhow!("invalid RPC_URL {rpc_url}: {e}"))?;
                let contract = required(&config.contract_address, "CONTRACT_ADDRESS")?;
                let sender = required(&config.sender_address, "SENDER_ADDRESS")?;
                Ok(LedgerVariant::JsonRpc(JsonRpcLedger::new(
                    rpc_url.to_string(),
                    contract.to_string(),
                    sender.to_string(),
                    Duration::from_millis(config.receipt_poll_ms),
                )))
            }
        }
    }
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| anyhow!("{name} is required for the json-rpc ledger"))
}

#[async_trait]
impl LedgerClient for LedgerVariant {
    fn name(&self) -> &'static str {
        match self {
            LedgerVariant::JsonRpc(inner) => inner.name(),
            LedgerVariant::Noop(inner) => inner.name(),
            LedgerVariant::Mock(inner) => inner.name(),
        }
    }

    async fn submit(&self, submission: &LedgerSubmission) -> Result<LedgerReceipt, LedgerError> {
        match self {
            LedgerVariant::JsonRpc(inner) => inner.submit(submission).await,
            LedgerVariant::Noop(inner) => inner.submit(submission).await,
            LedgerVariant::Mock(inner) => inner.submit(submission).await,
        }
    }
}
