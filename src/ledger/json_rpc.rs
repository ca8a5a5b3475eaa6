//! Ethereum JSON-RPC ledger client.
//!
//! Sends `recordDelivery` transactions with `eth_sendTransaction` from an
//! account the node manages, then polls `eth_getTransactionReceipt` until the
//! transaction is included. The caller bounds the whole exchange with its own
//! timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::abi;
use crate::error::LedgerError;
use crate::traits::LedgerClient;
use crate::types::{LedgerReceipt, LedgerSubmission};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, T: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: T,
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TransactionReceipt {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    block_number: Option<String>,
}

pub struct JsonRpcLedger {
    http_client: reqwest::Client,
    rpc_url: String,
    contract_address: String,
    sender_address: String,
    receipt_poll_interval: Duration,
    request_id: AtomicU64,
}

impl JsonRpcLedger {
    pub fn new(
        rpc_url: String,
        contract_address: String,
        sender_address: String,
        receipt_poll_interval: Duration,
    ) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            rpc_url,
            contract_address,
            sender_address,
            receipt_poll_interval,
            request_id: AtomicU64::new(1),
        }
    }

    /// Make a JSON-RPC call. A `null` result comes back as `None`.
    async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<Option<R>, LedgerError> {
        let id = self.request_id.fetch_add(1, Ordering::SeqCst);
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            method,
            params,
            id,
        };

        let response = self
            .http_client
            .post(&self.rpc_url)
            .json(&request)
            .send()
            .await?
            .error_for_status()?;

        let rpc_response: JsonRpcResponse<R> = response
            .json()
            .await
            .map_err(|e| LedgerError::InvalidResponse(format!("{method}: {e}")))?;

        if let Some(error) = rpc_response.error {
            return Err(LedgerError::Rejected(format!(
                "{method} failed ({}): {}",
                error.code, error.message
            )));
        }
        Ok(rpc_response.result)
    }

    async fn wait_for_receipt(&self, tx_ref: &str) -> Result<LedgerReceipt, LedgerError> {
        loop {
            match self
                .call::<_, TransactionReceipt>("eth_getTransactionReceipt", [tx_ref])
                .await
            {
                Ok(Some(receipt)) => {
                    return match receipt.status.as_deref() {
                        Some("0x1") => Ok(LedgerReceipt {
                            tx_ref: tx_ref.to_string(),
                            block_number: receipt.block_number.as_deref().and_then(parse_hex_u64),
                        }),
                        Some("0x0") => Err(LedgerError::Reverted {
                            tx_ref: tx_ref.to_string(),
                        }),
                        other => Err(LedgerError::InvalidResponse(format!(
                            "receipt for {tx_ref} has status {other:?}"
                        ))),
                    };
                }
                Ok(None) => debug!(tx_ref, "transaction not yet included"),
                // The transaction is already out; a flaky node must not fail it.
                Err(LedgerError::Transport(e)) => {
                    warn!(tx_ref, error = %e, "receipt lookup failed, retrying")
                }
                Err(e) => return Err(e),
            }
            tokio::time::sleep(self.receipt_poll_interval).await;
        }
    }
}

#[async_trait]
impl LedgerClient for JsonRpcLedger {
    fn name(&self) -> &'static str {
        "json-rpc"
    }

    async fn submit(&self, submission: &LedgerSubmission) -> Result<LedgerReceipt, LedgerError> {
        let calldata = abi::encode_record_delivery(
            &submission.record_hash,
            submission.timestamp,
            &submission.attribution,
        );
        let transaction = json!({
            "from": self.sender_address,
            "to": self.contract_address,
            "data": format!("0x{}", hex::encode(calldata)),
        });

        let tx_ref: String = self
            .call("eth_sendTransaction", [transaction])
            .await?
            .ok_or_else(|| {
                LedgerError::InvalidResponse("eth_sendTransaction returned no hash".to_string())
            })?;
        info!(
            tx_ref,
            hash = %submission.record_hash,
            "transaction sent, waiting for inclusion"
        );

        self.wait_for_receipt(&tx_ref).await
    }
}

fn parse_hex_u64(value: &str) -> Option<u64> {
    u64::from_str_radix(value.trim_start_matches("0x"), 16).ok()
}
