use async_trait::async_trait;

use crate::error::LedgerError;
use crate::traits::LedgerClient;
use crate::types::{LedgerReceipt, LedgerSubmission};

/// Ledger that only logs. Useful for local runs without a node.
pub struct NoopLedger;

impl NoopLedger {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for NoopLedger {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn submit(&self, submission: &LedgerSubmission) -> Result<LedgerReceipt, LedgerError> {
        tracing::info!(
            "Noop ledger submission: hash={}, timestamp={}, attribution={:?}",
            submission.record_hash,
            submission.timestamp,
            submission.attribution
        );
        Ok(LedgerReceipt {
            tx_ref: format!("noop:{}", submission.record_hash),
            block_number: None,
        })
    }
}
